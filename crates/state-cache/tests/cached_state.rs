use async_trait::async_trait;
use state_cache::{AsyncStateService, CacheError, CachedStateService, InMemoryAsyncStateService, StateEntry, StateKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn key(s: &str) -> StateKey {
  s.as_bytes().to_vec()
}

fn base() -> Arc<InMemoryAsyncStateService> {
  Arc::new(InMemoryAsyncStateService::with_values(vec![(key("alice"), b"10".to_vec()), (key("bob"), b"20".to_vec())]))
}

#[tokio::test]
async fn reads_fall_through_and_local_writes_win() {
  let parent = base();
  let cache = CachedStateService::new(Some(parent.clone()));
  assert_eq!(cache.get(b"alice").await.unwrap(), Some(b"10".to_vec()));

  cache.set(key("alice"), Some(b"11".to_vec())).unwrap();
  assert_eq!(cache.get(b"alice").await.unwrap(), Some(b"11".to_vec()));
  // el padre no cambia hasta el merge
  assert_eq!(parent.get(b"alice").await.unwrap(), Some(b"10".to_vec()));
  assert_eq!(cache.get(b"nobody").await.unwrap(), None);
}

#[tokio::test]
async fn local_delete_is_not_masked_by_the_parent() {
  let parent = base();
  let cache = CachedStateService::new(Some(parent.clone()));
  cache.set(key("bob"), None).unwrap();
  assert_eq!(cache.get(b"bob").await.unwrap(), None);

  // precargar no debe resucitar la clave borrada
  cache.preload_keys(&[key("bob")]).await.unwrap();
  assert_eq!(cache.get(b"bob").await.unwrap(), None);

  cache.merge_into_parent().await.unwrap();
  assert_eq!(parent.get(b"bob").await.unwrap(), None);
  assert_eq!(parent.len(), 1);
}

#[tokio::test]
async fn preload_batches_and_never_refetches() {
  let parent = base();
  let cache = CachedStateService::new(Some(parent.clone()));
  cache.preload_keys(&[key("alice"), key("bob"), key("carol")]).await.unwrap();
  assert_eq!(parent.round_trips(), 1);

  cache.preload_keys(&[key("alice"), key("carol")]).await.unwrap();
  assert_eq!(parent.round_trips(), 1, "nada que pedir");

  // lo precargado, incluida la ausencia de carol, se sirve en local
  assert_eq!(cache.get(b"alice").await.unwrap(), Some(b"10".to_vec()));
  assert_eq!(cache.get(b"carol").await.unwrap(), None);
  assert_eq!(parent.round_trips(), 1);
}

#[tokio::test]
async fn merge_writes_once_and_then_reads_fall_through() {
  let parent = base();
  let cache = CachedStateService::new(Some(parent.clone()));
  cache.set(key("alice"), Some(b"1".to_vec())).unwrap();
  cache.set(key("dave"), Some(b"4".to_vec())).unwrap();
  assert_eq!(cache.pending_writes(), 2);

  cache.merge_into_parent().await.unwrap();
  assert_eq!(parent.commits(), 1);
  assert_eq!(cache.pending_writes(), 0);
  assert_eq!(parent.get(b"dave").await.unwrap(), Some(b"4".to_vec()));
  assert_eq!(cache.get(b"alice").await.unwrap(), Some(b"1".to_vec()));
}

#[tokio::test]
async fn root_cache_cannot_merge() {
  let cache = CachedStateService::new(None);
  cache.set(key("x"), Some(vec![1])).unwrap();
  assert_eq!(cache.get(b"x").await.unwrap(), Some(vec![1]));
  assert_eq!(cache.merge_into_parent().await.unwrap_err(), CacheError::ParentUndefined);
  assert_eq!(CacheError::ParentUndefined.to_string(), "parent is undefined");
}

#[tokio::test]
async fn caches_chain_and_merge_level_by_level() {
  let root = base();
  let middle = Arc::new(CachedStateService::new(Some(root.clone())));
  let top = CachedStateService::new(Some(middle.clone()));

  assert_eq!(top.get(b"bob").await.unwrap(), Some(b"20".to_vec()));
  top.set(key("bob"), Some(b"21".to_vec())).unwrap();
  top.set(key("alice"), None).unwrap();

  top.merge_into_parent().await.unwrap();
  assert_eq!(middle.get(b"bob").await.unwrap(), Some(b"21".to_vec()));
  assert_eq!(middle.get(b"alice").await.unwrap(), None);
  assert_eq!(root.get(b"bob").await.unwrap(), Some(b"20".to_vec()));

  middle.merge_into_parent().await.unwrap();
  assert_eq!(root.get(b"bob").await.unwrap(), Some(b"21".to_vec()));
  assert_eq!(root.get(b"alice").await.unwrap(), None);
}

/// Delega en un store en memoria y rechaza la primera escritura.
struct FailsFirstWrite {
  inner: Arc<InMemoryAsyncStateService>,
  failed: AtomicBool,
}

#[async_trait]
impl AsyncStateService for FailsFirstWrite {
  async fn open_transaction(&self) -> state_cache::Result<()> {
    self.inner.open_transaction().await
  }

  async fn commit(&self) -> state_cache::Result<()> {
    self.inner.commit().await
  }

  async fn write_states(&self, entries: Vec<StateEntry>) -> state_cache::Result<()> {
    if !self.failed.swap(true, Ordering::SeqCst) {
      return Err(CacheError::Store("disco lleno".into()));
    }
    self.inner.write_states(entries).await
  }

  async fn get_many(&self, keys: &[StateKey]) -> state_cache::Result<Vec<StateEntry>> {
    self.inner.get_many(keys).await
  }
}

#[tokio::test]
async fn failed_merge_does_not_block_later_transactions() {
  let root = base();
  let parent = Arc::new(FailsFirstWrite { inner: root.clone(), failed: AtomicBool::new(false) });
  let cache = CachedStateService::new(Some(parent.clone()));
  cache.set(key("alice"), Some(b"11".to_vec())).unwrap();

  assert_eq!(cache.merge_into_parent().await.unwrap_err(), CacheError::Store("disco lleno".into()));
  assert_eq!(cache.pending_writes(), 1);
  assert_eq!(root.get(b"alice").await.unwrap(), Some(b"10".to_vec()));

  cache.merge_into_parent().await.unwrap();
  assert_eq!(root.get(b"alice").await.unwrap(), Some(b"11".to_vec()));

  let other = CachedStateService::new(Some(parent));
  other.set(key("carol"), Some(b"5".to_vec())).unwrap();
  other.merge_into_parent().await.unwrap();
  assert_eq!(root.get(b"carol").await.unwrap(), Some(b"5".to_vec()));
}
