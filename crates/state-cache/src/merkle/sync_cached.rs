// merkle/sync_cached.rs
use super::{MerkleTreeStore, NodeHash};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

/// Capa copy-on-write sobre un `MerkleTreeStore` síncrono: las lecturas
/// atraviesan al padre, las escrituras quedan aquí hasta el merge.
pub struct SyncCachedMerkleTreeStore {
  parent: Arc<dyn MerkleTreeStore>,
  written: Mutex<IndexMap<(u32, u64), NodeHash>>,
}

impl SyncCachedMerkleTreeStore {
  pub fn new(parent: Arc<dyn MerkleTreeStore>) -> Self {
    Self { parent, written: Mutex::new(IndexMap::new()) }
  }

  /// Vuelca los nodos escritos en el padre y vacía la capa. Devuelve
  /// cuántos nodos se escribieron.
  pub fn merge_into_parent(&self) -> usize {
    let written: Vec<((u32, u64), NodeHash)> =
      self.written.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
    for ((level, index), value) in &written {
      self.parent.set_node(*level, *index, *value);
    }
    log::debug!("[merkle-cache] merge síncrono de {} nodos", written.len());
    written.len()
  }

  pub fn pending_writes(&self) -> usize {
    self.written.lock().unwrap_or_else(|e| e.into_inner()).len()
  }
}

impl MerkleTreeStore for SyncCachedMerkleTreeStore {
  fn get_node(&self, level: u32, index: u64) -> Option<NodeHash> {
    if let Some(v) = self.written.lock().unwrap_or_else(|e| e.into_inner()).get(&(level, index)) {
      return Some(*v);
    }
    self.parent.get_node(level, index)
  }

  fn set_node(&self, level: u32, index: u64, value: NodeHash) {
    self.written.lock().unwrap_or_else(|e| e.into_inner()).insert((level, index), value);
  }
}
