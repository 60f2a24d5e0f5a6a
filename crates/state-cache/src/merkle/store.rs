// merkle/store.rs
use super::{MerkleTreeNode, MerkleTreeNodeQuery, NodeHash};
use crate::errors::{lock, CacheError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Store síncrono de nodos, el que recorre `RollupMerkleTree`.
pub trait MerkleTreeStore: Send + Sync {
  fn get_node(&self, level: u32, index: u64) -> Option<NodeHash>;

  fn set_node(&self, level: u32, index: u64, value: NodeHash);
}

impl<T: MerkleTreeStore + ?Sized> MerkleTreeStore for Arc<T> {
  fn get_node(&self, level: u32, index: u64) -> Option<NodeHash> {
    (**self).get_node(level, index)
  }

  fn set_node(&self, level: u32, index: u64, value: NodeHash) {
    (**self).set_node(level, index, value)
  }
}

/// Store remoto de nodos con escrituras transaccionales. Abrir una
/// transacción descarta la anterior si no llegó a `commit`.
#[async_trait]
pub trait AsyncMerkleTreeStore: Send + Sync {
  async fn open_transaction(&self) -> Result<()>;

  async fn commit(&self) -> Result<()>;

  async fn write_nodes(&self, nodes: Vec<MerkleTreeNode>) -> Result<()>;

  /// Un resultado por consulta, en el mismo orden; `None` si el nodo no
  /// existe.
  async fn get_nodes_async(&self, queries: &[MerkleTreeNodeQuery]) -> Result<Vec<Option<NodeHash>>>;
}

#[derive(Default)]
pub struct InMemoryMerkleTreeStore {
  nodes: Mutex<HashMap<(u32, u64), NodeHash>>,
}

impl InMemoryMerkleTreeStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.nodes.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl MerkleTreeStore for InMemoryMerkleTreeStore {
  fn get_node(&self, level: u32, index: u64) -> Option<NodeHash> {
    self.nodes.lock().unwrap_or_else(|e| e.into_inner()).get(&(level, index)).copied()
  }

  fn set_node(&self, level: u32, index: u64, value: NodeHash) {
    self.nodes.lock().unwrap_or_else(|e| e.into_inner()).insert((level, index), value);
  }
}

/// Store asíncrono en memoria: staging hasta `commit` y contador de viajes
/// de lectura.
#[derive(Default)]
pub struct InMemoryAsyncMerkleTreeStore {
  nodes: Mutex<HashMap<(u32, u64), NodeHash>>,
  staged: Mutex<Option<Vec<MerkleTreeNode>>>,
  round_trips: AtomicUsize,
  commits: AtomicUsize,
}

impl InMemoryAsyncMerkleTreeStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn round_trips(&self) -> usize {
    self.round_trips.load(Ordering::SeqCst)
  }

  pub fn commits(&self) -> usize {
    self.commits.load(Ordering::SeqCst)
  }

  pub fn len(&self) -> usize {
    self.nodes.lock().map(|n| n.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl AsyncMerkleTreeStore for InMemoryAsyncMerkleTreeStore {
  async fn open_transaction(&self) -> Result<()> {
    let mut staged = lock(&self.staged, "staged")?;
    // una transacción que no llegó a `commit` se descarta entera
    if let Some(stale) = staged.replace(Vec::new()) {
      log::warn!("[merkle-store] transacción sin commit descartada ({} nodos)", stale.len());
    }
    Ok(())
  }

  async fn commit(&self) -> Result<()> {
    let nodes = lock(&self.staged, "staged")?.take()
                                             .ok_or_else(|| CacheError::Store("commit sin transacción".into()))?;
    let mut stored = lock(&self.nodes, "nodes")?;
    for node in nodes {
      stored.insert((node.level, node.index), node.value);
    }
    self.commits.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn write_nodes(&self, nodes: Vec<MerkleTreeNode>) -> Result<()> {
    let mut staged = lock(&self.staged, "staged")?;
    match staged.as_mut() {
      Some(buffer) => {
        buffer.extend(nodes);
        Ok(())
      }
      None => Err(CacheError::Store("write_nodes sin transacción abierta".into())),
    }
  }

  async fn get_nodes_async(&self, queries: &[MerkleTreeNodeQuery]) -> Result<Vec<Option<NodeHash>>> {
    self.round_trips.fetch_add(1, Ordering::SeqCst);
    let stored = lock(&self.nodes, "nodes")?;
    Ok(queries.iter().map(|q| stored.get(&(q.level, q.index)).copied()).collect())
  }
}
