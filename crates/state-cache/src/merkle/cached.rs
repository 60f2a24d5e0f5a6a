// merkle/cached.rs
use super::tree::leaf_count;
use super::{AsyncMerkleTreeStore, MerkleTreeNode, MerkleTreeNodeQuery, MerkleTreeStore, NodeHash, MAX_HEIGHT};
use crate::errors::{lock, CacheError, Result};
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type NodeKey = (u32, u64);

/// Capa copy-on-write sobre un `AsyncMerkleTreeStore`.
///
/// El árbol la recorre de forma síncrona (`MerkleTreeStore`), así que antes
/// de tocar una hoja hay que precargarla con `preload_key`: eso trae en un
/// solo viaje el nodo y el hermano de cada nivel del camino. Las lecturas
/// síncronas sólo consultan lo local.
///
/// Lo leído del padre (incluidas las ausencias) y lo escrito se guardan por
/// separado; `merge_into_parent` sólo envía lo escrito.
pub struct CachedMerkleTreeStore {
  parent: Arc<dyn AsyncMerkleTreeStore>,
  height: u32,
  fetched: Mutex<HashMap<NodeKey, Option<NodeHash>>>,
  written: Mutex<IndexMap<NodeKey, NodeHash>>,
}

impl CachedMerkleTreeStore {
  pub fn new(parent: Arc<dyn AsyncMerkleTreeStore>, height: u32) -> Result<Self> {
    if height == 0 || height > MAX_HEIGHT {
      return Err(CacheError::InvalidHeight(height));
    }
    Ok(Self { parent, height, fetched: Mutex::new(HashMap::new()), written: Mutex::new(IndexMap::new()) })
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  /// `Some(v)` si esta capa conoce el nodo (`v` = `None` es ausencia
  /// confirmada por el padre).
  fn local(&self, key: &NodeKey) -> Result<Option<Option<NodeHash>>> {
    if let Some(v) = lock(&self.written, "written")?.get(key) {
      return Ok(Some(Some(*v)));
    }
    Ok(lock(&self.fetched, "fetched")?.get(key).copied())
  }

  /// Nodos del camino de la hoja `index` (módulo el número de hojas): nodo
  /// y hermano en cada nivel, sólo el nodo en la raíz.
  fn path_queries(&self, index: u64) -> Vec<MerkleTreeNodeQuery> {
    let mut current = index % leaf_count(self.height);
    let mut queries = Vec::with_capacity(2 * self.height as usize);
    for level in 0..self.height {
      queries.push(MerkleTreeNodeQuery { level, index: current });
      if level < self.height - 1 {
        queries.push(MerkleTreeNodeQuery { level, index: current ^ 1 });
      }
      current /= 2;
    }
    queries
  }

  pub async fn preload_key(&self, index: u64) -> Result<()> {
    self.preload_keys(&[index]).await
  }

  /// Precarga los caminos de varias hojas en un único viaje al padre. Los
  /// nodos ya conocidos localmente no se vuelven a pedir.
  pub async fn preload_keys(&self, indices: &[u64]) -> Result<()> {
    let mut missing: IndexSet<MerkleTreeNodeQuery> = IndexSet::new();
    for index in indices {
      for query in self.path_queries(*index) {
        if self.local(&(query.level, query.index))?.is_none() {
          missing.insert(query);
        }
      }
    }
    if missing.is_empty() {
      return Ok(());
    }
    let queries: Vec<MerkleTreeNodeQuery> = missing.into_iter().collect();
    let values = self.parent.get_nodes_async(&queries).await?;
    if values.len() != queries.len() {
      return Err(CacheError::Store(format!("el padre devolvió {} nodos para {} consultas", values.len(), queries.len())));
    }
    let mut fetched = lock(&self.fetched, "fetched")?;
    for (query, value) in queries.iter().zip(values) {
      fetched.entry((query.level, query.index)).or_insert(value);
    }
    log::debug!("[merkle-cache] precargados {} nodos para {} hojas", queries.len(), indices.len());
    Ok(())
  }

  /// Escribe en el padre, en una transacción, los nodos escritos aquí.
  /// Sin escrituras no hace nada. Tras el merge los nodos siguen visibles
  /// como leídos.
  pub async fn merge_into_parent(&self) -> Result<()> {
    let nodes: Vec<MerkleTreeNode> = lock(&self.written, "written")?
      .iter()
      .map(|(&(level, index), &value)| MerkleTreeNode { level, index, value })
      .collect();
    if nodes.is_empty() {
      return Ok(());
    }
    self.parent.open_transaction().await?;
    self.parent.write_nodes(nodes.clone()).await?;
    self.parent.commit().await?;
    let mut written = lock(&self.written, "written")?;
    let mut fetched = lock(&self.fetched, "fetched")?;
    for node in &nodes {
      if written.get(&(node.level, node.index)) == Some(&node.value) {
        written.shift_remove(&(node.level, node.index));
      }
      fetched.insert((node.level, node.index), Some(node.value));
    }
    log::info!("[merkle-cache] merge de {} nodos al padre", nodes.len());
    Ok(())
  }

  pub fn pending_writes(&self) -> usize {
    self.written.lock().map(|w| w.len()).unwrap_or(0)
  }
}

impl MerkleTreeStore for CachedMerkleTreeStore {
  fn get_node(&self, level: u32, index: u64) -> Option<NodeHash> {
    match self.local(&(level, index)) {
      Ok(found) => found.flatten(),
      Err(e) => {
        log::warn!("[merkle-cache] lectura local fallida ({}, {}): {}", level, index, e);
        None
      }
    }
  }

  fn set_node(&self, level: u32, index: u64, value: NodeHash) {
    self.written.lock().unwrap_or_else(|e| e.into_inner()).insert((level, index), value);
  }
}

#[async_trait]
impl AsyncMerkleTreeStore for CachedMerkleTreeStore {
  async fn open_transaction(&self) -> Result<()> {
    Ok(())
  }

  async fn commit(&self) -> Result<()> {
    Ok(())
  }

  async fn write_nodes(&self, nodes: Vec<MerkleTreeNode>) -> Result<()> {
    let mut written = lock(&self.written, "written")?;
    for node in nodes {
      written.insert((node.level, node.index), node.value);
    }
    Ok(())
  }

  /// Responde lo conocido localmente y pide el resto al padre en un único
  /// viaje. Lo traído queda cacheado.
  async fn get_nodes_async(&self, queries: &[MerkleTreeNodeQuery]) -> Result<Vec<Option<NodeHash>>> {
    let mut results: Vec<Option<Option<NodeHash>>> = Vec::with_capacity(queries.len());
    let mut misses: Vec<MerkleTreeNodeQuery> = Vec::new();
    for query in queries {
      let local = self.local(&(query.level, query.index))?;
      if local.is_none() && !misses.contains(query) {
        misses.push(*query);
      }
      results.push(local);
    }
    if !misses.is_empty() {
      let values = self.parent.get_nodes_async(&misses).await?;
      if values.len() != misses.len() {
        return Err(CacheError::Store(format!("el padre devolvió {} nodos para {} consultas", values.len(), misses.len())));
      }
      let mut fetched = lock(&self.fetched, "fetched")?;
      for (query, value) in misses.iter().zip(values) {
        fetched.entry((query.level, query.index)).or_insert(value);
      }
      for (slot, query) in results.iter_mut().zip(queries) {
        if slot.is_none() {
          *slot = Some(fetched.get(&(query.level, query.index)).copied().flatten());
        }
      }
    }
    Ok(results.into_iter().map(|r| r.flatten()).collect())
  }
}
