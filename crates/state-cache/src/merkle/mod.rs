// merkle/mod.rs
mod cached;
mod store;
mod sync_cached;
mod tree;

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use std::fmt;

pub use cached::CachedMerkleTreeStore;
pub use store::{AsyncMerkleTreeStore, InMemoryAsyncMerkleTreeStore, InMemoryMerkleTreeStore, MerkleTreeStore};
pub use sync_cached::SyncCachedMerkleTreeStore;
pub use tree::{MerkleWitness, RollupMerkleTree, WitnessStep};

/// Altura máxima soportada: los índices de hoja son `u64`.
pub const MAX_HEIGHT: u32 = 64;

/// Hash de un nodo del árbol (sha2-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeHash(pub [u8; 32]);

impl NodeHash {
  /// Hash de hoja para datos arbitrarios.
  pub fn leaf(data: &[u8]) -> Self {
    let mut hasher = Sha256::new();
    hasher.update([0u8]);
    hasher.update(data);
    Self(hasher.finalize().into())
  }

  /// Hash de un nodo interno a partir de sus dos hijos.
  pub fn combine(left: &NodeHash, right: &NodeHash) -> Self {
    let mut hasher = Sha256::new();
    hasher.update([1u8]);
    hasher.update(left.0);
    hasher.update(right.0);
    Self(hasher.finalize().into())
  }

  /// Valor de un subárbol vacío con raíz en `level`.
  pub fn zero(level: u32) -> Self {
    ZEROS[level as usize]
  }
}

impl fmt::Display for NodeHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in self.0 {
      write!(f, "{:02x}", b)?;
    }
    Ok(())
  }
}

impl fmt::Debug for NodeHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "NodeHash({})", self)
  }
}

static ZEROS: Lazy<Vec<NodeHash>> = Lazy::new(|| {
  let mut zeros = vec![NodeHash::default()];
  for level in 1..MAX_HEIGHT as usize {
    let below = zeros[level - 1];
    zeros.push(NodeHash::combine(&below, &below));
  }
  zeros
});

/// Posición de un nodo: `level` 0 son las hojas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MerkleTreeNodeQuery {
  pub level: u32,
  pub index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MerkleTreeNode {
  pub level: u32,
  pub index: u64,
  pub value: NodeHash,
}

impl MerkleTreeNode {
  pub fn query(&self) -> MerkleTreeNodeQuery {
    MerkleTreeNodeQuery { level: self.level, index: self.index }
  }
}
