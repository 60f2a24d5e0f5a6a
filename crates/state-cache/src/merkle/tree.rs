// merkle/tree.rs
use super::{MerkleTreeStore, NodeHash, MAX_HEIGHT};
use crate::errors::{CacheError, Result};

/// Árbol de Merkle binario de altura fija sobre un `MerkleTreeStore`.
///
/// `height` cuenta niveles: las hojas están en el nivel 0 y la raíz en
/// `height - 1`, así que hay `2^(height-1)` hojas. Los nodos ausentes del
/// store valen el hash del subárbol vacío de su nivel.
pub struct RollupMerkleTree<S> {
  store: S,
  height: u32,
}

impl<S: MerkleTreeStore> RollupMerkleTree<S> {
  pub fn new(store: S, height: u32) -> Result<Self> {
    if height == 0 || height > MAX_HEIGHT {
      return Err(CacheError::InvalidHeight(height));
    }
    Ok(Self { store, height })
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn leaf_count(&self) -> u64 {
    leaf_count(self.height)
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  fn node(&self, level: u32, index: u64) -> NodeHash {
    self.store.get_node(level, index).unwrap_or_else(|| NodeHash::zero(level))
  }

  fn check(&self, index: u64) -> Result<()> {
    if index >= self.leaf_count() {
      return Err(CacheError::LeafIndexOutOfRange { index, leaf_count: self.leaf_count() });
    }
    Ok(())
  }

  pub fn root(&self) -> NodeHash {
    self.node(self.height - 1, 0)
  }

  pub fn get_leaf(&self, index: u64) -> Result<NodeHash> {
    self.check(index)?;
    Ok(self.node(0, index))
  }

  /// Escribe la hoja y recalcula su camino hasta la raíz. Necesita en el
  /// store los hermanos de cada nivel.
  pub fn set_leaf(&self, index: u64, value: NodeHash) -> Result<()> {
    self.check(index)?;
    self.store.set_node(0, index, value);
    let mut current = index;
    for level in 1..self.height {
      current /= 2;
      let left = self.node(level - 1, current * 2);
      let right = self.node(level - 1, current * 2 + 1);
      self.store.set_node(level, current, NodeHash::combine(&left, &right));
    }
    Ok(())
  }

  pub fn witness(&self, index: u64) -> Result<MerkleWitness> {
    self.check(index)?;
    let mut path = Vec::with_capacity(self.height as usize - 1);
    let mut current = index;
    for level in 0..self.height - 1 {
      path.push(WitnessStep { sibling: self.node(level, current ^ 1), is_left: current % 2 == 0 });
      current /= 2;
    }
    Ok(MerkleWitness { path })
  }
}

pub(crate) fn leaf_count(height: u32) -> u64 {
  1u64 << (height - 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WitnessStep {
  pub sibling: NodeHash,
  /// El nodo del camino es el hijo izquierdo en este nivel.
  pub is_left: bool,
}

/// Camino de hermanos desde una hoja hasta la raíz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleWitness {
  pub path: Vec<WitnessStep>,
}

impl MerkleWitness {
  pub fn calculate_root(&self, leaf: NodeHash) -> NodeHash {
    self.path.iter().fold(leaf, |acc, step| {
                      if step.is_left {
                        NodeHash::combine(&acc, &step.sibling)
                      } else {
                        NodeHash::combine(&step.sibling, &acc)
                      }
                    })
  }

  pub fn calculate_index(&self) -> u64 {
    self.path
        .iter()
        .enumerate()
        .filter(|(_, step)| !step.is_left)
        .fold(0u64, |acc, (level, _)| acc | (1u64 << level))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::merkle::InMemoryMerkleTreeStore;

  #[test]
  fn empty_tree_root_is_the_zero_hash() {
    let tree = RollupMerkleTree::new(InMemoryMerkleTreeStore::new(), 4).expect("tree");
    assert_eq!(tree.leaf_count(), 8);
    assert_eq!(tree.root(), NodeHash::zero(3));
    assert!(tree.store().is_empty());
  }

  #[test]
  fn witness_reproduces_the_root() {
    let tree = RollupMerkleTree::new(InMemoryMerkleTreeStore::new(), 5).expect("tree");
    for i in [0u64, 3, 9, 15] {
      tree.set_leaf(i, NodeHash::leaf(&i.to_le_bytes())).expect("set");
    }
    let witness = tree.witness(9).expect("witness");
    assert_eq!(witness.path.len(), 4);
    assert_eq!(witness.calculate_index(), 9);
    assert_eq!(witness.calculate_root(tree.get_leaf(9).expect("leaf")), tree.root());
    assert_ne!(witness.calculate_root(NodeHash::leaf(b"forged")), tree.root());
  }

  #[test]
  fn rejects_bad_heights_and_indices() {
    assert!(matches!(RollupMerkleTree::new(InMemoryMerkleTreeStore::new(), 0), Err(CacheError::InvalidHeight(0))));
    assert!(matches!(RollupMerkleTree::new(InMemoryMerkleTreeStore::new(), 65), Err(CacheError::InvalidHeight(65))));
    let tree = RollupMerkleTree::new(InMemoryMerkleTreeStore::new(), 3).expect("tree");
    assert!(tree.set_leaf(4, NodeHash::default()).is_err());
  }
}
