//! Cachés copy-on-write sobre los stores remotos del secuenciador: estado
//! clave/valor (`CachedStateService`) y nodos de árbol de Merkle
//! (`CachedMerkleTreeStore`, `SyncCachedMerkleTreeStore`).
//!
//! Cada capa acumula escrituras especulativas y las confirma en su padre de
//! una vez con `merge_into_parent`; las capas se encadenan.
mod cached_state;
mod errors;
pub mod merkle;
mod state;

pub use cached_state::CachedStateService;
pub use errors::{CacheError, Result};
pub use merkle::{AsyncMerkleTreeStore, CachedMerkleTreeStore, InMemoryAsyncMerkleTreeStore, InMemoryMerkleTreeStore,
                 MerkleTreeNode, MerkleTreeNodeQuery, MerkleTreeStore, MerkleWitness, NodeHash, RollupMerkleTree,
                 SyncCachedMerkleTreeStore};
pub use state::{AsyncStateService, InMemoryAsyncStateService, StateEntry, StateKey, StateValue};
