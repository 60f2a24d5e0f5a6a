// errors.rs
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
  /// `merge_into_parent` sobre una caché raíz.
  #[error("parent is undefined")]
  ParentUndefined,
  #[error("Error del store: {0}")]
  Store(String),
  #[error("Altura de árbol inválida: {0} (rango 1..=64)")]
  InvalidHeight(u32),
  #[error("Índice de hoja {index} fuera de rango (hojas: {leaf_count})")]
  LeafIndexOutOfRange { index: u64, leaf_count: u64 },
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Convierte un mutex envenenado en `CacheError::Store`.
pub(crate) fn lock<'a, T>(m: &'a std::sync::Mutex<T>, name: &str) -> Result<std::sync::MutexGuard<'a, T>> {
  m.lock().map_err(|e| CacheError::Store(format!("Mutex '{}' poisoned: {}", name, e)))
}
