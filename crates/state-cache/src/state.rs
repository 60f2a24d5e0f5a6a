// state.rs
use crate::errors::{lock, CacheError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub type StateKey = Vec<u8>;
pub type StateValue = Vec<u8>;

/// Par clave/valor de estado. `value: None` significa ausente (o borrado,
/// cuando viaja en `write_states`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
  pub key: StateKey,
  pub value: Option<StateValue>,
}

impl StateEntry {
  pub fn new(key: impl Into<StateKey>, value: Option<StateValue>) -> Self {
    Self { key: key.into(), value }
  }
}

/// Store remoto de estado clave/valor.
///
/// Las escrituras se agrupan en una transacción: `open_transaction`,
/// `write_states` (una o varias veces) y `commit`. Abrir una transacción
/// descarta la anterior si no llegó a `commit`.
#[async_trait]
pub trait AsyncStateService: Send + Sync {
  async fn open_transaction(&self) -> Result<()>;

  async fn commit(&self) -> Result<()>;

  async fn write_states(&self, entries: Vec<StateEntry>) -> Result<()>;

  /// Una entrada por clave, en el mismo orden que `keys`.
  async fn get_many(&self, keys: &[StateKey]) -> Result<Vec<StateEntry>>;

  async fn get(&self, key: &[u8]) -> Result<Option<StateValue>> {
    let mut entries = self.get_many(&[key.to_vec()]).await?;
    Ok(entries.pop().and_then(|e| e.value))
  }
}

/// Store de estado en memoria para pruebas y demos.
///
/// Las escrituras quedan en staging hasta `commit`; escribir sin transacción
/// abierta es un error. Cuenta los viajes de `get_many` y los commits.
pub struct InMemoryAsyncStateService {
  values: Mutex<HashMap<StateKey, StateValue>>,
  staged: Mutex<Option<Vec<StateEntry>>>,
  round_trips: AtomicUsize,
  commits: AtomicUsize,
}

impl InMemoryAsyncStateService {
  pub fn new() -> Self {
    Self { values: Mutex::new(HashMap::new()),
           staged: Mutex::new(None),
           round_trips: AtomicUsize::new(0),
           commits: AtomicUsize::new(0) }
  }

  /// Crea el store con valores ya confirmados.
  pub fn with_values(values: impl IntoIterator<Item = (StateKey, StateValue)>) -> Self {
    let store = Self::new();
    if let Ok(mut map) = store.values.lock() {
      map.extend(values);
    }
    store
  }

  pub fn round_trips(&self) -> usize {
    self.round_trips.load(Ordering::SeqCst)
  }

  pub fn commits(&self) -> usize {
    self.commits.load(Ordering::SeqCst)
  }

  pub fn len(&self) -> usize {
    self.values.lock().map(|m| m.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Default for InMemoryAsyncStateService {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl AsyncStateService for InMemoryAsyncStateService {
  async fn open_transaction(&self) -> Result<()> {
    let mut staged = lock(&self.staged, "staged")?;
    // una transacción que no llegó a `commit` se descarta entera
    if let Some(stale) = staged.replace(Vec::new()) {
      log::warn!("[state] transacción sin commit descartada ({} entradas)", stale.len());
    }
    Ok(())
  }

  async fn commit(&self) -> Result<()> {
    let entries = lock(&self.staged, "staged")?.take()
                                               .ok_or_else(|| CacheError::Store("commit sin transacción".into()))?;
    let mut values = lock(&self.values, "values")?;
    for entry in entries {
      match entry.value {
        Some(v) => values.insert(entry.key, v),
        None => values.remove(&entry.key),
      };
    }
    self.commits.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn write_states(&self, entries: Vec<StateEntry>) -> Result<()> {
    let mut staged = lock(&self.staged, "staged")?;
    match staged.as_mut() {
      Some(buffer) => {
        buffer.extend(entries);
        Ok(())
      }
      None => Err(CacheError::Store("write_states sin transacción abierta".into())),
    }
  }

  async fn get_many(&self, keys: &[StateKey]) -> Result<Vec<StateEntry>> {
    self.round_trips.fetch_add(1, Ordering::SeqCst);
    let values = lock(&self.values, "values")?;
    Ok(keys.iter()
           .map(|k| StateEntry { key: k.clone(), value: values.get(k).cloned() })
           .collect())
  }
}
