// cached_state.rs
use crate::errors::{lock, CacheError, Result};
use crate::state::{AsyncStateService, StateEntry, StateKey, StateValue};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Capa copy-on-write sobre un `AsyncStateService`.
///
/// Mantiene dos mapas locales: lo precargado del padre (incluidas las
/// ausencias) y lo escrito localmente (`None` es un borrado). Un borrado
/// local nunca se enmascara leyendo del padre. Como también implementa
/// `AsyncStateService`, varias cachés se encadenan: cada una hace de padre
/// de la siguiente.
///
/// Un único escritor por padre: dos cachés hermanas que hagan merge sobre
/// el mismo padre se pisan (último en escribir gana).
pub struct CachedStateService {
  parent: Option<Arc<dyn AsyncStateService>>,
  preloaded: Mutex<HashMap<StateKey, Option<StateValue>>>,
  written: Mutex<IndexMap<StateKey, Option<StateValue>>>,
}

impl CachedStateService {
  pub fn new(parent: Option<Arc<dyn AsyncStateService>>) -> Self {
    Self { parent, preloaded: Mutex::new(HashMap::new()), written: Mutex::new(IndexMap::new()) }
  }

  /// Valor local de `key`: `Some(v)` si esta capa lo conoce (`v` puede ser
  /// un borrado), `None` si hay que preguntar al padre.
  fn local(&self, key: &[u8]) -> Result<Option<Option<StateValue>>> {
    if let Some(v) = lock(&self.written, "written")?.get(key) {
      return Ok(Some(v.clone()));
    }
    Ok(lock(&self.preloaded, "preloaded")?.get(key).cloned())
  }

  pub async fn get(&self, key: &[u8]) -> Result<Option<StateValue>> {
    if let Some(v) = self.local(key)? {
      return Ok(v);
    }
    match &self.parent {
      Some(parent) => parent.get(key).await,
      None => Ok(None),
    }
  }

  /// `None` borra la clave en esta capa.
  pub fn set(&self, key: impl Into<StateKey>, value: Option<StateValue>) -> Result<()> {
    lock(&self.written, "written")?.insert(key.into(), value);
    Ok(())
  }

  /// Trae del padre, en un solo `get_many`, las claves que esta capa aún no
  /// conoce. Las ya conocidas (precargadas o escritas) no se vuelven a
  /// pedir.
  pub async fn preload_keys(&self, keys: &[StateKey]) -> Result<()> {
    let mut missing: Vec<StateKey> = Vec::new();
    for key in keys {
      if self.local(key)?.is_none() && !missing.contains(key) {
        missing.push(key.clone());
      }
    }
    if missing.is_empty() {
      return Ok(());
    }
    let entries = match &self.parent {
      Some(parent) => parent.get_many(&missing).await?,
      None => missing.into_iter().map(|k| StateEntry { key: k, value: None }).collect(),
    };
    log::debug!("[state-cache] precargadas {} claves", entries.len());
    let written = lock(&self.written, "written")?;
    let mut preloaded = lock(&self.preloaded, "preloaded")?;
    for entry in entries {
      // una escritura local durante el viaje tiene prioridad
      if !written.contains_key(&entry.key) {
        preloaded.entry(entry.key).or_insert(entry.value);
      }
    }
    Ok(())
  }

  pub async fn preload_key(&self, key: &[u8]) -> Result<()> {
    self.preload_keys(&[key.to_vec()]).await
  }

  /// Escribe en el padre, en una transacción, todo lo escrito localmente
  /// (borrados incluidos) en orden de inserción, y vacía esta capa.
  pub async fn merge_into_parent(&self) -> Result<()> {
    let parent = self.parent.as_ref().ok_or(CacheError::ParentUndefined)?;
    let entries: Vec<StateEntry> = lock(&self.written, "written")?
      .iter()
      .map(|(k, v)| StateEntry { key: k.clone(), value: v.clone() })
      .collect();
    parent.open_transaction().await?;
    parent.write_states(entries.clone()).await?;
    parent.commit().await?;
    {
      let mut written = lock(&self.written, "written")?;
      for entry in &entries {
        if written.get(&entry.key) == Some(&entry.value) {
          written.shift_remove(&entry.key);
        }
      }
    }
    lock(&self.preloaded, "preloaded")?.clear();
    log::info!("[state-cache] merge de {} claves al padre", entries.len());
    Ok(())
  }

  /// Número de claves escritas localmente pendientes de merge.
  pub fn pending_writes(&self) -> usize {
    self.written.lock().map(|w| w.len()).unwrap_or(0)
  }
}

#[async_trait]
impl AsyncStateService for CachedStateService {
  async fn open_transaction(&self) -> Result<()> {
    Ok(())
  }

  async fn commit(&self) -> Result<()> {
    Ok(())
  }

  async fn write_states(&self, entries: Vec<StateEntry>) -> Result<()> {
    let mut written = lock(&self.written, "written")?;
    for entry in entries {
      written.insert(entry.key, entry.value);
    }
    Ok(())
  }

  async fn get_many(&self, keys: &[StateKey]) -> Result<Vec<StateEntry>> {
    let mut found: Vec<Option<Option<StateValue>>> = Vec::with_capacity(keys.len());
    let mut misses: Vec<StateKey> = Vec::new();
    for key in keys {
      let local = self.local(key)?;
      if local.is_none() {
        misses.push(key.clone());
      }
      found.push(local);
    }
    let mut fetched: HashMap<StateKey, Option<StateValue>> = HashMap::new();
    if !misses.is_empty() {
      if let Some(parent) = &self.parent {
        for entry in parent.get_many(&misses).await? {
          fetched.insert(entry.key, entry.value);
        }
      }
    }
    Ok(keys.iter()
           .zip(found)
           .map(|(key, local)| {
             let value = match local {
               Some(v) => v,
               None => fetched.get(key).cloned().flatten(),
             };
             StateEntry { key: key.clone(), value }
           })
           .collect())
  }

  async fn get(&self, key: &[u8]) -> Result<Option<StateValue>> {
    CachedStateService::get(self, key).await
  }
}
