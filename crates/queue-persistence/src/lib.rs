//! Cola de tareas durable para el planificador `flow`.
//! Expone `DieselTaskQueue`, que implementa `flow::TaskQueue` sobre SQLite
//! con Diesel, y su configuración. El esquema vive en `schema` y las
//! migraciones se embeben desde `./migrations`.

mod config;
mod errors;
mod queue;
pub mod schema;
mod store;

pub use config::DurableQueueConfig;
pub use errors::{QueueStoreError, Result};
pub use queue::{DieselInstantiatedQueue, DieselTaskQueue};
pub use store::MIGRATIONS;

/// Construye la cola durable desde el entorno (`DurableQueueConfig::from_env`).
pub fn new_from_env() -> Result<DieselTaskQueue> {
  DieselTaskQueue::new(DurableQueueConfig::from_env()?)
}
