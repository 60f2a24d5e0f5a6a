use flow::FlowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueStoreError {
  #[error("pool: {0}")]
  Pool(#[from] r2d2::Error),
  #[error("db: {0}")]
  Database(#[from] diesel::result::Error),
  #[error("migraciones: {0}")]
  Migration(String),
  #[error("serialización: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("configuración: {0}")]
  Config(String),
  #[error("tarea bloqueante: {0}")]
  Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, QueueStoreError>;

/// Para el planificador todo fallo de la cola durable es de transporte.
impl From<QueueStoreError> for FlowError {
  fn from(e: QueueStoreError) -> Self {
    FlowError::Transport(e.to_string())
  }
}
