use crate::errors::{QueueStoreError, Result};
use std::time::Duration;

/// Configuración de la cola durable.
#[derive(Debug, Clone)]
pub struct DurableQueueConfig {
  pub database_url: String,
  /// Intentos por job antes de darlo por fallido.
  pub retry_attempts: u32,
  /// Intervalo de sondeo de workers y listeners.
  pub poll_interval: Duration,
  pub pool_size: u32,
  /// Tiempo que un worker retiene un job reclamado sin renovarlo. Vencido
  /// el plazo, otro worker puede reclamarlo (cuenta como un intento más).
  pub lease: Duration,
}

impl DurableQueueConfig {
  pub fn new(database_url: impl Into<String>) -> Self {
    Self { database_url: database_url.into(),
           retry_attempts: 3,
           poll_interval: Duration::from_millis(50),
           pool_size: 4,
           lease: Duration::from_secs(30) }
  }

  /// Lee `QUEUE_DB_URL` (o `DATABASE_URL`), `QUEUE_RETRY_ATTEMPTS`,
  /// `QUEUE_POLL_INTERVAL_MS`, `QUEUE_POOL_SIZE` y `QUEUE_LEASE_MS`,
  /// cargando `.env` si existe.
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    let url = std::env::var("QUEUE_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                           .map_err(|_| QueueStoreError::Config("QUEUE_DB_URL / DATABASE_URL not set".into()))?;
    let url_l = url.to_lowercase();
    if url_l.starts_with("postgres") {
      return Err(QueueStoreError::Config("queue-persistence sólo soporta SQLite".into()));
    }
    let mut config = Self::new(url);
    if let Some(n) = parse_var::<u32>("QUEUE_RETRY_ATTEMPTS")? {
      if n == 0 {
        return Err(QueueStoreError::Config("QUEUE_RETRY_ATTEMPTS debe ser >= 1".into()));
      }
      config.retry_attempts = n;
    }
    if let Some(ms) = parse_var::<u64>("QUEUE_POLL_INTERVAL_MS")? {
      config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(n) = parse_var::<u32>("QUEUE_POOL_SIZE")? {
      config.pool_size = n.max(1);
    }
    if let Some(ms) = parse_var::<u64>("QUEUE_LEASE_MS")? {
      if ms == 0 {
        return Err(QueueStoreError::Config("QUEUE_LEASE_MS debe ser >= 1".into()));
      }
      config.lease = Duration::from_millis(ms);
    }
    Ok(config)
  }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
  match std::env::var(name) {
    Ok(raw) => raw.trim()
                  .parse::<T>()
                  .map(Some)
                  .map_err(|_| QueueStoreError::Config(format!("{} inválido: {:?}", name, raw))),
    Err(_) => Ok(None),
  }
}
