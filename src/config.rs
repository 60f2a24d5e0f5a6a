// Archivo: config.rs
// Propósito: configuración del binario de demo leída del entorno.
use std::error::Error;

/// Transporte de jobs elegido con `SEQUENCER_QUEUE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Local,
    Durable,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub queue: QueueKind,
    /// Altura del árbol de estado (`SEQUENCER_TREE_HEIGHT`).
    pub tree_height: u32,
    /// Transacciones por bloque simulado (`SEQUENCER_BATCH`).
    pub batch: usize,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        dotenvy::dotenv().ok();
        let queue = match std::env::var("SEQUENCER_QUEUE").unwrap_or_else(|_| "local".into()).trim() {
            "local" => QueueKind::Local,
            "durable" => QueueKind::Durable,
            other => return Err(format!("SEQUENCER_QUEUE inválido: {} (local|durable)", other).into()),
        };
        let tree_height = match std::env::var("SEQUENCER_TREE_HEIGHT") {
            Ok(v) => v.trim().parse::<u32>()?,
            Err(_) => 16,
        };
        let batch = match std::env::var("SEQUENCER_BATCH") {
            Ok(v) => v.trim().parse::<usize>()?,
            Err(_) => 5,
        };
        if batch == 0 {
            return Err("SEQUENCER_BATCH debe ser >= 1".into());
        }
        Ok(Self { queue, tree_height, batch })
    }
}
