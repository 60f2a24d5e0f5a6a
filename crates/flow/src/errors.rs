// Archivo: errors.rs
// Propósito: definir los errores del planificador de flujos y el alias
// Result<T> usado por las APIs del crate.
use thiserror::Error;

/// Errores del planificador de flujos.
///
/// Cualquiera de estas variantes aborta el flujo en curso: el flujo nunca
/// devuelve resultados parciales y esta capa nunca reintenta tareas (los
/// reintentos son responsabilidad del transporte `TaskQueue`).
#[derive(Error, Debug)]
pub enum FlowError {
    /// Se llamó a una operación que requiere una cola abierta antes de que
    /// el flujo la abriera.
    #[error("Cola no inicializada: {0}")]
    QueueNotInitialized(String),

    /// Un payload completado trae un `name` que el flujo no escucha.
    #[error("Etiqueta de tarea desconocida: {0}")]
    UnknownTaskTag(String),

    /// Un payload de la fase de emparejamiento llegó sin `taskId`.
    #[error("Falta taskId en el payload de la tarea {0}")]
    TaskIdMissing(String),

    /// Un `taskId` que no pertenece a ninguna entrada del flujo.
    #[error("taskId desconocido: {0}")]
    UnknownTaskId(String),

    /// Los contadores de reducción llegaron a cero sin un único resultado.
    #[error("El flujo {flow_id} no termina: {pending} resultados pendientes sin reducción posible")]
    NonTermination { flow_id: String, pending: usize },

    /// Un worker reportó fallo (reintentos del transporte agotados).
    #[error("La tarea {name} falló: {reason}")]
    TaskFailed { name: String, reason: String },

    /// Errores de serialización/deserialización JSON de payloads.
    #[error("Error de serialización: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Fallos del transporte (broker, base de datos, timeouts).
    #[error("Error de transporte: {0}")]
    Transport(String),

    /// Entradas inválidas detectadas antes de enviar trabajo.
    #[error("Error de validación: {0}")]
    Validation(String),

    /// El canal de completados del flujo se cerró antes de terminar.
    #[error("Canal de completados cerrado para el flujo {0}")]
    ChannelClosed(String),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, FlowError>;
