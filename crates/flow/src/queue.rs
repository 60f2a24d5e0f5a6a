// Archivo: queue.rs
// Propósito: definir el mensaje que viaja por la cola (`TaskPayload`) y el
// contrato del transporte (`TaskQueue`, `InstantiatedQueue`, `TaskExecutor`).
// Las implementaciones concretas viven en `local_queue` (en proceso) y en el
// crate `queue-persistence` (durable).
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Estado con el que un worker contesta un job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Success,
    Error,
}

/// Mensaje de la cola.
///
/// `payload` es a su vez un string JSON producido por el serializador de la
/// propia tarea (doble codificación: el framing del transporte no conoce el
/// esquema de cada tarea). `flow_id` multiplexa flujos sobre una misma cola
/// física y `task_id` correlaciona las dos mitades de un emparejamiento.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub name: String,
    pub payload: String,
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl TaskPayload {
    pub fn new(name: impl Into<String>, payload: impl Into<String>, flow_id: impl Into<String>) -> Self {
        Self { name: name.into(),
               payload: payload.into(),
               flow_id: flow_id.into(),
               task_id: None,
               status: TaskStatus::Success }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Respuesta exitosa que conserva `name`, `flow_id` y `task_id`.
    pub fn answer(&self, payload: String) -> Self {
        Self { payload, status: TaskStatus::Success, ..self.clone() }
    }

    /// Respuesta de error; `payload` lleva el mensaje del fallo.
    pub fn failure(&self, reason: impl Into<String>) -> Self {
        Self { payload: reason.into(), status: TaskStatus::Error, ..self.clone() }
    }
}

/// Identificador asignado por el transporte a un job encolado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId {
    pub task_id: String,
}

/// Receptor de completados: cada job terminado de la cola se envía aquí con
/// la forma original de `TaskPayload`.
pub type CompletionListener = mpsc::UnboundedSender<TaskPayload>;

/// Lógica que un worker ejecuta por cada job. Un `Err` es un fallo sujeto a
/// la política de reintentos del transporte.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, payload: TaskPayload) -> Result<TaskPayload>;
}

/// Recurso con cierre explícito (workers, conexiones).
#[async_trait]
pub trait Closeable: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// Handle abierto sobre una cola con nombre.
#[async_trait]
pub trait InstantiatedQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn add_task(&self, payload: TaskPayload) -> Result<JobId>;

    /// Registra un listener que recibe cada job completado de esta cola.
    /// Los eventos son globales por nombre de cola: filtrar por `flow_id`
    /// es tarea de quien escucha.
    async fn on_completed(&self, listener: CompletionListener) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Transporte sobre colas de jobs con nombre.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn get_queue(&self, name: &str) -> Result<Arc<dyn InstantiatedQueue>>;

    async fn create_worker(&self, name: &str, executor: Arc<dyn TaskExecutor>) -> Result<Box<dyn Closeable>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_camel_case_and_skips_missing_task_id() {
        let p = TaskPayload::new("sum", "1", "flow-1");
        let json = serde_json::to_value(&p).expect("serialize");
        assert_eq!(json, serde_json::json!({"name": "sum", "payload": "1", "flowId": "flow-1", "status": "success"}));

        let parsed: TaskPayload =
            serde_json::from_str(r#"{"name":"a","payload":"2","flowId":"f","taskId":"t"}"#).expect("deserialize");
        assert_eq!(parsed.task_id.as_deref(), Some("t"));
        assert_eq!(parsed.status, TaskStatus::Success);
    }

    #[test]
    fn failure_keeps_correlation_ids() {
        let p = TaskPayload::new("a", "2", "f").with_task_id("t1");
        let f = p.failure("boom");
        assert_eq!(f.status, TaskStatus::Error);
        assert_eq!(f.payload, "boom");
        assert_eq!(f.task_id.as_deref(), Some("t1"));
        assert_eq!(f.flow_id, "f");
    }
}
