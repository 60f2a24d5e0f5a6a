// Archivo: flow.rs
// Propósito: contexto explícito de un flujo. Sustituye al diccionario global
// `flowId -> estado`: cada flujo posee su estado, su canal de completados y
// los routers de las colas que abrió.
use crate::engine::FlowEngine;
use crate::errors::{FlowError, Result};
use crate::queue::{JobId, TaskPayload, TaskStatus};
use crate::router::QueueRouter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Una ejecución de un algoritmo de planificación identificada por
/// `flow_id`.
///
/// El estado `S` sólo se muta desde el bucle del propio flujo, que consume
/// los completados en orden de llegada; no hace falta ningún lock entre
/// flujos.
pub struct Flow<S> {
    flow_id: String,
    engine: Arc<FlowEngine>,
    queues: HashMap<String, Arc<QueueRouter>>,
    sender: mpsc::UnboundedSender<TaskPayload>,
    receiver: mpsc::UnboundedReceiver<TaskPayload>,
    timeout: Option<Duration>,
    closed: bool,
    pub state: S,
}

impl<S> Flow<S> {
    pub(crate) fn new(flow_id: String, engine: Arc<FlowEngine>, timeout: Option<Duration>, state: S) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { flow_id,
               engine,
               queues: HashMap::new(),
               sender,
               receiver,
               timeout,
               closed: false,
               state }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Abre (o reutiliza) la cola `name` y enruta sus completados de este
    /// flujo hacia `next_completion`. Idempotente.
    pub async fn open_queue(&mut self, name: &str) -> Result<()> {
        if self.queues.contains_key(name) {
            return Ok(());
        }
        let router = self.engine.acquire(name, &self.flow_id, self.sender.clone()).await?;
        self.queues.insert(name.to_string(), router);
        Ok(())
    }

    /// Encola `payload` en `queue_name`. Falla con `QueueNotInitialized` si
    /// el flujo no abrió esa cola.
    pub async fn push_task(&self, queue_name: &str, payload: TaskPayload) -> Result<JobId> {
        let router = self.queues
                         .get(queue_name)
                         .ok_or_else(|| FlowError::QueueNotInitialized(queue_name.to_string()))?;
        router.queue().add_task(payload).await
    }

    /// Siguiente completado de este flujo. Un payload con estado de error se
    /// convierte en `TaskFailed`.
    pub async fn next_completion(&mut self) -> Result<TaskPayload> {
        let received = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.receiver.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(FlowError::Transport(format!("sin completados para el flujo {} tras {:?}",
                                                            self.flow_id, limit)))
                }
            },
            None => self.receiver.recv().await,
        };
        let payload = received.ok_or_else(|| FlowError::ChannelClosed(self.flow_id.clone()))?;
        match payload.status {
            TaskStatus::Success => Ok(payload),
            TaskStatus::Error => Err(FlowError::TaskFailed { name: payload.name, reason: payload.payload }),
        }
    }

    /// Libera las colas del flujo. Los completados que lleguen después se
    /// descartan.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        let mut first_err = None;
        for (name, _) in self.queues.drain() {
            if let Err(e) = self.engine.release(&name, &self.flow_id).await {
                log::warn!("[flow] {}: error liberando la cola {}: {}", self.flow_id, name, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S> Drop for Flow<S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        for router in self.queues.values() {
            router.unregister(&self.flow_id);
        }
        // sin runtime el handle queda hasta la próxima barrida del motor
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let engine = Arc::clone(&self.engine);
            runtime.spawn(async move {
                if let Err(e) = engine.close_idle_queues().await {
                    log::warn!("[flow] no se pudieron cerrar colas sin flujos: {}", e);
                }
            });
        }
    }
}
