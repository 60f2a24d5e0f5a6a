// Archivo: engine.rs
// Propósito: implementar el `FlowEngine`, dueño del transporte `TaskQueue`.
//
// El motor abre como mucho un handle físico por nombre de cola y lo
// comparte entre todos los flujos que lo usan (conteo de referencias a
// través del `QueueRouter`). Cuando el último flujo de una cola se cierra, el
// handle se cierra también. Un flujo abandonado sin `close` sólo retira su
// ruta; su handle se cierra en la siguiente barrida (`acquire`, `release` o la
// tarea que lanza el `Drop` del flujo).
use crate::errors::Result;
use crate::flow::Flow;
use crate::queue::{TaskPayload, TaskQueue};
use crate::router::QueueRouter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Configuración del motor.
#[derive(Debug, Clone, Default)]
pub struct FlowEngineConfig {
    /// Tiempo máximo de espera entre dos completados de un mismo flujo.
    /// `None` espera indefinidamente (el transporte decide los timeouts).
    pub completion_timeout: Option<Duration>,
}

/// Motor que crea flujos y multiplexa sus colas.
///
/// Responsabilidades:
/// - Abrir/reusar un `InstantiatedQueue` por nombre de cola
/// - Registrar cada flujo en el `QueueRouter` de sus colas
/// - Cerrar los handles cuando ningún flujo los usa
pub struct FlowEngine {
    queue: Arc<dyn TaskQueue>,
    config: FlowEngineConfig,
    routers: Mutex<HashMap<String, Arc<QueueRouter>>>,
}

impl FlowEngine {
    pub fn new(queue: Arc<dyn TaskQueue>, config: FlowEngineConfig) -> Arc<Self> {
        Arc::new(Self { queue, config, routers: Mutex::new(HashMap::new()) })
    }

    /// Genera un `flow_id` nuevo.
    pub fn new_flow_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Crea el contexto de un flujo. No abre colas todavía: el flujo las
    /// abre en su paso de arranque con `Flow::open_queue`.
    pub fn create_flow<S>(self: &Arc<Self>, flow_id: impl Into<String>, state: S) -> Flow<S> {
        Flow::new(flow_id.into(), Arc::clone(self), self.config.completion_timeout, state)
    }

    pub(crate) async fn acquire(&self,
                                queue_name: &str,
                                flow_id: &str,
                                sender: mpsc::UnboundedSender<TaskPayload>)
                                -> Result<Arc<QueueRouter>> {
        let mut routers = self.routers.lock().await;
        close_idle(&mut routers, Some(queue_name)).await?;
        let router = match routers.get(queue_name) {
            Some(router) => Arc::clone(router),
            None => {
                log::debug!("[engine] abriendo cola {}", queue_name);
                let handle = self.queue.get_queue(queue_name).await?;
                let router = Arc::new(QueueRouter::attach(handle).await?);
                routers.insert(queue_name.to_string(), Arc::clone(&router));
                router
            }
        };
        router.register(flow_id, sender);
        Ok(router)
    }

    pub(crate) async fn release(&self, queue_name: &str, flow_id: &str) -> Result<()> {
        let mut routers = self.routers.lock().await;
        let remaining = match routers.get(queue_name) {
            Some(router) => router.unregister(flow_id),
            None => return Ok(()),
        };
        if remaining == 0 {
            if let Some(router) = routers.remove(queue_name) {
                log::debug!("[engine] cerrando cola {}", queue_name);
                router.close().await?;
            }
        }
        close_idle(&mut routers, None).await
    }

    /// Cierra los handles que ya no tienen ningún flujo registrado.
    pub async fn close_idle_queues(&self) -> Result<()> {
        let mut routers = self.routers.lock().await;
        close_idle(&mut routers, None).await
    }

    /// Nombres de las colas con handle abierto.
    pub async fn open_queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routers.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Cierra todos los handles abiertos, haya o no flujos registrados.
    pub async fn close(&self) -> Result<()> {
        let routers: Vec<Arc<QueueRouter>> = self.routers.lock().await.drain().map(|(_, r)| r).collect();
        for router in routers {
            router.close().await?;
        }
        Ok(())
    }
}

async fn close_idle(routers: &mut HashMap<String, Arc<QueueRouter>>, keep: Option<&str>) -> Result<()> {
    let idle: Vec<String> = routers.iter()
                                   .filter(|(name, router)| Some(name.as_str()) != keep && router.active_flows() == 0)
                                   .map(|(name, _)| name.clone())
                                   .collect();
    for name in idle {
        if let Some(router) = routers.remove(&name) {
            log::debug!("[engine] cerrando cola {} sin flujos", name);
            router.close().await?;
        }
    }
    Ok(())
}
