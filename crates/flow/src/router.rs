// Archivo: router.rs
// Propósito: único componente que enruta por string. Un `QueueRouter` por
// cola física registra un solo listener en el transporte y reparte cada
// completado al canal del flujo dueño según `flow_id`.
use crate::errors::Result;
use crate::queue::{InstantiatedQueue, TaskPayload};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Routes = Arc<DashMap<String, mpsc::UnboundedSender<TaskPayload>>>;

/// Enrutador de completados de una cola compartida por varios flujos.
///
/// Un flujo nunca observa payloads de otro. Los completados de flujos
/// desconocidos o ya cerrados se descartan (no se reintentan).
pub struct QueueRouter {
    queue: Arc<dyn InstantiatedQueue>,
    routes: Routes,
    dispatcher: JoinHandle<()>,
}

impl QueueRouter {
    /// Registra el listener en `queue` y arranca el despachador.
    pub async fn attach(queue: Arc<dyn InstantiatedQueue>) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<TaskPayload>();
        queue.on_completed(tx).await?;
        let routes: Routes = Arc::new(DashMap::new());
        let table = Arc::clone(&routes);
        let queue_name = queue.name().to_string();
        let dispatcher = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                match table.get(&payload.flow_id) {
                    Some(route) => {
                        if route.send(payload).is_err() {
                            log::debug!("[router] {}: flujo cerrado, completado descartado", queue_name);
                        }
                    }
                    None => log::debug!("[router] {}: completado de flujo ajeno {} descartado",
                                        queue_name, payload.flow_id),
                }
            }
        });
        Ok(Self { queue, routes, dispatcher })
    }

    pub fn queue(&self) -> &Arc<dyn InstantiatedQueue> {
        &self.queue
    }

    pub fn register(&self, flow_id: &str, sender: mpsc::UnboundedSender<TaskPayload>) {
        self.routes.insert(flow_id.to_string(), sender);
    }

    /// Retira la ruta de `flow_id` y devuelve cuántos flujos siguen usando
    /// la cola.
    pub fn unregister(&self, flow_id: &str) -> usize {
        self.routes.remove(flow_id);
        self.routes.len()
    }

    pub fn active_flows(&self) -> usize {
        self.routes.len()
    }

    /// Cierra el handle del transporte y detiene el despachador.
    pub async fn close(&self) -> Result<()> {
        self.routes.clear();
        self.dispatcher.abort();
        self.queue.close().await
    }
}
