// Archivo: local_queue.rs
// Propósito: cola en proceso con latencia simulada. Ejecuta el worker
// registrado tras un retardo artificial; pensada para pruebas deterministas
// y demos sin broker real. No es durable ni reintenta.
use crate::errors::{FlowError, Result};
use crate::queue::{Closeable, CompletionListener, InstantiatedQueue, JobId, TaskExecutor, TaskPayload, TaskQueue};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Configuración de la cola local.
///
/// Cada job termina tras `simulated_duration`. Si `latency_jitter` es mayor
/// que cero se suma un retardo extra derivado de `blake3(seed, secuencia)`,
/// lo que permuta el orden de completado de forma reproducible.
#[derive(Debug, Clone)]
pub struct LocalTaskQueueConfig {
    pub simulated_duration: Duration,
    pub latency_jitter: Duration,
    pub seed: u64,
}

impl Default for LocalTaskQueueConfig {
    fn default() -> Self {
        Self { simulated_duration: Duration::from_millis(5),
               latency_jitter: Duration::ZERO,
               seed: 0 }
    }
}

impl LocalTaskQueueConfig {
    /// Lee `LOCAL_QUEUE_SIMULATED_MS`, `LOCAL_QUEUE_JITTER_MS` y
    /// `LOCAL_QUEUE_SEED` (con `.env` si existe). Valores ausentes o
    /// inválidos caen en los defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        let ms = |var: &str, default: Duration| {
            std::env::var(var).ok()
                              .and_then(|v| v.trim().parse::<u64>().ok())
                              .map(Duration::from_millis)
                              .unwrap_or(default)
        };
        Self { simulated_duration: ms("LOCAL_QUEUE_SIMULATED_MS", defaults.simulated_duration),
               latency_jitter: ms("LOCAL_QUEUE_JITTER_MS", defaults.latency_jitter),
               seed: std::env::var("LOCAL_QUEUE_SEED").ok()
                                                      .and_then(|v| v.trim().parse().ok())
                                                      .unwrap_or(defaults.seed) }
    }

    fn delay_for(&self, sequence: u64) -> Duration {
        let jitter_us = self.latency_jitter.as_micros() as u64;
        if jitter_us == 0 {
            return self.simulated_duration;
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(&sequence.to_le_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        let extra = u64::from_le_bytes(head) % (jitter_us + 1);
        self.simulated_duration + Duration::from_micros(extra)
    }
}

struct Shared {
    config: LocalTaskQueueConfig,
    sequence: AtomicU64,
    next_handle: AtomicU64,
    workers: DashMap<String, Arc<dyn TaskExecutor>>,
    pending: Mutex<HashMap<String, VecDeque<TaskPayload>>>,
    listeners: DashMap<String, Vec<(u64, CompletionListener)>>,
    history: Mutex<Vec<TaskPayload>>,
}

impl Shared {
    fn lock<'a, T>(&'a self, m: &'a Mutex<T>) -> MutexGuard<'a, T> {
        m.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arranca todos los jobs pendientes de `name` si ya hay worker.
    fn work_next(self: &Arc<Self>, name: &str) {
        let executor = match self.workers.get(name) {
            Some(e) => e.value().clone(),
            None => return,
        };
        let jobs: Vec<TaskPayload> = match self.lock(&self.pending).get_mut(name) {
            Some(queue) => queue.drain(..).collect(),
            None => return,
        };
        for job in jobs {
            let delay = self.config.delay_for(self.sequence.fetch_add(1, Ordering::SeqCst));
            let shared = Arc::clone(self);
            let executor = executor.clone();
            let name = name.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let completed = match executor.execute(job.clone()).await {
                    Ok(done) => done,
                    Err(e) => {
                        log::warn!("[local-queue] job {} del flujo {} falló: {}", job.name, job.flow_id, e);
                        job.failure(e.to_string())
                    }
                };
                shared.publish(&name, completed);
            });
        }
    }

    fn publish(&self, name: &str, payload: TaskPayload) {
        match self.listeners.get(name) {
            Some(list) => {
                for (_, listener) in list.iter() {
                    let _ = listener.send(payload.clone());
                }
            }
            None => log::debug!("[local-queue] completado sin listeners en {}: {}", name, payload.name),
        }
    }
}

/// Cola en memoria con latencia simulada.
#[derive(Clone)]
pub struct LocalTaskQueue {
    shared: Arc<Shared>,
}

impl LocalTaskQueue {
    pub fn new(config: LocalTaskQueueConfig) -> Self {
        Self { shared: Arc::new(Shared { config,
                                         sequence: AtomicU64::new(0),
                                         next_handle: AtomicU64::new(0),
                                         workers: DashMap::new(),
                                         pending: Mutex::new(HashMap::new()),
                                         listeners: DashMap::new(),
                                         history: Mutex::new(Vec::new()) }) }
    }

    /// Jobs encolados hasta ahora, en orden de llegada.
    pub fn job_history(&self) -> Vec<TaskPayload> {
        self.shared.lock(&self.shared.history).clone()
    }
}

impl Default for LocalTaskQueue {
    fn default() -> Self {
        Self::new(LocalTaskQueueConfig::default())
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn get_queue(&self, name: &str) -> Result<Arc<dyn InstantiatedQueue>> {
        let handle_id = self.shared.next_handle.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(LocalInstantiatedQueue { name: name.to_string(),
                                             handle_id,
                                             shared: Arc::clone(&self.shared) }))
    }

    async fn create_worker(&self, name: &str, executor: Arc<dyn TaskExecutor>) -> Result<Box<dyn Closeable>> {
        if self.shared.workers.insert(name.to_string(), executor).is_some() {
            log::warn!("[local-queue] worker de {} reemplazado", name);
        }
        self.shared.work_next(name);
        Ok(Box::new(LocalWorker { name: name.to_string(),
                                  shared: Arc::clone(&self.shared) }))
    }
}

/// Handle sobre una cola local. `close` sólo retira los listeners
/// registrados a través de este handle.
pub struct LocalInstantiatedQueue {
    name: String,
    handle_id: u64,
    shared: Arc<Shared>,
}

#[async_trait]
impl InstantiatedQueue for LocalInstantiatedQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add_task(&self, payload: TaskPayload) -> Result<JobId> {
        if payload.flow_id.is_empty() {
            return Err(FlowError::Validation("payload sin flowId".into()));
        }
        let task_id = Uuid::new_v4().to_string();
        log::debug!("[local-queue] {} <- {} (flujo {})", self.name, payload.name, payload.flow_id);
        self.shared.lock(&self.shared.history).push(payload.clone());
        self.shared
            .lock(&self.shared.pending)
            .entry(self.name.clone())
            .or_default()
            .push_back(payload);
        self.shared.work_next(&self.name);
        Ok(JobId { task_id })
    }

    async fn on_completed(&self, listener: CompletionListener) -> Result<()> {
        self.shared
            .listeners
            .entry(self.name.clone())
            .or_default()
            .push((self.handle_id, listener));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut list) = self.shared.listeners.get_mut(&self.name) {
            list.retain(|(id, _)| *id != self.handle_id);
        }
        Ok(())
    }
}

struct LocalWorker {
    name: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl Closeable for LocalWorker {
    async fn close(&self) -> Result<()> {
        self.shared.workers.remove(&self.name);
        Ok(())
    }
}
