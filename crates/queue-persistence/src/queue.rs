// `TaskQueue` durable sobre SQLite: los jobs sobreviven a reinicios del
// proceso y cada job fallido se reintenta hasta `retry_attempts` veces.
use crate::config::DurableQueueConfig;
use crate::errors::Result;
use crate::store::{JobRow, JobStore, Settled};
use async_trait::async_trait;
use flow::{Closeable, CompletionListener, InstantiatedQueue, JobId, TaskExecutor, TaskPayload, TaskQueue};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Cola durable respaldada por Diesel + SQLite.
#[derive(Clone)]
pub struct DieselTaskQueue {
  store: Arc<JobStore>,
  config: DurableQueueConfig,
}

impl DieselTaskQueue {
  /// Abre la base de datos y aplica las migraciones pendientes.
  pub fn new(config: DurableQueueConfig) -> Result<Self> {
    let store = JobStore::open(&config)?;
    log::info!("[queue-db] cola durable en {}", config.database_url);
    Ok(Self { store: Arc::new(store), config })
  }

  pub fn config(&self) -> &DurableQueueConfig {
    &self.config
  }

  /// Estado e intentos de un job (`waiting`, `active`, `completed`,
  /// `failed`).
  pub async fn job_status(&self, job_id: &str) -> Result<Option<(String, i32)>> {
    let store = Arc::clone(&self.store);
    let id = job_id.to_string();
    let row = tokio::task::spawn_blocking(move || store.job(&id)).await??;
    Ok(row.map(|r| (r.status, r.attempts)))
  }
}

async fn blocking<T, F>(store: &Arc<JobStore>, f: F) -> Result<T>
  where T: Send + 'static,
        F: FnOnce(&JobStore) -> Result<T> + Send + 'static
{
  let store = Arc::clone(store);
  tokio::task::spawn_blocking(move || f(&store)).await?
}

#[async_trait]
impl TaskQueue for DieselTaskQueue {
  async fn get_queue(&self, name: &str) -> flow::Result<Arc<dyn InstantiatedQueue>> {
    Ok(Arc::new(DieselInstantiatedQueue { name: name.to_string(),
                                          store: Arc::clone(&self.store),
                                          config: self.config.clone(),
                                          closed: Arc::new(AtomicBool::new(false)),
                                          pollers: Mutex::new(Vec::new()) }))
  }

  async fn create_worker(&self, name: &str, executor: Arc<dyn TaskExecutor>) -> flow::Result<Box<dyn Closeable>> {
    let stop = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(work_loop(Arc::clone(&self.store),
                                        name.to_string(),
                                        executor,
                                        self.config.clone(),
                                        Arc::clone(&stop)));
    Ok(Box::new(DieselWorker { stop, handle: Mutex::new(Some(handle)) }))
  }
}

async fn work_loop(store: Arc<JobStore>,
                   queue_name: String,
                   executor: Arc<dyn TaskExecutor>,
                   config: DurableQueueConfig,
                   stop: Arc<AtomicBool>) {
  while !stop.load(Ordering::SeqCst) {
    let name = queue_name.clone();
    let lease = config.lease;
    let job = match blocking(&store, move |s| s.claim_next(&name, lease)).await {
      Ok(Some(job)) => job,
      Ok(None) => {
        tokio::time::sleep(config.poll_interval).await;
        continue;
      }
      Err(e) => {
        log::warn!("[queue-db] {}: error reclamando job: {}", queue_name, e);
        tokio::time::sleep(config.poll_interval).await;
        continue;
      }
    };
    // cada intento en su propia tarea: un pánico del executor no tumba el worker
    let attempt = job.clone();
    let run = tokio::spawn(run_job(Arc::clone(&store), Arc::clone(&executor), job, config.lease));
    if let Err(e) = run.await {
      log::warn!("[queue-db] {}: job {} abortado: {}", queue_name, attempt.id, e);
      settle_failure(&store, attempt, format!("el worker abortó el job: {}", e)).await;
    }
  }
  log::debug!("[queue-db] worker de {} detenido", queue_name);
}

async fn run_job(store: Arc<JobStore>, executor: Arc<dyn TaskExecutor>, job: JobRow, lease: Duration) {
  let payload: TaskPayload = match serde_json::from_str(&job.payload) {
    Ok(payload) => payload,
    Err(e) => {
      settle_failure(&store, job, format!("payload ilegible: {}", e)).await;
      return;
    }
  };
  let outcome = with_lease(&store, &job, lease, executor.execute(payload.clone())).await;
  match outcome {
    Ok(done) => record_completion(&store, job, &done).await,
    Err(e) => settle_failure(&store, job, e.to_string()).await,
  }
}

/// Ejecuta `work` renovando el lease de `job` a mitad de plazo.
async fn with_lease<F: Future>(store: &Arc<JobStore>, job: &JobRow, lease: Duration, work: F) -> F::Output {
  tokio::pin!(work);
  let mut ticker = tokio::time::interval((lease / 2).max(Duration::from_millis(1)));
  ticker.tick().await;
  loop {
    tokio::select! {
      output = &mut work => return output,
      _ = ticker.tick() => {
        let attempt = job.clone();
        match blocking(store, move |s| s.renew_lease(&attempt, lease)).await {
          Ok(true) => {}
          Ok(false) => log::warn!("[queue-db] job {} perdió su lease durante la ejecución", job.id),
          Err(e) => log::warn!("[queue-db] no se pudo renovar el lease de {}: {}", job.id, e),
        }
      }
    }
  }
}

async fn record_completion(store: &Arc<JobStore>, job: JobRow, done: &TaskPayload) {
  let completed = match serde_json::to_string(done) {
    Ok(json) => json,
    Err(e) => {
      settle_failure(store, job, format!("resultado no serializable: {}", e)).await;
      return;
    }
  };
  let attempt = job.clone();
  match blocking(store, move |s| s.complete(&job, &completed)).await {
    Ok(true) => log::debug!("[queue-db] job {} ({}) completado", attempt.id, done.name),
    Ok(false) => log::warn!("[queue-db] job {} ya no pertenece a este intento, resultado descartado", attempt.id),
    Err(e) => {
      // sin evento publicado nadie vería el resultado: vuelve a la cola
      log::warn!("[queue-db] job {}: error registrando el completado: {}", attempt.id, e);
      requeue(store, attempt).await;
    }
  }
}

async fn requeue(store: &Arc<JobStore>, job: JobRow) {
  let id = job.id.clone();
  match blocking(store, move |s| s.requeue(&job)).await {
    Ok(true) => log::warn!("[queue-db] job {} devuelto a la cola", id),
    Ok(false) => log::debug!("[queue-db] job {} ya reclamado por otro intento", id),
    Err(e) => log::warn!("[queue-db] job {} queda a la espera de que venza su lease: {}", id, e),
  }
}

async fn settle_failure(store: &Arc<JobStore>, job: JobRow, reason: String) {
  let (id, attempt, max) = (job.id.clone(), job.attempts, job.max_attempts);
  let logged = reason.clone();
  match blocking(store, move |s| s.fail(&job, &reason)).await {
    Ok(Settled::Requeued) => {
      log::warn!("[queue-db] job {} falló (intento {}/{}), reintentando: {}", id, attempt, max, logged)
    }
    Ok(Settled::Failed) => log::warn!("[queue-db] job {} agotó {} intentos: {}", id, max, logged),
    Ok(Settled::LeaseLost) => log::debug!("[queue-db] fallo de {} ignorado: otro intento lo reclamó", id),
    Err(e) => log::warn!("[queue-db] job {} queda a la espera de que venza su lease: {}", id, e),
  }
}

/// Handle de una cola durable. Cada listener sondea `job_events` desde el
/// último evento existente al registrarse.
pub struct DieselInstantiatedQueue {
  name: String,
  store: Arc<JobStore>,
  config: DurableQueueConfig,
  closed: Arc<AtomicBool>,
  pollers: Mutex<Vec<JoinHandle<()>>>,
}

#[async_trait]
impl InstantiatedQueue for DieselInstantiatedQueue {
  fn name(&self) -> &str {
    &self.name
  }

  async fn add_task(&self, payload: TaskPayload) -> flow::Result<JobId> {
    if payload.flow_id.is_empty() {
      return Err(flow::FlowError::Validation("payload sin flowId".into()));
    }
    let json = serde_json::to_string(&payload)?;
    let name = self.name.clone();
    let attempts = self.config.retry_attempts as i32;
    let task_id = blocking(&self.store, move |s| s.insert_job(&name, &json, attempts)).await?;
    log::debug!("[queue-db] {} <- {} (job {})", self.name, payload.name, task_id);
    Ok(JobId { task_id })
  }

  async fn on_completed(&self, listener: CompletionListener) -> flow::Result<()> {
    let name = self.name.clone();
    let start = blocking(&self.store, move |s| s.last_event_seq(&name)).await?;
    let handle = tokio::spawn(listen_loop(Arc::clone(&self.store),
                                          self.name.clone(),
                                          start,
                                          listener,
                                          self.config.poll_interval,
                                          Arc::clone(&self.closed)));
    self.pollers.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    Ok(())
  }

  async fn close(&self) -> flow::Result<()> {
    self.closed.store(true, Ordering::SeqCst);
    for handle in self.pollers.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
      handle.abort();
    }
    Ok(())
  }
}

async fn listen_loop(store: Arc<JobStore>,
                     queue_name: String,
                     mut seq: i32,
                     listener: CompletionListener,
                     poll: Duration,
                     closed: Arc<AtomicBool>) {
  while !closed.load(Ordering::SeqCst) {
    let name = queue_name.clone();
    match blocking(&store, move |s| s.events_after(&name, seq)).await {
      Ok(events) => {
        for event in events {
          seq = event.seq;
          match serde_json::from_str::<TaskPayload>(&event.payload) {
            Ok(payload) => {
              if listener.send(payload).is_err() {
                return;
              }
            }
            Err(e) => log::warn!("[queue-db] {}: evento {} ilegible: {}", queue_name, event.seq, e),
          }
        }
      }
      Err(e) => log::warn!("[queue-db] {}: error leyendo eventos: {}", queue_name, e),
    }
    tokio::time::sleep(poll).await;
  }
}

struct DieselWorker {
  stop: Arc<AtomicBool>,
  handle: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Closeable for DieselWorker {
  /// Deja de reclamar jobs; el job en curso, si lo hay, termina.
  async fn close(&self) -> flow::Result<()> {
    self.stop.store(true, Ordering::SeqCst);
    let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(handle) = handle {
      if let Err(e) = handle.await {
        log::warn!("[queue-db] worker terminó con error: {}", e);
      }
    }
    Ok(())
  }
}
