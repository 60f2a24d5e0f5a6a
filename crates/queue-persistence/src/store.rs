// Operaciones Diesel síncronas sobre `jobs` y `job_events`. El lado async
// (`queue.rs`) las ejecuta en `spawn_blocking`.
//
// Un job reclamado queda `active` con un lease (`lease_until`). Sólo el
// dueño del intento en curso (mismo `attempts`) puede renovarlo, cerrarlo o
// devolverlo a la cola; un lease vencido vuelve a ser reclamable.
use crate::config::DurableQueueConfig;
use crate::errors::{QueueStoreError, Result};
use crate::schema::{job_events, jobs};
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use flow::TaskPayload;
use std::time::Duration;
use uuid::Uuid;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub(crate) const WAITING: &str = "waiting";
pub(crate) const ACTIVE: &str = "active";
pub(crate) const COMPLETED: &str = "completed";
pub(crate) const FAILED: &str = "failed";

const LEASE_EXPIRED: &str = "lease vencido: el worker no terminó el job";

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = jobs)]
pub(crate) struct JobRow {
  pub id: String,
  pub queue_name: String,
  pub payload: String,
  pub status: String,
  pub attempts: i32,
  pub max_attempts: i32,
  pub last_error: Option<String>,
  pub created_at: i64,
  pub updated_at: i64,
  pub lease_until: i64,
}

#[derive(Debug, Clone, Queryable)]
pub(crate) struct EventRow {
  pub seq: i32,
  pub payload: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = job_events)]
struct NewEvent<'a> {
  queue_name: &'a str,
  job_id: &'a str,
  payload: &'a str,
  status: &'a str,
  created_at: i64,
}

/// Resultado de registrar un intento fallido.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settled {
  /// Quedan intentos: el job vuelve a `waiting`.
  Requeued,
  /// Intentos agotados: se publicó el completado de error.
  Failed,
  /// Otro worker ya reclamó el job; este intento no cuenta.
  LeaseLost,
}

/// `busy_timeout` en cada conexión del pool: los claims concurrentes
/// esperan al lock en lugar de fallar con SQLITE_BUSY.
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
    diesel::sql_query("PRAGMA busy_timeout = 5000;").execute(conn)
                                                    .map_err(diesel::r2d2::Error::QueryError)?;
    Ok(())
  }
}

fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

fn lease_ms(lease: Duration) -> i64 {
  i64::try_from(lease.as_millis()).unwrap_or(i64::MAX)
}

/// Completado de error para `payload` (el JSON de un `TaskPayload`).
fn failure_event(payload: &str, reason: &str) -> std::result::Result<String, diesel::result::Error> {
  let parsed: TaskPayload =
    serde_json::from_str(payload).map_err(|e| diesel::result::Error::DeserializationError(Box::new(e)))?;
  serde_json::to_string(&parsed.failure(reason)).map_err(|e| diesel::result::Error::SerializationError(Box::new(e)))
}

/// Marca `job` como fallido y publica su completado de error.
fn mark_failed(conn: &mut SqliteConnection,
               job: &JobRow,
               reason: &str,
               now: i64)
               -> std::result::Result<(), diesel::result::Error> {
  let failure = failure_event(&job.payload, reason)?;
  diesel::update(jobs::table.find(&job.id)).set((jobs::status.eq(FAILED),
                                                 jobs::last_error.eq(reason),
                                                 jobs::lease_until.eq(0i64),
                                                 jobs::updated_at.eq(now)))
                                           .execute(conn)?;
  diesel::insert_into(job_events::table).values(&NewEvent { queue_name: &job.queue_name,
                                                            job_id: &job.id,
                                                            payload: &failure,
                                                            status: FAILED,
                                                            created_at: now })
                                        .execute(conn)?;
  Ok(())
}

/// Acceso a la base de datos de la cola.
pub(crate) struct JobStore {
  pool: DbPool,
}

impl JobStore {
  pub fn open(config: &DurableQueueConfig) -> Result<Self> {
    let manager = ConnectionManager::<SqliteConnection>::new(&config.database_url);
    let pool = Pool::builder().max_size(config.pool_size)
                              .connection_customizer(Box::new(SqlitePragmas))
                              .build(manager)?;
    let store = Self { pool };
    let mut conn = store.conn()?;
    if let Err(e) = diesel::sql_query("PRAGMA journal_mode = WAL;").execute(&mut conn) {
      log::debug!("[queue-db] WAL no disponible: {}", e);
    }
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| QueueStoreError::Migration(e.to_string()))?;
    Ok(store)
  }

  fn conn(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>> {
    Ok(self.pool.get()?)
  }

  pub fn insert_job(&self, queue_name: &str, payload: &str, max_attempts: i32) -> Result<String> {
    let mut conn = self.conn()?;
    let now = now_ms();
    let row = JobRow { id: Uuid::new_v4().to_string(),
                       queue_name: queue_name.to_string(),
                       payload: payload.to_string(),
                       status: WAITING.to_string(),
                       attempts: 0,
                       max_attempts,
                       last_error: None,
                       created_at: now,
                       updated_at: now,
                       lease_until: 0 };
    diesel::insert_into(jobs::table).values(&row).execute(&mut conn)?;
    Ok(row.id)
  }

  /// Reclama el job más antiguo de `queue_name` que esté en espera o cuyo
  /// lease haya vencido, lo marca activo con un lease nuevo y cuenta el
  /// intento. Los leases vencidos sin intentos restantes se dan por
  /// fallidos antes de elegir. La transacción inmediata impide que dos
  /// workers reclamen el mismo job.
  pub fn claim_next(&self, queue_name: &str, lease: Duration) -> Result<Option<JobRow>> {
    let mut conn = self.conn()?;
    let claimed = conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                        let now = now_ms();
                        let exhausted = jobs::table.filter(jobs::queue_name.eq(queue_name))
                                                   .filter(jobs::status.eq(ACTIVE))
                                                   .filter(jobs::lease_until.lt(now))
                                                   .filter(jobs::attempts.ge(jobs::max_attempts))
                                                   .load::<JobRow>(conn)?;
                        for job in &exhausted {
                          log::warn!("[queue-db] job {} perdió su lease sin intentos restantes", job.id);
                          mark_failed(conn, job, LEASE_EXPIRED, now)?;
                        }

                        let next = jobs::table.filter(jobs::queue_name.eq(queue_name))
                                              .filter(jobs::status
                                                        .eq(WAITING)
                                                        .or(jobs::status.eq(ACTIVE).and(jobs::lease_until.lt(now))))
                                              .order((jobs::created_at.asc(), jobs::id.asc()))
                                              .first::<JobRow>(conn)
                                              .optional()?;
                        let mut job = match next {
                          Some(job) => job,
                          None => return Ok(None),
                        };
                        if job.status == ACTIVE {
                          log::warn!("[queue-db] job {} reclamado tras vencer su lease (intento {})",
                                     job.id,
                                     job.attempts + 1);
                        }
                        job.attempts += 1;
                        job.status = ACTIVE.to_string();
                        job.updated_at = now;
                        job.lease_until = now.saturating_add(lease_ms(lease));
                        diesel::update(jobs::table.find(&job.id)).set((jobs::status.eq(ACTIVE),
                                                                       jobs::attempts.eq(job.attempts),
                                                                       jobs::lease_until.eq(job.lease_until),
                                                                       jobs::updated_at.eq(job.updated_at)))
                                                                 .execute(conn)?;
                        Ok(Some(job))
                      })?;
    Ok(claimed)
  }

  /// Extiende el lease del intento en curso. `false` si el job ya no
  /// pertenece a este intento.
  pub fn renew_lease(&self, job: &JobRow, lease: Duration) -> Result<bool> {
    let mut conn = self.conn()?;
    let now = now_ms();
    let updated = diesel::update(jobs::table.filter(jobs::id.eq(&job.id))
                                            .filter(jobs::status.eq(ACTIVE))
                                            .filter(jobs::attempts.eq(job.attempts)))
      .set((jobs::lease_until.eq(now.saturating_add(lease_ms(lease))), jobs::updated_at.eq(now)))
      .execute(&mut conn)?;
    Ok(updated == 1)
  }

  /// Marca el job completado y registra el completado en el log. `false`
  /// si el lease se perdió: otro intento publicará el resultado.
  pub fn complete(&self, job: &JobRow, completed: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let owned = conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                      let now = now_ms();
                      let updated = diesel::update(jobs::table.filter(jobs::id.eq(&job.id))
                                                              .filter(jobs::status.eq(ACTIVE))
                                                              .filter(jobs::attempts.eq(job.attempts)))
                        .set((jobs::status.eq(COMPLETED), jobs::lease_until.eq(0i64), jobs::updated_at.eq(now)))
                        .execute(conn)?;
                      if updated == 0 {
                        return Ok(false);
                      }
                      diesel::insert_into(job_events::table).values(&NewEvent { queue_name: &job.queue_name,
                                                                                job_id: &job.id,
                                                                                payload: completed,
                                                                                status: COMPLETED,
                                                                                created_at: now })
                                                            .execute(conn)?;
                      Ok(true)
                    })?;
    Ok(owned)
  }

  /// Registra un intento fallido: devuelve el job a la cola si le quedan
  /// intentos o lo cierra como fallido publicando el completado de error.
  pub fn fail(&self, job: &JobRow, reason: &str) -> Result<Settled> {
    let mut conn = self.conn()?;
    let settled = conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                        let now = now_ms();
                        let current = jobs::table.filter(jobs::id.eq(&job.id))
                                                 .filter(jobs::status.eq(ACTIVE))
                                                 .filter(jobs::attempts.eq(job.attempts))
                                                 .first::<JobRow>(conn)
                                                 .optional()?;
                        let current = match current {
                          Some(row) => row,
                          None => return Ok(Settled::LeaseLost),
                        };
                        if current.attempts < current.max_attempts {
                          diesel::update(jobs::table.find(&current.id)).set((jobs::status.eq(WAITING),
                                                                             jobs::last_error.eq(reason),
                                                                             jobs::lease_until.eq(0i64),
                                                                             jobs::updated_at.eq(now)))
                                                                       .execute(conn)?;
                          return Ok(Settled::Requeued);
                        }
                        mark_failed(conn, &current, reason, now)?;
                        Ok(Settled::Failed)
                      })?;
    Ok(settled)
  }

  /// Devuelve a la cola un intento que no pudo registrar su resultado, sin
  /// gastar otro intento. `false` si el job ya no pertenece a este intento.
  pub fn requeue(&self, job: &JobRow) -> Result<bool> {
    let mut conn = self.conn()?;
    let updated = diesel::update(jobs::table.filter(jobs::id.eq(&job.id))
                                            .filter(jobs::status.eq(ACTIVE))
                                            .filter(jobs::attempts.eq(job.attempts)))
      .set((jobs::status.eq(WAITING),
            jobs::attempts.eq(job.attempts - 1),
            jobs::lease_until.eq(0i64),
            jobs::updated_at.eq(now_ms())))
      .execute(&mut conn)?;
    Ok(updated == 1)
  }

  /// Último `seq` del log de `queue_name` (0 si está vacío).
  pub fn last_event_seq(&self, queue_name: &str) -> Result<i32> {
    let mut conn = self.conn()?;
    let max: Option<i32> = job_events::table.filter(job_events::queue_name.eq(queue_name))
                                            .select(diesel::dsl::max(job_events::seq))
                                            .first(&mut conn)?;
    Ok(max.unwrap_or(0))
  }

  pub fn events_after(&self, queue_name: &str, seq: i32) -> Result<Vec<EventRow>> {
    let mut conn = self.conn()?;
    Ok(job_events::table.filter(job_events::queue_name.eq(queue_name))
                        .filter(job_events::seq.gt(seq))
                        .order(job_events::seq.asc())
                        .select((job_events::seq, job_events::payload))
                        .load::<EventRow>(&mut conn)?)
  }

  pub fn job(&self, id: &str) -> Result<Option<JobRow>> {
    let mut conn = self.conn()?;
    Ok(jobs::table.find(id).first::<JobRow>(&mut conn).optional()?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flow::TaskStatus;

  fn store(tag: &str) -> JobStore {
    let path = std::env::temp_dir().join(format!("queue-store-{}-{}.db", tag, Uuid::new_v4()));
    JobStore::open(&DurableQueueConfig::new(path.to_string_lossy().to_string())).expect("open")
  }

  fn job_json() -> String {
    serde_json::to_string(&TaskPayload::new("sum", "5", "f")).expect("json")
  }

  #[test]
  fn expired_lease_is_reclaimed_as_a_new_attempt() {
    let store = store("reclaim");
    let id = store.insert_job("q", &job_json(), 3).expect("insert");
    let first = store.claim_next("q", Duration::from_millis(20)).expect("claim").expect("job");
    assert_eq!(first.attempts, 1);
    // lease vigente: nadie más lo reclama
    assert!(store.claim_next("q", Duration::from_millis(20)).expect("claim").is_none());

    std::thread::sleep(Duration::from_millis(40));
    let second = store.claim_next("q", Duration::from_secs(5)).expect("claim").expect("reclaimed");
    assert_eq!(second.id, id);
    assert_eq!(second.attempts, 2);

    // el dueño anterior ya no puede cerrar ni renovar el job
    assert!(!store.renew_lease(&first, Duration::from_secs(5)).expect("renew"));
    assert!(!store.complete(&first, "{}").expect("complete"));
    assert_eq!(store.fail(&first, "tarde").expect("fail"), Settled::LeaseLost);
    assert!(store.complete(&second, "{}").expect("complete"));
    assert_eq!(store.events_after("q", 0).expect("events").len(), 1);
  }

  #[test]
  fn expired_lease_without_attempts_left_fails_the_job() {
    let store = store("exhausted");
    let id = store.insert_job("q", &job_json(), 1).expect("insert");
    store.claim_next("q", Duration::from_millis(10)).expect("claim").expect("job");
    std::thread::sleep(Duration::from_millis(30));

    assert!(store.claim_next("q", Duration::from_millis(10)).expect("claim").is_none());
    let row = store.job(&id).expect("row").expect("exists");
    assert_eq!(row.status, FAILED);
    let events = store.events_after("q", 0).expect("events");
    assert_eq!(events.len(), 1);
    let published: TaskPayload = serde_json::from_str(&events[0].payload).expect("payload");
    assert_eq!(published.status, TaskStatus::Error);
    assert_eq!(published.flow_id, "f");
  }

  #[test]
  fn requeue_returns_the_attempt() {
    let store = store("requeue");
    let id = store.insert_job("q", &job_json(), 2).expect("insert");
    let job = store.claim_next("q", Duration::from_secs(5)).expect("claim").expect("job");
    assert!(store.requeue(&job).expect("requeue"));
    let row = store.job(&id).expect("row").expect("exists");
    assert_eq!((row.status.as_str(), row.attempts), (WAITING, 0));
  }
}
