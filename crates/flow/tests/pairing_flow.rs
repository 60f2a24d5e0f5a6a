use async_trait::async_trait;
use flow::stubs::{DoubleBigTask, DoubleTask, ScaleParams, ScaledProductTask};
use flow::{map_reduce, mapping, FlowEngine, FlowEngineConfig, FlowError, FlowTaskWorker, LocalTaskQueue,
           LocalTaskQueueConfig, PairingInput, PairingMapReduceFlow, TaskExecutor, TaskPayload, TaskQueue};
use std::sync::Arc;
use std::time::Duration;

type ScaledFlow = PairingMapReduceFlow<DoubleTask, DoubleBigTask, ScaledProductTask, ScaleParams>;

const QUEUE: &str = "pairing";

fn worker() -> Arc<FlowTaskWorker> {
  let mut tasks = vec![mapping(Arc::new(DoubleTask)), mapping(Arc::new(DoubleBigTask))];
  tasks.extend(map_reduce(Arc::new(ScaledProductTask)));
  FlowTaskWorker::new(tasks).expect("worker")
}

fn scaled_flow(engine: Arc<FlowEngine>) -> ScaledFlow {
  PairingMapReduceFlow::new(engine,
                            QUEUE,
                            Arc::new(DoubleTask),
                            Arc::new(DoubleBigTask),
                            Arc::new(ScaledProductTask))
}

fn input(task_id: &str, x: i64, y: u128) -> PairingInput<i64, u128, ScaleParams> {
  PairingInput { task_id: task_id.to_string(), input1: x, input2: y, params: ScaleParams { scale: 2 } }
}

async fn setup(config: LocalTaskQueueConfig) -> (Arc<LocalTaskQueue>, Arc<FlowEngine>, Arc<FlowTaskWorker>) {
  let queue = Arc::new(LocalTaskQueue::new(config));
  let worker = worker();
  worker.start(queue.as_ref(), QUEUE).await.expect("start");
  let engine = FlowEngine::new(queue.clone(), FlowEngineConfig::default());
  (queue, engine, worker)
}

#[tokio::test]
async fn two_pairs_combine_through_the_reducing_task() {
  let (_queue, engine, worker) = setup(LocalTaskQueueConfig::default()).await;
  let flow = scaled_flow(Arc::clone(&engine));
  // (2*1)(2*2)*2 + (2*3)(2*4)*2 = 16 + 96
  let result = flow.execute("f-112", vec![input("a", 1, 2), input("b", 3, 4)]).await.expect("execute");
  assert_eq!(result, 112);
  worker.close().await.expect("close");
}

#[tokio::test]
async fn five_pairs_under_jitter() {
  for seed in 0..4 {
    let config = LocalTaskQueueConfig { simulated_duration: Duration::from_millis(1),
                                        latency_jitter: Duration::from_millis(6),
                                        seed };
    let (queue, engine, worker) = setup(config).await;
    let inputs = vec![input("t1", 1, 2), input("t2", 3, 4), input("t3", 5, 6), input("t4", 7, 8), input("t5", 9, 100)];
    let result = scaled_flow(engine).execute(format!("f-{}", seed), inputs).await.expect("execute");
    // 8 * (2 + 12 + 30 + 56 + 900)
    assert_eq!(result, 8000, "seed {}", seed);

    let history = queue.job_history();
    assert_eq!(history.iter().filter(|p| p.name == "scaled_product").count(), 5);
    assert_eq!(history.iter().filter(|p| p.name == "scaled_product_reduce").count(), 4);
    // los jobs de mapeo derivados conservan el task_id del par
    assert!(history.iter().filter(|p| p.name == "scaled_product").all(|p| p.task_id.is_some()));
    worker.close().await.expect("close");
  }
}

#[tokio::test]
async fn single_pair_short_circuits_the_reduction() {
  let (queue, engine, worker) = setup(LocalTaskQueueConfig::default()).await;
  let result = scaled_flow(engine).execute("f-one", vec![input("only", 1, 2)]).await.expect("execute");
  assert_eq!(result, 16);
  assert!(queue.job_history().iter().all(|p| !p.name.ends_with("_reduce")));
  worker.close().await.expect("close");
}

#[tokio::test]
async fn duplicate_task_ids_are_rejected_before_any_job() {
  let (queue, engine, worker) = setup(LocalTaskQueueConfig::default()).await;
  let err = scaled_flow(engine).execute("f-dup", vec![input("x", 1, 1), input("x", 2, 2)]).await.unwrap_err();
  assert!(matches!(err, FlowError::Validation(_)), "{:?}", err);
  assert!(queue.job_history().is_empty());
  worker.close().await.expect("close");
}

// Contesta como el worker real pero sin `task_id`.
struct ForgetfulExecutor(Arc<FlowTaskWorker>);

#[async_trait]
impl TaskExecutor for ForgetfulExecutor {
  async fn execute(&self, payload: TaskPayload) -> flow::Result<TaskPayload> {
    let mut done = self.0.execute(payload).await?;
    done.task_id = None;
    Ok(done)
  }
}

#[tokio::test]
async fn half_without_task_id_rejects_the_flow() {
  let queue = Arc::new(LocalTaskQueue::default());
  let handle = queue.create_worker(QUEUE, Arc::new(ForgetfulExecutor(worker()))).await.expect("worker");
  let engine = FlowEngine::new(queue.clone(), FlowEngineConfig::default());
  let err = scaled_flow(engine).execute("f-missing", vec![input("a", 1, 1), input("b", 2, 2)]).await.unwrap_err();
  assert!(matches!(err, FlowError::TaskIdMissing(ref name) if name == "double" || name == "double_big"),
          "{:?}",
          err);
  handle.close().await.expect("close");
}

// Contesta con un `task_id` que ningún par declaró.
struct StrangerExecutor(Arc<FlowTaskWorker>);

#[async_trait]
impl TaskExecutor for StrangerExecutor {
  async fn execute(&self, payload: TaskPayload) -> flow::Result<TaskPayload> {
    let done = self.0.execute(payload).await?;
    Ok(done.with_task_id("nobody"))
  }
}

#[tokio::test]
async fn half_with_foreign_task_id_rejects_the_flow() {
  let queue = Arc::new(LocalTaskQueue::default());
  let handle = queue.create_worker(QUEUE, Arc::new(StrangerExecutor(worker()))).await.expect("worker");
  let engine = FlowEngine::new(queue.clone(), FlowEngineConfig::default());
  let err = scaled_flow(engine).execute("f-stranger", vec![input("a", 1, 1)]).await.unwrap_err();
  assert!(matches!(err, FlowError::UnknownTaskId(ref id) if id == "nobody"), "{:?}", err);
  handle.close().await.expect("close");
}
