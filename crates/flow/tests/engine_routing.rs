use async_trait::async_trait;
use flow::stubs::SumTask;
use flow::{map_reduce, FlowEngine, FlowEngineConfig, FlowError, FlowTaskWorker, LocalTaskQueue,
           LocalTaskQueueConfig, MapReduceFlow, TaskExecutor, TaskPayload, TaskQueue};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn flows_sharing_a_queue_only_see_their_own_completions() {
  let queue = Arc::new(LocalTaskQueue::new(LocalTaskQueueConfig { simulated_duration: Duration::from_millis(1),
                                                                  latency_jitter: Duration::from_millis(5),
                                                                  seed: 11 }));
  let worker = FlowTaskWorker::new(map_reduce(Arc::new(SumTask))).expect("worker");
  worker.start(queue.as_ref(), "shared").await.expect("start");
  let engine = FlowEngine::new(queue.clone(), FlowEngineConfig::default());

  let small = MapReduceFlow::new(Arc::clone(&engine), "shared", Arc::new(SumTask));
  let large = MapReduceFlow::new(Arc::clone(&engine), "shared", Arc::new(SumTask));
  let (a, b) = tokio::join!(small.execute("small", vec![1, 2, 3]), large.execute("large", vec![100, 200, 300, 400]));
  assert_eq!(a.expect("small"), 6);
  assert_eq!(b.expect("large"), 1000);

  let history = queue.job_history();
  assert!(history.iter().any(|p| p.flow_id == "small"));
  assert!(history.iter().any(|p| p.flow_id == "large"));
  assert!(engine.open_queues().await.is_empty());
  worker.close().await.expect("close");
}

#[tokio::test]
async fn push_before_open_fails() {
  let engine = FlowEngine::new(Arc::new(LocalTaskQueue::default()), FlowEngineConfig::default());
  let flow = engine.create_flow("f", ());
  let err = flow.push_task("never-opened", TaskPayload::new("sum", "1", "f")).await.unwrap_err();
  assert!(matches!(err, FlowError::QueueNotInitialized(ref q) if q == "never-opened"), "{:?}", err);
  flow.close().await.expect("close");
}

#[tokio::test]
async fn open_queue_is_idempotent_and_ref_counted() {
  let engine = FlowEngine::new(Arc::new(LocalTaskQueue::default()), FlowEngineConfig::default());
  let mut first = engine.create_flow("one", ());
  let mut second = engine.create_flow("two", ());
  first.open_queue("q").await.expect("open");
  first.open_queue("q").await.expect("reopen");
  second.open_queue("q").await.expect("open");
  assert_eq!(engine.open_queues().await, vec!["q".to_string()]);

  first.close().await.expect("close one");
  assert_eq!(engine.open_queues().await, vec!["q".to_string()]);
  second.close().await.expect("close two");
  assert!(engine.open_queues().await.is_empty());
}

// Contesta con un nombre que ningún flujo espera.
struct RenamingExecutor;

#[async_trait]
impl TaskExecutor for RenamingExecutor {
  async fn execute(&self, payload: TaskPayload) -> flow::Result<TaskPayload> {
    let mut done = payload.answer(payload.payload.clone());
    done.name = "mystery".to_string();
    Ok(done)
  }
}

#[tokio::test]
async fn unknown_completion_name_rejects_the_flow() {
  let queue = Arc::new(LocalTaskQueue::default());
  let handle = queue.create_worker("odd", Arc::new(RenamingExecutor)).await.expect("worker");
  let engine = FlowEngine::new(queue.clone(), FlowEngineConfig::default());
  let err = MapReduceFlow::new(engine, "odd", Arc::new(SumTask)).execute("f", vec![1, 2]).await.unwrap_err();
  assert!(matches!(err, FlowError::UnknownTaskTag(ref name) if name == "mystery"), "{:?}", err);
  handle.close().await.expect("close");
}

#[tokio::test]
async fn completion_timeout_surfaces_as_transport_error() {
  // sin worker: ningún job termina
  let config = FlowEngineConfig { completion_timeout: Some(Duration::from_millis(30)) };
  let engine = FlowEngine::new(Arc::new(LocalTaskQueue::default()), config);
  let err = MapReduceFlow::new(Arc::clone(&engine), "idle", Arc::new(SumTask)).execute("f", vec![1, 2])
                                                                               .await
                                                                               .unwrap_err();
  assert!(matches!(err, FlowError::Transport(_)), "{:?}", err);
  assert!(engine.open_queues().await.is_empty());
}

#[tokio::test]
async fn duplicate_task_names_are_rejected_by_the_worker() {
  let mut tasks = map_reduce(Arc::new(SumTask));
  tasks.extend(map_reduce(Arc::new(SumTask)));
  let err = FlowTaskWorker::new(tasks).err().expect("duplicado");
  assert!(matches!(err, FlowError::Validation(_)));
}

#[tokio::test]
async fn dropped_flow_gives_back_its_queue() {
  let engine = FlowEngine::new(Arc::new(LocalTaskQueue::default()), FlowEngineConfig::default());
  let mut abandoned = engine.create_flow("abandoned", ());
  abandoned.open_queue("q").await.expect("open");
  drop(abandoned);

  // el handle se cierra en la tarea que lanza el drop
  for _ in 0..50 {
    if engine.open_queues().await.is_empty() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  assert!(engine.open_queues().await.is_empty());
}

#[tokio::test]
async fn idle_queue_is_closed_by_the_next_acquire() {
  let engine = FlowEngine::new(Arc::new(LocalTaskQueue::default()), FlowEngineConfig::default());
  let mut abandoned = engine.create_flow("abandoned", ());
  abandoned.open_queue("old").await.expect("open");
  // fuera de cualquier runtime el drop sólo retira la ruta
  std::thread::spawn(move || drop(abandoned)).join().expect("drop");
  assert_eq!(engine.open_queues().await, vec!["old".to_string()]);

  let mut fresh = engine.create_flow("fresh", ());
  fresh.open_queue("new").await.expect("open");
  assert_eq!(engine.open_queues().await, vec!["new".to_string()]);
  fresh.close().await.expect("close");
  assert!(engine.open_queues().await.is_empty());
}
