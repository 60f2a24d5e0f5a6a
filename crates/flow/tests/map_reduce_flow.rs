use async_trait::async_trait;
use flow::stubs::{NeverReducibleTask, ScaleParams, ScaledProductTask, SumTask};
use flow::{map_reduce, FlowEngine, FlowEngineConfig, FlowError, FlowTaskWorker, JsonSerializer, LocalTaskQueue,
           LocalTaskQueueConfig, MapReduceFlow, MapReduceTask, MappingTask, PairedInput, TaskSerializer};
use std::sync::Arc;
use std::time::Duration;

// Sólo reduce valores de la misma paridad.
struct ParityTask;

#[async_trait]
impl MappingTask for ParityTask {
  type Input = i64;
  type Output = i64;

  fn name(&self) -> &str {
    "parity"
  }

  fn input_serializer(&self) -> Box<dyn TaskSerializer<i64>> {
    Box::new(JsonSerializer::new())
  }

  fn result_serializer(&self) -> Box<dyn TaskSerializer<i64>> {
    Box::new(JsonSerializer::new())
  }

  async fn map(&self, input: i64) -> flow::Result<i64> {
    Ok(input)
  }
}

#[async_trait]
impl MapReduceTask for ParityTask {
  async fn reduce(&self, a: i64, b: i64) -> flow::Result<i64> {
    Ok(a + b)
  }

  fn reducible(&self, a: &i64, b: &i64) -> bool {
    a % 2 == b % 2
  }
}

// Falla al mapear valores negativos.
struct PickyTask;

#[async_trait]
impl MappingTask for PickyTask {
  type Input = i64;
  type Output = i64;

  fn name(&self) -> &str {
    "picky"
  }

  fn input_serializer(&self) -> Box<dyn TaskSerializer<i64>> {
    Box::new(JsonSerializer::new())
  }

  fn result_serializer(&self) -> Box<dyn TaskSerializer<i64>> {
    Box::new(JsonSerializer::new())
  }

  async fn map(&self, input: i64) -> flow::Result<i64> {
    if input < 0 {
      return Err(FlowError::Validation(format!("negativo: {}", input)));
    }
    Ok(input)
  }
}

#[async_trait]
impl MapReduceTask for PickyTask {
  async fn reduce(&self, a: i64, b: i64) -> flow::Result<i64> {
    Ok(a + b)
  }

  fn reducible(&self, _a: &i64, _b: &i64) -> bool {
    true
  }
}

/// Mapea cada entrada, reduce los pares reducibles y devuelve todas las
/// salidas producidas.
async fn produced_outputs<T>(task: &T, inputs: Vec<T::Input>) -> Vec<T::Output>
  where T: MapReduceTask,
        T::Output: Clone
{
  let mut outputs = Vec::new();
  for input in inputs {
    outputs.push(task.map(input).await.expect("map"));
  }
  let mapped = outputs.clone();
  for (i, a) in mapped.iter().enumerate() {
    for b in &mapped[i + 1..] {
      if task.reducible(a, b) {
        outputs.push(task.reduce(a.clone(), b.clone()).await.expect("reduce"));
      }
    }
  }
  outputs
}

fn assert_reducible_commutes<T: MapReduceTask>(task: &T, outputs: &[T::Output]) {
  for a in outputs {
    for b in outputs {
      assert_eq!(task.reducible(a, b), task.reducible(b, a), "{}", task.name());
    }
  }
}

fn jittered(seed: u64) -> Arc<LocalTaskQueue> {
  Arc::new(LocalTaskQueue::new(LocalTaskQueueConfig { simulated_duration: Duration::from_millis(1),
                                                      latency_jitter: Duration::from_millis(8),
                                                      seed }))
}

async fn run<T: MapReduceTask<Input = i64> + 'static>(queue: Arc<LocalTaskQueue>,
                                                       task: Arc<T>,
                                                       inputs: Vec<i64>)
                                                       -> flow::Result<T::Output> {
  let worker = FlowTaskWorker::new(map_reduce(Arc::clone(&task))).expect("worker");
  worker.start(queue.as_ref(), "mr").await.expect("start");
  let engine = FlowEngine::new(queue, FlowEngineConfig::default());
  let result = MapReduceFlow::new(Arc::clone(&engine), "mr", task).execute(FlowEngine::new_flow_id(), inputs).await;
  worker.close().await.expect("close worker");
  assert!(engine.open_queues().await.is_empty(), "el flujo debe liberar su cola");
  result
}

#[tokio::test]
async fn sum_is_independent_of_completion_order() {
  for seed in 0..6 {
    let queue = jittered(seed);
    let total = run(Arc::clone(&queue), Arc::new(SumTask), (1..=10).collect()).await.expect("sum");
    assert_eq!(total, 55, "seed {}", seed);

    let history = queue.job_history();
    let maps = history.iter().filter(|p| p.name == "sum").count();
    let reduces = history.iter().filter(|p| p.name == "sum_reduce").count();
    assert_eq!(maps, 10);
    assert_eq!(reduces, 9);
  }
}

#[tokio::test]
async fn partial_reducibility_still_reaches_one_result() {
  for seed in 0..6 {
    let total = run(jittered(seed), Arc::new(ParityTask), vec![1, 3, 2, 4]).await.expect("parity");
    assert_eq!(total, 10, "seed {}", seed);
  }
}

#[tokio::test]
async fn single_input_resolves_without_reduction() {
  let queue = Arc::new(LocalTaskQueue::default());
  let total = run(Arc::clone(&queue), Arc::new(SumTask), vec![42]).await.expect("single");
  assert_eq!(total, 42);
  assert!(queue.job_history().iter().all(|p| p.name == "sum"));
}

#[tokio::test]
async fn empty_input_is_non_termination() {
  let err = run(Arc::new(LocalTaskQueue::default()), Arc::new(SumTask), vec![]).await.unwrap_err();
  match err {
    FlowError::NonTermination { pending, .. } => assert_eq!(pending, 0),
    other => panic!("esperaba NonTermination, obtuve {:?}", other),
  }
}

#[tokio::test]
async fn never_reducible_task_does_not_terminate() {
  let err = run(Arc::new(LocalTaskQueue::default()), Arc::new(NeverReducibleTask), vec![1, 2, 3]).await
                                                                                                .unwrap_err();
  match err {
    FlowError::NonTermination { pending, .. } => assert_eq!(pending, 3),
    other => panic!("esperaba NonTermination, obtuve {:?}", other),
  }
}

#[tokio::test]
async fn worker_failure_rejects_the_flow() {
  let err = run(Arc::new(LocalTaskQueue::default()), Arc::new(PickyTask), vec![1, -2, 3]).await.unwrap_err();
  match err {
    FlowError::TaskFailed { name, reason } => {
      assert_eq!(name, "picky");
      assert!(reason.contains("negativo"), "{}", reason);
    }
    other => panic!("esperaba TaskFailed, obtuve {:?}", other),
  }
}

#[tokio::test]
async fn reducible_commutes_for_every_produced_output() {
  let parity = produced_outputs(&ParityTask, vec![-3, 0, 1, 2, 7]).await;
  assert_reducible_commutes(&ParityTask, &parity);

  let sums = produced_outputs(&SumTask, vec![-5, 0, 4, 9]).await;
  assert_reducible_commutes(&SumTask, &sums);

  let scaled = produced_outputs(&ScaledProductTask,
                                vec![PairedInput { input1: 2, input2: 3, params: ScaleParams { scale: 4 } },
                                     PairedInput { input1: -1, input2: 10, params: ScaleParams { scale: 1 } },
                                     PairedInput { input1: 0, input2: u128::from(u64::MAX), params: ScaleParams { scale: 7 } }])
    .await;
  assert_reducible_commutes(&ScaledProductTask, &scaled);

  let never = produced_outputs(&NeverReducibleTask, vec![1, 2, 3]).await;
  assert_eq!(never.len(), 3);
  assert_reducible_commutes(&NeverReducibleTask, &never);
}
