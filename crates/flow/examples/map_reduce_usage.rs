use flow::errors::FlowError;
use flow::stubs::SumTask;
use flow::{map_reduce, FlowEngine, FlowEngineConfig, FlowTaskWorker, LocalTaskQueue, LocalTaskQueueConfig,
           MapReduceFlow};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), FlowError> {
    // Cola local con jitter para ver completados fuera de orden
    let queue = Arc::new(LocalTaskQueue::new(LocalTaskQueueConfig { simulated_duration: Duration::from_millis(2),
                                                                    latency_jitter: Duration::from_millis(10),
                                                                    seed: 42 }));
    let worker = FlowTaskWorker::new(map_reduce(Arc::new(SumTask)))?;
    worker.start(queue.as_ref(), "sums").await?;

    let engine = FlowEngine::new(queue.clone(), FlowEngineConfig::default());
    let flow = MapReduceFlow::new(Arc::clone(&engine), "sums", Arc::new(SumTask));
    let total = flow.execute(FlowEngine::new_flow_id(), (1..=20).collect()).await?;
    println!("total: {}", total);

    for job in queue.job_history() {
        println!("{:<12} {}", job.name, job.payload);
    }

    worker.close().await?;
    engine.close().await
}
