// Archivo: map_reduce.rs
// Propósito: `MapReduceFlow`, que lleva N entradas de una `MapReduceTask` a
// un único resultado: un job de mapeo por entrada y luego reducción por
// pares hasta que queda uno.
use crate::engine::FlowEngine;
use crate::errors::{FlowError, Result};
use crate::flow::Flow;
use crate::reduction::{ReductionState, ReductionStatus, Reducer};
use crate::task::{MapReduceTask, TaskTag};
use std::sync::Arc;

/// Flujo map-reduce sobre una cola.
///
/// Estados: `idle -> running -> resolved | rejected`. Los errores rechazan
/// el flujo y nunca se reintenta nada a este nivel. El flujo libera su cola
/// tanto si resuelve como si falla.
pub struct MapReduceFlow<T: MapReduceTask> {
    engine: Arc<FlowEngine>,
    queue_name: String,
    reducer: Reducer<T>,
}

impl<T> MapReduceFlow<T> where T: MapReduceTask + 'static
{
    pub fn new(engine: Arc<FlowEngine>, queue_name: impl Into<String>, task: Arc<T>) -> Self {
        let queue_name = queue_name.into();
        let reducer = Reducer::new(task, &queue_name);
        Self { engine, queue_name, reducer }
    }

    /// Ejecuta el flujo `flow_id` sobre `inputs` y devuelve el resultado
    /// agregado.
    pub async fn execute(&self, flow_id: impl Into<String>, inputs: Vec<T::Input>) -> Result<T::Output> {
        let mut flow = self.engine.create_flow(flow_id, ReductionState::new(inputs.len()));
        log::info!("[map-reduce] flujo {} con {} entradas", flow.flow_id(), inputs.len());
        let outcome = self.drive(&mut flow, inputs).await;
        let closed = flow.close().await;
        let result = outcome?;
        closed?;
        Ok(result)
    }

    async fn drive(&self, flow: &mut Flow<ReductionState<T::Output>>, inputs: Vec<T::Input>) -> Result<T::Output> {
        if inputs.is_empty() {
            return Err(FlowError::NonTermination { flow_id: flow.flow_id().to_string(), pending: 0 });
        }
        flow.open_queue(&self.queue_name).await?;

        let task = self.reducer.task();
        let serializer = task.input_serializer();
        for input in &inputs {
            self.reducer.submit_map(flow, &serializer.to_json(input)?, None).await?;
        }

        loop {
            let completed = flow.next_completion().await?;
            let tag = TaskTag::parse(task.name(), &completed.name)
                .ok_or_else(|| FlowError::UnknownTaskTag(completed.name.clone()))?;
            let result = self.reducer.decode(&completed.payload)?;
            match tag {
                TaskTag::Map => flow.state.push_mapped(result),
                TaskTag::Reduce => flow.state.push_reduced(result),
            }

            let pairs = flow.state.take_pairs(|a, b| task.reducible(a, b));
            self.reducer.submit_pairs(flow, pairs).await?;

            match flow.state.poll() {
                ReductionStatus::Running => {}
                ReductionStatus::Resolved(result) => {
                    log::info!("[map-reduce] flujo {} resuelto", flow.flow_id());
                    return Ok(result);
                }
                ReductionStatus::Stuck { pending } => {
                    return Err(FlowError::NonTermination { flow_id: flow.flow_id().to_string(), pending });
                }
            }
        }
    }
}
