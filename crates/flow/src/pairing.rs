// Archivo: pairing.rs
// Propósito: `PairingMapReduceFlow`. Delante de la reducción añade una fase
// de emparejamiento: dos `MappingTask` independientes por entrada lógica,
// unidas por `task_id` en una entrada derivada que se manda como job de
// mapeo de la tarea reductora.
use crate::engine::FlowEngine;
use crate::errors::{FlowError, Result};
use crate::flow::Flow;
use crate::queue::TaskPayload;
use crate::reduction::{ReductionState, ReductionStatus, Reducer};
use crate::task::{MapReduceTask, MappingTask, TaskTag};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

/// Entrada lógica: las dos mitades y parámetros extra, identificada por un
/// `task_id` único dentro del flujo.
#[derive(Debug, Clone)]
pub struct PairingInput<A, B, P> {
    pub task_id: String,
    pub input1: A,
    pub input2: B,
    pub params: P,
}

/// Entrada derivada que recibe el mapeo de la tarea reductora.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedInput<A, B, P> {
    pub input1: A,
    pub input2: B,
    pub params: P,
}

/// Colector de un `task_id`. Listo cuando ambas ranuras están llenas.
struct PairingCollector<A, B, P> {
    first: Option<A>,
    second: Option<B>,
    params: Option<P>,
}

impl<A, B, P> PairingCollector<A, B, P> {
    /// Si ambas mitades están presentes consume el colector y devuelve la
    /// entrada derivada.
    fn take_ready(&mut self) -> Option<PairedInput<A, B, P>> {
        if self.first.is_none() || self.second.is_none() || self.params.is_none() {
            return None;
        }
        Some(PairedInput { input1: self.first.take()?, input2: self.second.take()?, params: self.params.take()? })
    }
}

/// Estado de un flujo de emparejamiento.
struct PairingState<A, B, P, R> {
    collectors: HashMap<String, PairingCollector<A, B, P>>,
    submitted: HashSet<String>,
    reduction: ReductionState<R>,
    pair_count: usize,
}

/// Las cuatro etiquetas reconocidas en la cola de un flujo de
/// emparejamiento.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairingTag {
    First,
    Second,
    Map,
    Reduce,
}

/// Flujo de emparejamiento + map-reduce.
///
/// `F` y `G` calculan las dos mitades; `R` reduce las entradas derivadas
/// `PairedInput<F::Output, G::Output, P>`.
pub struct PairingMapReduceFlow<F, G, R, P>
    where F: MappingTask,
          G: MappingTask,
          R: MapReduceTask<Input = PairedInput<F::Output, G::Output, P>>
{
    engine: Arc<FlowEngine>,
    queue_name: String,
    first: Arc<F>,
    second: Arc<G>,
    reducer: Reducer<R>,
    _params: PhantomData<fn() -> P>,
}

type PairingFlow<F, G, P, R> =
    Flow<PairingState<<F as MappingTask>::Output, <G as MappingTask>::Output, P, <R as MappingTask>::Output>>;

impl<F, G, R, P> PairingMapReduceFlow<F, G, R, P>
    where F: MappingTask + 'static,
          G: MappingTask + 'static,
          R: MapReduceTask<Input = PairedInput<F::Output, G::Output, P>> + 'static,
          P: Send + 'static
{
    pub fn new(engine: Arc<FlowEngine>,
               queue_name: impl Into<String>,
               first: Arc<F>,
               second: Arc<G>,
               reducing: Arc<R>)
               -> Self {
        let queue_name = queue_name.into();
        let reducer = Reducer::new(reducing, &queue_name);
        Self { engine, queue_name, first, second, reducer, _params: PhantomData }
    }

    /// Ejecuta el flujo sobre las entradas lógicas y devuelve el resultado
    /// agregado de la tarea reductora.
    pub async fn execute(&self,
                         flow_id: impl Into<String>,
                         inputs: Vec<PairingInput<F::Input, G::Input, P>>)
                         -> Result<R::Output> {
        let state = PairingState { collectors: HashMap::new(),
                                   submitted: HashSet::new(),
                                   reduction: ReductionState::new(inputs.len()),
                                   pair_count: inputs.len() };
        let mut flow = self.engine.create_flow(flow_id, state);
        log::info!("[pairing] flujo {} con {} pares", flow.flow_id(), inputs.len());
        let outcome = self.drive(&mut flow, inputs).await;
        let closed = flow.close().await;
        let result = outcome?;
        closed?;
        Ok(result)
    }

    fn validate(&self, inputs: &[PairingInput<F::Input, G::Input, P>]) -> Result<()> {
        let names = [self.first.name(),
                     self.second.name(),
                     self.reducer.task().name()];
        let distinct: HashSet<&str> = names.iter().copied().collect();
        if distinct.len() != names.len() {
            return Err(FlowError::Validation(format!("nombres de tarea repetidos: {:?}", names)));
        }
        let mut seen = HashSet::new();
        for input in inputs {
            if !seen.insert(input.task_id.as_str()) {
                return Err(FlowError::Validation(format!("task_id duplicado: {}", input.task_id)));
            }
        }
        Ok(())
    }

    fn classify(&self, name: &str) -> Result<PairingTag> {
        if name == self.first.name() {
            return Ok(PairingTag::First);
        }
        if name == self.second.name() {
            return Ok(PairingTag::Second);
        }
        match TaskTag::parse(self.reducer.task().name(), name) {
            Some(TaskTag::Map) => Ok(PairingTag::Map),
            Some(TaskTag::Reduce) => Ok(PairingTag::Reduce),
            None => Err(FlowError::UnknownTaskTag(name.to_string())),
        }
    }

    async fn drive(&self,
                   flow: &mut PairingFlow<F, G, P, R>,
                   inputs: Vec<PairingInput<F::Input, G::Input, P>>)
                   -> Result<R::Output> {
        if inputs.is_empty() {
            return Err(FlowError::NonTermination { flow_id: flow.flow_id().to_string(), pending: 0 });
        }
        self.validate(&inputs)?;
        flow.open_queue(&self.queue_name).await?;

        let first_in = self.first.input_serializer();
        let second_in = self.second.input_serializer();
        let first_out = self.first.result_serializer();
        let second_out = self.second.result_serializer();
        let derived = self.reducer.task().input_serializer();

        for input in inputs {
            let first = TaskPayload::new(self.first.name(), first_in.to_json(&input.input1)?, flow.flow_id())
                .with_task_id(input.task_id.clone());
            let second = TaskPayload::new(self.second.name(), second_in.to_json(&input.input2)?, flow.flow_id())
                .with_task_id(input.task_id.clone());
            flow.state.collectors.insert(input.task_id,
                                         PairingCollector { first: None, second: None, params: Some(input.params) });
            flow.push_task(&self.queue_name, first).await?;
            flow.push_task(&self.queue_name, second).await?;
        }

        loop {
            let completed = flow.next_completion().await?;
            let tag = self.classify(&completed.name)?;
            match tag {
                PairingTag::First | PairingTag::Second => {
                    let task_id = completed.task_id
                                           .clone()
                                           .ok_or_else(|| FlowError::TaskIdMissing(completed.name.clone()))?;
                    if flow.state.submitted.contains(&task_id) {
                        // entrega at-least-once: la mitad ya se usó
                        log::warn!("[pairing] {}: mitad duplicada para {}, ignorada", flow.flow_id(), task_id);
                        continue;
                    }
                    let collector = flow.state
                                        .collectors
                                        .get_mut(&task_id)
                                        .ok_or_else(|| FlowError::UnknownTaskId(task_id.clone()))?;
                    if tag == PairingTag::First {
                        collector.first = Some(first_out.from_json(&completed.payload)?);
                    } else {
                        collector.second = Some(second_out.from_json(&completed.payload)?);
                    }
                    if let Some(paired) = collector.take_ready() {
                        flow.state.collectors.remove(&task_id);
                        flow.state.submitted.insert(task_id.clone());
                        self.reducer.submit_map(flow, &derived.to_json(&paired)?, Some(task_id)).await?;
                    }
                    continue;
                }
                PairingTag::Map => {
                    let result = self.reducer.decode(&completed.payload)?;
                    if flow.state.pair_count == 1 {
                        // un único par: no hay nada con qué reducir
                        log::info!("[pairing] flujo {} resuelto sin reducción", flow.flow_id());
                        return Ok(result);
                    }
                    flow.state.reduction.push_mapped(result);
                }
                PairingTag::Reduce => {
                    let result = self.reducer.decode(&completed.payload)?;
                    flow.state.reduction.push_reduced(result);
                }
            }

            let task = self.reducer.task();
            let pairs = flow.state.reduction.take_pairs(|a, b| task.reducible(a, b));
            self.reducer.submit_pairs(flow, pairs).await?;

            match flow.state.reduction.poll() {
                ReductionStatus::Running => {}
                ReductionStatus::Resolved(result) => {
                    log::info!("[pairing] flujo {} resuelto", flow.flow_id());
                    return Ok(result);
                }
                ReductionStatus::Stuck { pending } => {
                    return Err(FlowError::NonTermination { flow_id: flow.flow_id().to_string(), pending });
                }
            }
        }
    }
}
