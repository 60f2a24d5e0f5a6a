// Archivo: reduction.rs
// Propósito: estado de reducción por pares compartido por `MapReduceFlow` y
// `PairingMapReduceFlow`, y el envío de los jobs `_reduce` resultantes.
use crate::errors::Result;
use crate::flow::Flow;
use crate::queue::TaskPayload;
use crate::task::{MapReduceTask, ReducePairSerializer, TaskSerializer, TaskTag};
use std::sync::Arc;

/// Resultado de evaluar el estado tras un evento.
#[derive(Debug, PartialEq, Eq)]
pub enum ReductionStatus<R> {
    /// Quedan jobs en vuelo.
    Running,
    /// Un único resultado y nada en vuelo.
    Resolved(R),
    /// Nada en vuelo y no hay un único resultado: cero pendientes o varios
    /// sin ningún par reducible.
    Stuck { pending: usize },
}

/// Resultados pendientes de reducir y contadores de jobs en vuelo.
#[derive(Debug)]
pub struct ReductionState<R> {
    pending: Vec<R>,
    running: usize,
    outstanding_maps: usize,
}

impl<R> ReductionState<R> {
    /// `expected_maps` es el número de jobs de mapeo que van a llegar.
    pub fn new(expected_maps: usize) -> Self {
        Self { pending: Vec::new(), running: 0, outstanding_maps: expected_maps }
    }

    pub fn push_mapped(&mut self, result: R) {
        self.outstanding_maps = self.outstanding_maps.saturating_sub(1);
        self.pending.push(result);
    }

    pub fn push_reduced(&mut self, result: R) {
        self.running = self.running.saturating_sub(1);
        self.pending.push(result);
    }

    /// Descubrimiento de reducciones: recorre los pendientes de izquierda a
    /// derecha y empareja cada elemento con el primer posterior reducible.
    /// Los pares salen de `pending` y cuentan como reducciones en vuelo.
    pub fn take_pairs(&mut self, reducible: impl Fn(&R, &R) -> bool) -> Vec<(R, R)> {
        let mut pairs = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            let partner = (i + 1..self.pending.len()).find(|&j| reducible(&self.pending[i], &self.pending[j]));
            match partner {
                Some(j) => {
                    // j > i: quitar primero j mantiene válido el índice i
                    let right = self.pending.remove(j);
                    let left = self.pending.remove(i);
                    pairs.push((left, right));
                }
                None => i += 1,
            }
        }
        self.running += pairs.len();
        pairs
    }

    /// Evalúa la condición de terminación. Sólo decide cuando no queda
    /// ningún job (de mapeo o de reducción) en vuelo.
    pub fn poll(&mut self) -> ReductionStatus<R> {
        if self.outstanding_maps > 0 || self.running > 0 {
            return ReductionStatus::Running;
        }
        if self.pending.len() == 1 {
            if let Some(result) = self.pending.pop() {
                return ReductionStatus::Resolved(result);
            }
        }
        ReductionStatus::Stuck { pending: self.pending.len() }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn outstanding_maps(&self) -> usize {
        self.outstanding_maps
    }
}

/// Lado de envío de la reducción para una `MapReduceTask` concreta.
pub(crate) struct Reducer<T: MapReduceTask> {
    task: Arc<T>,
    queue_name: String,
    results: Box<dyn TaskSerializer<T::Output>>,
    pairs: ReducePairSerializer<T::Output>,
}

impl<T: MapReduceTask> Reducer<T> {
    pub(crate) fn new(task: Arc<T>, queue_name: &str) -> Self {
        let results = task.result_serializer();
        let pairs = ReducePairSerializer::new(task.result_serializer());
        Self { task, queue_name: queue_name.to_string(), results, pairs }
    }

    pub(crate) fn task(&self) -> &T {
        &self.task
    }

    pub(crate) fn decode(&self, payload: &str) -> Result<T::Output> {
        self.results.from_json(payload)
    }

    /// Encola un job de mapeo de la tarea reductora.
    pub(crate) async fn submit_map<S>(&self, flow: &Flow<S>, input: &str, task_id: Option<String>) -> Result<()> {
        let mut payload = TaskPayload::new(TaskTag::Map.wire_name(self.task.name()), input, flow.flow_id());
        payload.task_id = task_id;
        flow.push_task(&self.queue_name, payload).await?;
        Ok(())
    }

    /// Encola un job `_reduce` por cada par descubierto.
    pub(crate) async fn submit_pairs<S>(&self, flow: &Flow<S>, pairs: Vec<(T::Output, T::Output)>) -> Result<()> {
        for pair in pairs {
            let payload = TaskPayload::new(TaskTag::Reduce.wire_name(self.task.name()),
                                           self.pairs.to_json(&pair)?,
                                           flow.flow_id());
            flow.push_task(&self.queue_name, payload).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_index_first_match_pairing() {
        let mut state = ReductionState::new(0);
        for v in [1, 2, 3, 4, 5] {
            state.pending.push(v);
        }
        // sólo se reducen valores de igual paridad
        let pairs = state.take_pairs(|a, b| a % 2 == b % 2);
        assert_eq!(pairs, vec![(1, 3), (2, 4)]);
        assert_eq!(state.pending, vec![5]);
        assert_eq!(state.running(), 2);
    }

    #[test]
    fn poll_waits_for_outstanding_maps() {
        let mut state = ReductionState::new(2);
        state.push_mapped(10);
        assert_eq!(state.poll(), ReductionStatus::Running);
        state.push_mapped(20);
        assert_eq!(state.take_pairs(|_, _| true), vec![(10, 20)]);
        assert_eq!(state.poll(), ReductionStatus::Running);
        state.push_reduced(30);
        assert_eq!(state.poll(), ReductionStatus::Resolved(30));
    }

    #[test]
    fn poll_reports_stuck_states() {
        let mut empty: ReductionState<i32> = ReductionState::new(0);
        assert_eq!(empty.poll(), ReductionStatus::Stuck { pending: 0 });

        let mut two = ReductionState::new(2);
        two.push_mapped(1);
        two.push_mapped(2);
        assert!(two.take_pairs(|_, _| false).is_empty());
        assert_eq!(two.poll(), ReductionStatus::Stuck { pending: 2 });
    }
}
