//! Crate `flow`: planificador de flujos sobre colas de tareas
//!
//! Este crate define las abstracciones de tareas (`Task`, `MappingTask`,
//! `MapReduceTask`), el contrato del transporte (`TaskQueue`) con una
//! implementación en proceso (`LocalTaskQueue`), y los dos algoritmos de
//! planificación: `MapReduceFlow` y `PairingMapReduceFlow`.
//!
//! Diseño resumido:
//! - Un `FlowEngine` comparte un handle por cola física entre todos los
//!   flujos; el `QueueRouter` de cada cola reparte los completados por
//!   `flow_id`.
//! - Cada flujo es un contexto explícito (`Flow<S>`) con su propio estado y
//!   canal de completados; no existe ningún registro global de estados.
//! - El lado worker (`FlowTaskWorker`) despacha por nombre de tarea y
//!   contesta con el mismo `flow_id`/`task_id`.
//!
//! Ejemplo rápido:
//! ```rust
//! use flow::stubs::SumTask;
//! use flow::{map_reduce, FlowEngine, FlowEngineConfig, FlowTaskWorker, LocalTaskQueue, MapReduceFlow};
//! use std::sync::Arc;
//! # tokio_test_block(async {
//! let queue = Arc::new(LocalTaskQueue::default());
//! let worker = FlowTaskWorker::new(map_reduce(Arc::new(SumTask))).unwrap();
//! worker.start(queue.as_ref(), "sums").await.unwrap();
//! let engine = FlowEngine::new(queue, FlowEngineConfig::default());
//! let flow = MapReduceFlow::new(engine, "sums", Arc::new(SumTask));
//! assert_eq!(flow.execute("f1", vec![1, 2, 3]).await.unwrap(), 6);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f);
//! # }
//! ```
pub mod engine;
pub mod errors;
pub mod flow;
pub mod local_queue;
pub mod map_reduce;
pub mod pairing;
pub mod queue;
pub mod reduction;
pub mod router;
pub mod stubs;
pub mod task;
pub mod worker;

pub use engine::*;
pub use errors::*;
pub use flow::Flow;
pub use local_queue::*;
pub use map_reduce::*;
pub use pairing::{PairedInput, PairingInput, PairingMapReduceFlow};
pub use queue::*;
pub use reduction::{ReductionState, ReductionStatus};
pub use task::*;
pub use worker::*;
