// Archivo: worker.rs
// Propósito: lado worker de la cola. Registra tareas por nombre de payload,
// las prepara una vez y ejecuta cada job que entrega el transporte.
use crate::errors::{FlowError, Result};
use crate::queue::{Closeable, TaskExecutor, TaskPayload, TaskQueue};
use crate::task::{MapReduceTask, MappingTask, ReducePairSerializer, Task, TaskSerializer, TaskTag};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Forma object-safe de cualquier `Task`: JSON de entrada, JSON de salida.
#[async_trait]
pub trait ErasedTask: Send + Sync {
    /// Nombre tal como viaja en `TaskPayload::name`.
    fn task_name(&self) -> String;

    async fn prepare_task(&self) -> Result<()>;

    async fn run(&self, payload: &str) -> Result<String>;
}

#[async_trait]
impl<T: Task> ErasedTask for T {
    fn task_name(&self) -> String {
        self.name().to_string()
    }

    async fn prepare_task(&self) -> Result<()> {
        self.prepare().await
    }

    async fn run(&self, payload: &str) -> Result<String> {
        let input = self.input_serializer().from_json(payload)?;
        let output = self.compute(input).await?;
        self.result_serializer().to_json(&output)
    }
}

/// Expone el `map` de una `MappingTask` como `Task`.
pub struct MapTaskAdapter<T: MappingTask>(pub Arc<T>);

#[async_trait]
impl<T: MappingTask> Task for MapTaskAdapter<T> {
    type Input = T::Input;
    type Output = T::Output;

    fn name(&self) -> &str {
        self.0.name()
    }

    fn input_serializer(&self) -> Box<dyn TaskSerializer<Self::Input>> {
        self.0.input_serializer()
    }

    fn result_serializer(&self) -> Box<dyn TaskSerializer<Self::Output>> {
        self.0.result_serializer()
    }

    async fn prepare(&self) -> Result<()> {
        self.0.prepare().await
    }

    async fn compute(&self, input: Self::Input) -> Result<Self::Output> {
        self.0.map(input).await
    }
}

/// Expone el `reduce` de una `MapReduceTask` como `Task` con nombre
/// `<name>_reduce` y entrada `[left, right]`.
pub struct ReduceTaskAdapter<T: MapReduceTask> {
    task: Arc<T>,
    name: String,
}

impl<T: MapReduceTask> ReduceTaskAdapter<T> {
    pub fn new(task: Arc<T>) -> Self {
        let name = TaskTag::Reduce.wire_name(task.name());
        Self { task, name }
    }
}

#[async_trait]
impl<T: MapReduceTask> Task for ReduceTaskAdapter<T> {
    type Input = (T::Output, T::Output);
    type Output = T::Output;

    fn name(&self) -> &str {
        &self.name
    }

    fn input_serializer(&self) -> Box<dyn TaskSerializer<Self::Input>> {
        Box::new(ReducePairSerializer::new(self.task.result_serializer()))
    }

    fn result_serializer(&self) -> Box<dyn TaskSerializer<Self::Output>> {
        self.task.result_serializer()
    }

    // el adaptador de mapeo ya prepara la tarea
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn compute(&self, input: Self::Input) -> Result<Self::Output> {
        self.task.reduce(input.0, input.1).await
    }
}

/// Registra una `Task` simple.
pub fn erase<T: Task + 'static>(task: Arc<T>) -> Arc<dyn ErasedTask> {
    task
}

/// Registra una `MappingTask` (sólo su mapeo).
pub fn mapping<T: MappingTask + 'static>(task: Arc<T>) -> Arc<dyn ErasedTask> {
    Arc::new(MapTaskAdapter(task))
}

/// Registra una `MapReduceTask`: su mapeo y su `_reduce`.
pub fn map_reduce<T: MapReduceTask + 'static>(task: Arc<T>) -> Vec<Arc<dyn ErasedTask>> {
    vec![Arc::new(MapTaskAdapter(Arc::clone(&task))), Arc::new(ReduceTaskAdapter::new(task))]
}

/// Worker que atiende los jobs de una o varias colas despachando por el
/// `name` del payload.
pub struct FlowTaskWorker {
    tasks: HashMap<String, Arc<dyn ErasedTask>>,
    handles: Mutex<Vec<Box<dyn Closeable>>>,
}

impl FlowTaskWorker {
    pub fn new(tasks: Vec<Arc<dyn ErasedTask>>) -> Result<Arc<Self>> {
        let mut by_name = HashMap::new();
        for task in tasks {
            let name = task.task_name();
            if by_name.insert(name.clone(), task).is_some() {
                return Err(FlowError::Validation(format!("tarea registrada dos veces: {}", name)));
            }
        }
        Ok(Arc::new(Self { tasks: by_name, handles: Mutex::new(Vec::new()) }))
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Prepara todas las tareas y empieza a atender `queue_name`.
    pub async fn start(self: &Arc<Self>, queue: &dyn TaskQueue, queue_name: &str) -> Result<()> {
        for task in self.tasks.values() {
            task.prepare_task().await?;
        }
        let executor: Arc<dyn TaskExecutor> = Arc::clone(self) as Arc<dyn TaskExecutor>;
        let handle = queue.create_worker(queue_name, executor).await?;
        self.handles.lock().await.push(handle);
        log::info!("[worker] atendiendo {} con {:?}", queue_name, self.task_names());
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        let handles: Vec<Box<dyn Closeable>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            handle.close().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for FlowTaskWorker {
    async fn execute(&self, payload: TaskPayload) -> Result<TaskPayload> {
        let task = self.tasks
                       .get(&payload.name)
                       .ok_or_else(|| FlowError::UnknownTaskTag(payload.name.clone()))?;
        log::debug!("[worker] ejecutando {} (flujo {})", payload.name, payload.flow_id);
        let output = task.run(&payload.payload).await?;
        Ok(payload.answer(output))
    }
}
