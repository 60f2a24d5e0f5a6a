// Archivo: task.rs
// Propósito: definir las abstracciones de tareas (`Task`, `MappingTask`,
// `MapReduceTask`), sus serializadores y la codificación de etiquetas que
// viaja en el campo `name` del payload.
use crate::errors::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Serializador de entradas/resultados de una tarea.
///
/// Debe hacer round-trip: `from_json(to_json(x))` es observacionalmente
/// igual a `x`.
pub trait TaskSerializer<T>: Send + Sync {
    fn to_json(&self, value: &T) -> Result<String>;
    fn from_json(&self, json: &str) -> Result<T>;
}

/// Serializador por defecto basado en serde_json.
pub struct JsonSerializer<T>(PhantomData<fn() -> T>);

impl<T> JsonSerializer<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskSerializer<T> for JsonSerializer<T> where T: Serialize + DeserializeOwned
{
    fn to_json(&self, value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn from_json(&self, json: &str) -> Result<T> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Unidad de trabajo con nombre y serializable, ejecutada por un worker.
#[async_trait]
pub trait Task: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    fn input_serializer(&self) -> Box<dyn TaskSerializer<Self::Input>>;

    fn result_serializer(&self) -> Box<dyn TaskSerializer<Self::Output>>;

    /// Preparación previa al primer uso (por ejemplo compilar un prover).
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn compute(&self, input: Self::Input) -> Result<Self::Output>;
}

/// Mitad de un emparejamiento: transforma una entrada en un resultado.
#[async_trait]
pub trait MappingTask: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    fn input_serializer(&self) -> Box<dyn TaskSerializer<Self::Input>>;

    fn result_serializer(&self) -> Box<dyn TaskSerializer<Self::Output>>;

    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn map(&self, input: Self::Input) -> Result<Self::Output>;
}

/// Tarea de mapeo que además sabe combinar dos resultados en uno.
///
/// `reducible` debe ser conmutativa y depender sólo de `a` y `b`. No hace
/// falta que sea asociativa ni total: basta con que la reducción completa a
/// un único resultado sea alcanzable para el conjunto de entradas.
#[async_trait]
pub trait MapReduceTask: MappingTask {
    async fn reduce(&self, a: Self::Output, b: Self::Output) -> Result<Self::Output>;

    fn reducible(&self, a: &Self::Output, b: &Self::Output) -> bool;
}

const REDUCE_SUFFIX: &str = "_reduce";

/// Discriminador de las dos clases de trabajo de una `MapReduceTask`.
///
/// El sufijo `_reduce` sólo existe en `wire_name`/`parse`; la lógica del
/// flujo razona siempre sobre esta enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskTag {
    Map,
    Reduce,
}

impl TaskTag {
    /// Nombre que viaja en `TaskPayload::name` para `task_name`.
    pub fn wire_name(self, task_name: &str) -> String {
        match self {
            TaskTag::Map => task_name.to_string(),
            TaskTag::Reduce => format!("{}{}", task_name, REDUCE_SUFFIX),
        }
    }

    /// Interpreta un nombre recibido del transporte para la tarea
    /// `task_name`. Devuelve `None` si no corresponde a ninguna de las dos.
    pub fn parse(task_name: &str, wire: &str) -> Option<TaskTag> {
        if wire == task_name {
            return Some(TaskTag::Map);
        }
        match wire.strip_suffix(REDUCE_SUFFIX) {
            Some(base) if base == task_name => Some(TaskTag::Reduce),
            _ => None,
        }
    }
}

/// Serializa el par de un job de reducción como un array JSON
/// `[left, right]` de los dos resultados ya serializados.
pub struct ReducePairSerializer<T: 'static> {
    inner: Box<dyn TaskSerializer<T>>,
}

impl<T: 'static> ReducePairSerializer<T> {
    pub fn new(inner: Box<dyn TaskSerializer<T>>) -> Self {
        Self { inner }
    }
}

impl<T: 'static> TaskSerializer<(T, T)> for ReducePairSerializer<T> {
    fn to_json(&self, value: &(T, T)) -> Result<String> {
        let pair = [self.inner.to_json(&value.0)?, self.inner.to_json(&value.1)?];
        Ok(serde_json::to_string(&pair)?)
    }

    fn from_json(&self, json: &str) -> Result<(T, T)> {
        let [left, right]: [String; 2] = serde_json::from_str(json)?;
        Ok((self.inner.from_json(&left)?, self.inner.from_json(&right)?))
    }
}
