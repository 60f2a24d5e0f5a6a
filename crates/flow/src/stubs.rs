// Archivo: stubs.rs
// Propósito: tareas de ejemplo para pruebas y para el binario de demo.
//
// Son deterministas y baratas; no simulan ningún prover real.
use crate::errors::{FlowError, Result};
use crate::pairing::PairedInput;
use crate::task::{JsonSerializer, MapReduceTask, MappingTask, TaskSerializer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Serializa `u128` como string decimal JSON (`"340282..."`), para valores
/// que no caben en un número JSON de doble precisión.
pub struct DecimalSerializer;

impl TaskSerializer<u128> for DecimalSerializer {
    fn to_json(&self, value: &u128) -> Result<String> {
        Ok(serde_json::to_string(&value.to_string())?)
    }

    fn from_json(&self, json: &str) -> Result<u128> {
        let digits: String = serde_json::from_str(json)?;
        digits.parse::<u128>()
              .map_err(|e| FlowError::Validation(format!("decimal inválido {:?}: {}", digits, e)))
    }
}

/// Suma de enteros: el mapeo es la identidad y cualquier par es reducible.
pub struct SumTask;

#[async_trait]
impl MappingTask for SumTask {
    type Input = i64;
    type Output = i64;

    fn name(&self) -> &str {
        "sum"
    }

    fn input_serializer(&self) -> Box<dyn TaskSerializer<i64>> {
        Box::new(JsonSerializer::new())
    }

    fn result_serializer(&self) -> Box<dyn TaskSerializer<i64>> {
        Box::new(JsonSerializer::new())
    }

    async fn map(&self, input: i64) -> Result<i64> {
        Ok(input)
    }
}

#[async_trait]
impl MapReduceTask for SumTask {
    async fn reduce(&self, a: i64, b: i64) -> Result<i64> {
        a.checked_add(b).ok_or_else(|| FlowError::Validation(format!("desbordamiento en {} + {}", a, b)))
    }

    fn reducible(&self, _a: &i64, _b: &i64) -> bool {
        true
    }
}

/// Primera mitad de ejemplo: `x -> 2x`.
pub struct DoubleTask;

#[async_trait]
impl MappingTask for DoubleTask {
    type Input = i64;
    type Output = i64;

    fn name(&self) -> &str {
        "double"
    }

    fn input_serializer(&self) -> Box<dyn TaskSerializer<i64>> {
        Box::new(JsonSerializer::new())
    }

    fn result_serializer(&self) -> Box<dyn TaskSerializer<i64>> {
        Box::new(JsonSerializer::new())
    }

    async fn map(&self, input: i64) -> Result<i64> {
        input.checked_mul(2).ok_or_else(|| FlowError::Validation(format!("desbordamiento en 2 * {}", input)))
    }
}

/// Segunda mitad de ejemplo sobre enteros grandes: `y -> 2y`.
pub struct DoubleBigTask;

#[async_trait]
impl MappingTask for DoubleBigTask {
    type Input = u128;
    type Output = u128;

    fn name(&self) -> &str {
        "double_big"
    }

    fn input_serializer(&self) -> Box<dyn TaskSerializer<u128>> {
        Box::new(DecimalSerializer)
    }

    fn result_serializer(&self) -> Box<dyn TaskSerializer<u128>> {
        Box::new(DecimalSerializer)
    }

    async fn map(&self, input: u128) -> Result<u128> {
        input.checked_mul(2).ok_or_else(|| FlowError::Validation(format!("desbordamiento en 2 * {}", input)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleParams {
    pub scale: i64,
}

pub type ScaledInput = PairedInput<i64, u128, ScaleParams>;

/// Tarea reductora de un emparejamiento `DoubleTask` + `DoubleBigTask`:
/// mapea `input1 * input2 * scale` y reduce sumando.
pub struct ScaledProductTask;

#[async_trait]
impl MappingTask for ScaledProductTask {
    type Input = ScaledInput;
    type Output = i128;

    fn name(&self) -> &str {
        "scaled_product"
    }

    fn input_serializer(&self) -> Box<dyn TaskSerializer<ScaledInput>> {
        Box::new(JsonSerializer::new())
    }

    fn result_serializer(&self) -> Box<dyn TaskSerializer<i128>> {
        Box::new(JsonSerializer::new())
    }

    async fn map(&self, input: ScaledInput) -> Result<i128> {
        let big = i128::try_from(input.input2)
            .map_err(|_| FlowError::Validation(format!("{} no cabe en i128", input.input2)))?;
        i128::from(input.input1).checked_mul(big)
                                .and_then(|p| p.checked_mul(i128::from(input.params.scale)))
                                .ok_or_else(|| FlowError::Validation("desbordamiento en el producto".into()))
    }
}

#[async_trait]
impl MapReduceTask for ScaledProductTask {
    async fn reduce(&self, a: i128, b: i128) -> Result<i128> {
        a.checked_add(b).ok_or_else(|| FlowError::Validation(format!("desbordamiento en {} + {}", a, b)))
    }

    fn reducible(&self, _a: &i128, _b: &i128) -> bool {
        true
    }
}

/// Tarea cuyo predicado nunca admite un par: con dos o más entradas el
/// flujo no puede terminar.
pub struct NeverReducibleTask;

#[async_trait]
impl MappingTask for NeverReducibleTask {
    type Input = i64;
    type Output = i64;

    fn name(&self) -> &str {
        "never_reducible"
    }

    fn input_serializer(&self) -> Box<dyn TaskSerializer<i64>> {
        Box::new(JsonSerializer::new())
    }

    fn result_serializer(&self) -> Box<dyn TaskSerializer<i64>> {
        Box::new(JsonSerializer::new())
    }

    async fn map(&self, input: i64) -> Result<i64> {
        Ok(input)
    }
}

#[async_trait]
impl MapReduceTask for NeverReducibleTask {
    async fn reduce(&self, a: i64, b: i64) -> Result<i64> {
        Ok(a + b)
    }

    fn reducible(&self, _a: &i64, _b: &i64) -> bool {
        false
    }
}
