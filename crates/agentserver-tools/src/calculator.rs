// SPDX-License-Identifier: MIT OR Apache-2.0
//! A trivial arithmetic tool listener, demonstrating the `tool` listener
//! kind (§3) against the [`agentserver_dispatch::Handler`] trait. One
//! instance per operation, bound under its own listener name (e.g.
//! `calculator.add` on root tag `add`).
//!
//! Carries a memory slot (§3): either operand may be the literal string
//! `"memory"`, which recalls the result this instance last stored for
//! the invoking thread, and every successful call overwrites that slot
//! with its own result — the same recall/accumulate behavior as a
//! physical calculator's M+ button.

use agentserver_dispatch::{Handler, HandlerMetadata};
use async_trait::async_trait;
use serde_json::Value;

/// Which arithmetic operation an instance performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// A two-operand arithmetic tool.
pub struct Calculator {
    operation: Operation,
}

impl Calculator {
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self { operation }
    }
}

async fn operand(payload: &Value, key: &str, metadata: &HandlerMetadata) -> anyhow::Result<f64> {
    let value = payload
        .get(key)
        .ok_or_else(|| anyhow::anyhow!("missing operand '{key}'"))?;
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("operand '{key}' is not a finite number")),
        Value::String(s) if s == "memory" => metadata
            .load_memory()
            .await
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow::anyhow!("operand '{key}': no memory stored for this thread yet")),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| anyhow::anyhow!("operand '{key}' ('{s}') is not numeric")),
        _ => anyhow::bail!("operand '{key}' must be a number or numeric string"),
    }
}

#[async_trait]
impl Handler for Calculator {
    async fn handle(&self, payload: Value, metadata: HandlerMetadata) -> anyhow::Result<Vec<u8>> {
        let a = operand(&payload, "a", &metadata).await?;
        let b = operand(&payload, "b", &metadata).await?;
        let result = match self.operation {
            Operation::Add => a + b,
            Operation::Subtract => a - b,
            Operation::Multiply => a * b,
            Operation::Divide => {
                if b == 0.0 {
                    anyhow::bail!("division by zero");
                }
                a / b
            }
        };
        metadata.save_memory(serde_json::json!(result)).await;
        Ok(format!("<result>{result}</result>").into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentserver_path::PathRegistry;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn meta() -> HandlerMetadata {
        HandlerMetadata::new(
            uuid::Uuid::nil(),
            "calculator.add",
            Arc::new(RwLock::new(PathRegistry::new())),
        )
    }

    #[tokio::test]
    async fn adds_two_string_operands() {
        let calc = Calculator::new(Operation::Add);
        let out = calc.handle(json!({"a": "40", "b": "2"}), meta()).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "<result>42</result>");
    }

    #[tokio::test]
    async fn division_by_zero_is_rejected() {
        let calc = Calculator::new(Operation::Divide);
        let err = calc.handle(json!({"a": 1, "b": 0}), meta()).await.unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[tokio::test]
    async fn missing_operand_is_rejected() {
        let calc = Calculator::new(Operation::Add);
        let err = calc.handle(json!({"a": 1}), meta()).await.unwrap_err();
        assert!(err.to_string().contains("missing operand 'b'"));
    }

    #[tokio::test]
    async fn memory_operand_recalls_the_last_result_on_the_same_thread() {
        let calc = Calculator::new(Operation::Add);
        let metadata = meta();
        let out = calc
            .handle(json!({"a": "40", "b": "2"}), metadata.clone())
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "<result>42</result>");

        let out = calc
            .handle(json!({"a": "memory", "b": "8"}), metadata)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "<result>50</result>");
    }

    #[tokio::test]
    async fn memory_operand_without_a_prior_result_is_rejected() {
        let calc = Calculator::new(Operation::Add);
        let err = calc
            .handle(json!({"a": "memory", "b": "1"}), meta())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no memory stored"));
    }

    #[tokio::test]
    async fn memory_slots_do_not_cross_between_threads() {
        let paths = Arc::new(RwLock::new(PathRegistry::new()));
        let calc = Calculator::new(Operation::Add);
        let thread_a = HandlerMetadata::new(uuid::Uuid::new_v4(), "calculator.add", Arc::clone(&paths));
        let thread_b = HandlerMetadata::new(uuid::Uuid::new_v4(), "calculator.add", Arc::clone(&paths));

        calc.handle(json!({"a": "1", "b": "1"}), thread_a).await.unwrap();
        let err = calc
            .handle(json!({"a": "memory", "b": "1"}), thread_b)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no memory stored"));
    }
}
