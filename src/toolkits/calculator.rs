//! Arithmetic toolkit.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::tool::{Tool, Toolkit};

pub fn calculator_toolkit() -> Toolkit {
    let mut toolkit = Toolkit::new("calculator");
    toolkit.register(AddTool);
    toolkit.register(SubtractTool);
    toolkit.register(MultiplyTool);
    toolkit.register(DivideTool);
    toolkit.register(FactorialTool);
    toolkit.register(IsPrimeTool);
    toolkit
}

fn two_number_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "a": {"type": "number"},
            "b": {"type": "number"}
        },
        "required": ["a", "b"]
    })
}

fn integer_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"n": {"type": "integer"}},
        "required": ["n"]
    })
}

fn get_number(input: &Value, field: &str, tool_name: &str) -> Result<f64> {
    input
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| AgentError::Run(format!("missing `{field}` for {tool_name}")))
}

fn get_integer(input: &Value, field: &str, tool_name: &str) -> Result<i64> {
    input
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| AgentError::Run(format!("missing `{field}` for {tool_name}")))
}

struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers."
    }

    fn parameters(&self) -> Option<Value> {
        Some(two_number_schema())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let a = get_number(&input, "a", "add")?;
        let b = get_number(&input, "b", "add")?;
        Ok(json!({"result": a + b}))
    }
}

struct SubtractTool;

#[async_trait]
impl Tool for SubtractTool {
    fn name(&self) -> &str {
        "subtract"
    }

    fn description(&self) -> &str {
        "Subtract the second number from the first."
    }

    fn parameters(&self) -> Option<Value> {
        Some(two_number_schema())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let a = get_number(&input, "a", "subtract")?;
        let b = get_number(&input, "b", "subtract")?;
        Ok(json!({"result": a - b}))
    }
}

struct MultiplyTool;

#[async_trait]
impl Tool for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }

    fn description(&self) -> &str {
        "Multiply two numbers."
    }

    fn parameters(&self) -> Option<Value> {
        Some(two_number_schema())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let a = get_number(&input, "a", "multiply")?;
        let b = get_number(&input, "b", "multiply")?;
        Ok(json!({"result": a * b}))
    }
}

struct DivideTool;

#[async_trait]
impl Tool for DivideTool {
    fn name(&self) -> &str {
        "divide"
    }

    fn description(&self) -> &str {
        "Divide the first number by the second."
    }

    fn parameters(&self) -> Option<Value> {
        Some(two_number_schema())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let a = get_number(&input, "a", "divide")?;
        let b = get_number(&input, "b", "divide")?;
        if b == 0.0 {
            return Err(AgentError::Run("division by zero".into()));
        }
        Ok(json!({"result": a / b}))
    }
}

struct FactorialTool;

#[async_trait]
impl Tool for FactorialTool {
    fn name(&self) -> &str {
        "factorial"
    }

    fn description(&self) -> &str {
        "Compute the factorial of a non-negative integer."
    }

    fn parameters(&self) -> Option<Value> {
        Some(integer_schema())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let n = get_integer(&input, "n", "factorial")?;
        if n < 0 {
            return Err(AgentError::Run(
                "factorial of a negative number is undefined".into(),
            ));
        }
        if n > 20 {
            return Err(AgentError::Run("factorial overflows beyond n=20".into()));
        }
        let result = (1..=n as u64).product::<u64>();
        Ok(json!({"result": result}))
    }
}

struct IsPrimeTool;

#[async_trait]
impl Tool for IsPrimeTool {
    fn name(&self) -> &str {
        "is_prime"
    }

    fn description(&self) -> &str {
        "Check whether an integer is prime."
    }

    fn parameters(&self) -> Option<Value> {
        Some(integer_schema())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let n = get_integer(&input, "n", "is_prime")?;
        Ok(json!({"result": is_prime(n)}))
    }
}

fn is_prime(n: i64) -> bool {
    if n <= 1 {
        return false;
    }
    if n <= 3 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let mut i = 5;
    while i * i <= n {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}
