// src/runtime/tools.rs
//! Tool registry and builtin tools

use crate::runtime::tool_executor::ToolContext;
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Tool arguments
pub type ToolArgs = Map<String, Value>;

/// A named operation the tool executor can dispatch to
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Run the tool. `ctx` allows nested tool calls.
    fn call(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<Value>;
}

type ToolFn = dyn Fn(&ToolArgs, &ToolContext) -> Result<Value> + Send + Sync;

/// Tool backed by a closure
pub struct FnTool {
    name: String,
    description: String,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ToolArgs, &ToolContext) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            func: Box::new(func),
        }
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn call(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<Value> {
        (self.func)(args, ctx)
    }
}

/// Concurrent name → tool map
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `calculator`, `text_processor` and
    /// `data_validator`
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(FnTool::new(
            "calculator",
            "Arithmetic on two numbers: add, subtract, multiply, divide",
            |args, _| calculator(args),
        )));
        registry.register(Arc::new(FnTool::new(
            "text_processor",
            "Text transforms: uppercase, lowercase, reverse, word_count",
            |args, _| text_processor(args),
        )));
        registry.register(Arc::new(FnTool::new(
            "data_validator",
            "Checks required keys of a named schema",
            |args, _| data_validator(args),
        )));
        registry
    }

    /// Register a tool, replacing any tool of the same name
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!("Registering tool '{}'", name);
        self.tools.insert(name, tool);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

fn str_arg<'a>(tool: &str, args: &'a ToolArgs, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::execution(tool, format!("missing string argument '{}'", key)))
}

fn calculator(args: &ToolArgs) -> Result<Value> {
    let operation = str_arg("calculator", args, "operation")?;
    let a = args.get("a").cloned().unwrap_or(Value::Null);
    let b = args.get("b").cloned().unwrap_or(Value::Null);

    // Integer arithmetic stays integral unless it overflows or divides
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match operation {
            "add" => x.checked_add(y),
            "subtract" => x.checked_sub(y),
            "multiply" => x.checked_mul(y),
            _ => None,
        };
        if let Some(n) = exact {
            return Ok(json!(n));
        }
    }

    let (x, y) = match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(EngineError::execution(
                "calculator",
                "arguments 'a' and 'b' must be numbers",
            ))
        }
    };

    let result = match operation {
        "add" => x + y,
        "subtract" => x - y,
        "multiply" => x * y,
        "divide" if y == 0.0 => {
            return Err(EngineError::execution("calculator", "division by zero"))
        }
        "divide" => x / y,
        other => {
            return Err(EngineError::execution(
                "calculator",
                format!("unknown operation '{}'", other),
            ))
        }
    };

    Ok(json!(result))
}

fn text_processor(args: &ToolArgs) -> Result<Value> {
    let text = str_arg("text_processor", args, "text")?;
    let operation = str_arg("text_processor", args, "operation")?;

    match operation {
        "uppercase" => Ok(json!(text.to_uppercase())),
        "lowercase" => Ok(json!(text.to_lowercase())),
        "reverse" => Ok(json!(text.chars().rev().collect::<String>())),
        "word_count" => Ok(json!(text.split_whitespace().count())),
        other => Err(EngineError::execution(
            "text_processor",
            format!("unknown operation '{}'", other),
        )),
    }
}

fn schema_fields(schema: &str) -> Option<&'static [&'static str]> {
    match schema {
        "person" => Some(&["name", "age"]),
        _ => None,
    }
}

fn data_validator(args: &ToolArgs) -> Result<Value> {
    let schema = str_arg("data_validator", args, "schema")?;
    let data = args
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| EngineError::execution("data_validator", "'data' must be an object"))?;

    let required = schema_fields(schema).ok_or_else(|| {
        EngineError::execution("data_validator", format!("unknown schema '{}'", schema))
    })?;

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|field| !data.contains_key(*field))
        .collect();

    Ok(json!({
        "valid": missing.is_empty(),
        "schema": schema,
        "missing": missing,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::ErrorKind;

    fn args(value: Value) -> ToolArgs {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_calculator() {
        assert_eq!(
            calculator(&args(json!({"operation": "add", "a": 2, "b": 3}))).unwrap(),
            json!(5)
        );
        assert_eq!(
            calculator(&args(json!({"operation": "divide", "a": 7, "b": 2}))).unwrap(),
            json!(3.5)
        );
        assert_eq!(
            calculator(&args(json!({"operation": "multiply", "a": 1.5, "b": 2}))).unwrap(),
            json!(3.0)
        );

        let err = calculator(&args(json!({"operation": "divide", "a": 1, "b": 0}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
        assert!(err.to_string().contains("division by zero"));

        assert!(calculator(&args(json!({"operation": "pow", "a": 1, "b": 2}))).is_err());
        assert!(calculator(&args(json!({"operation": "add", "a": "x", "b": 2}))).is_err());
    }

    #[test]
    fn test_calculator_overflow_goes_float() {
        let result =
            calculator(&args(json!({"operation": "add", "a": i64::MAX, "b": 1}))).unwrap();
        assert!(result.is_f64());
    }

    #[test]
    fn test_text_processor() {
        let run = |op: &str| text_processor(&args(json!({"text": "Hello World", "operation": op})));
        assert_eq!(run("uppercase").unwrap(), json!("HELLO WORLD"));
        assert_eq!(run("lowercase").unwrap(), json!("hello world"));
        assert_eq!(run("reverse").unwrap(), json!("dlroW olleH"));
        assert_eq!(run("word_count").unwrap(), json!(2));
        assert!(run("shout").is_err());
    }

    #[test]
    fn test_data_validator() {
        let ok = data_validator(&args(json!({
            "schema": "person",
            "data": {"name": "Ada", "age": 36}
        })))
        .unwrap();
        assert_eq!(ok["valid"], json!(true));

        let missing = data_validator(&args(json!({
            "schema": "person",
            "data": {"name": "Ada"}
        })))
        .unwrap();
        assert_eq!(missing["valid"], json!(false));
        assert_eq!(missing["missing"], json!(["age"]));

        assert!(data_validator(&args(json!({"schema": "robot", "data": {}}))).is_err());
    }

    #[test]
    fn test_registry() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec!["calculator", "data_validator", "text_processor"]
        );
        assert!(registry.contains("calculator"));
        assert!(registry.get("missing").is_none());

        assert!(registry.unregister("calculator"));
        assert!(!registry.unregister("calculator"));
    }
}
