// src/runtime/tool_executor.rs
//! Tool dispatch with recursion and time limits
//!
//! A top-level call runs on the dispatcher at depth 0. Tools that call other
//! tools do so through their [`ToolContext`]; nested calls run inline on the
//! same worker at depth + 1 and share the top-level deadline.
//!
//! ```text
//! execute_tool("a")  ── worker ──▶ a (depth 0)
//!                                   └─ ctx.call_tool("b") ─▶ b (depth 1)
//!                                                              └─ ... depth ≤ max
//! ```

use crate::backend::{global_resolver, Backend, BackendResolver, Component};
use crate::runtime::dispatcher::{build_dispatcher, Dispatcher, DispatcherStats};
use crate::runtime::panic_message;
use crate::runtime::tools::{Tool, ToolArgs, ToolRegistry};
use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{EngineError, Result};
use crossbeam_channel::RecvTimeoutError;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Tool executor limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLimits {
    /// Deepest nested call allowed (top level is depth 0)
    pub max_recursion_depth: usize,

    /// Wall-clock bound on one top-level call, nested calls included
    pub timeout: Duration,

    /// Top-level calls running at once
    pub max_concurrency: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

impl ToolLimits {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            max_recursion_depth: config.tool_max_recursion_depth,
            timeout: config.tool_timeout(),
            max_concurrency: config.max_concurrent_tasks,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(EngineError::ConfigError(
                "tool timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(EngineError::ConfigError(
                "tool concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// State shared by the executor and every context it hands out
struct Shared {
    registry: ToolRegistry,
    max_depth: usize,
}

/// Handle given to a running tool
pub struct ToolContext {
    shared: Arc<Shared>,
    tool: String,
    depth: usize,
    /// `None` when the timeout is too large to represent as an instant
    deadline: Option<Instant>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ToolContext {
    /// Name of the tool this context belongs to
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Nesting depth (0 for a top-level call)
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the top-level caller stopped waiting or the deadline passed
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Invoke another tool from inside this one
    pub fn call_tool(&self, name: &str, args: ToolArgs) -> Result<Value> {
        let depth = self.depth + 1;
        if depth > self.shared.max_depth {
            return Err(EngineError::RecursionLimitExceeded {
                depth,
                max: self.shared.max_depth,
            });
        }
        if self.is_cancelled() {
            return Err(EngineError::Timeout {
                name: name.to_string(),
                after: self.timeout,
            });
        }

        let child = ToolContext {
            shared: Arc::clone(&self.shared),
            tool: name.to_string(),
            depth,
            deadline: self.deadline,
            timeout: self.timeout,
            cancel: self.cancel.clone(),
        };
        invoke(&child, &args)
    }
}

/// Run the tool named by `ctx` on the current thread
fn invoke(ctx: &ToolContext, args: &ToolArgs) -> Result<Value> {
    let name = ctx.tool.as_str();
    let tool: Arc<dyn Tool> = ctx
        .shared
        .registry
        .get(name)
        .ok_or_else(|| EngineError::UnknownTool(name.to_string()))?;

    trace!("Invoking tool '{}' at depth {}", name, ctx.depth);

    match panic::catch_unwind(AssertUnwindSafe(|| tool.call(args, ctx))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(classify(name, e)),
        Err(payload) => Err(EngineError::execution(
            name,
            format!("tool panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

/// Limit errors and lookup errors from nested calls pass through untouched;
/// anything else becomes an execution failure of this tool.
fn classify(name: &str, error: EngineError) -> EngineError {
    match error {
        EngineError::RecursionLimitExceeded { .. }
        | EngineError::Timeout { .. }
        | EngineError::UnknownTool(_) => error,
        EngineError::ExecutionFailed { name: ref failed, .. } if failed == name => error,
        other => EngineError::execution(name, other),
    }
}

/// Tool executor
pub struct AcceleratedToolExecutor {
    /// Backend chosen at construction
    backend: Backend,

    dispatcher: Arc<dyn Dispatcher>,

    shared: Arc<Shared>,

    limits: ToolLimits,
}

impl AcceleratedToolExecutor {
    /// Create an executor with the builtin tools, using the process-wide
    /// resolver and configuration
    pub fn new() -> Result<Self> {
        Self::with_resolver(global_resolver())
    }

    pub fn with_resolver(resolver: &BackendResolver) -> Result<Self> {
        let backend = resolver.resolve(Component::Tools);
        let limits = ToolLimits::from_config(&resolver.config().runtime);
        Self::with_backend(backend, limits)
    }

    pub fn with_backend(backend: Backend, limits: ToolLimits) -> Result<Self> {
        Self::with_registry(backend, limits, ToolRegistry::with_builtins())
    }

    /// Create an executor over a caller-supplied registry
    pub fn with_registry(
        backend: Backend,
        limits: ToolLimits,
        registry: ToolRegistry,
    ) -> Result<Self> {
        limits.validate()?;
        let dispatcher = build_dispatcher(backend, limits.max_concurrency)?;

        info!(
            "Tool executor ready ({} backend, max depth {}, timeout {:?})",
            backend,
            limits.max_recursion_depth,
            limits.timeout
        );

        Ok(Self {
            backend,
            dispatcher,
            shared: Arc::new(Shared {
                registry,
                max_depth: limits.max_recursion_depth,
            }),
            limits,
        })
    }

    pub fn implementation(&self) -> Backend {
        self.backend
    }

    pub fn limits(&self) -> &ToolLimits {
        &self.limits
    }

    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.shared.registry.register(tool);
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.shared.registry
    }

    /// Run a tool, bounded by the configured timeout
    pub fn execute_tool(&self, name: &str, args: ToolArgs) -> Result<Value> {
        if !self.shared.registry.contains(name) {
            record_call("unknown_tool");
            return Err(EngineError::UnknownTool(name.to_string()));
        }

        let timeout = self.limits.timeout;
        let ctx = ToolContext {
            shared: Arc::clone(&self.shared),
            tool: name.to_string(),
            depth: 0,
            deadline: Instant::now().checked_add(timeout),
            timeout,
            cancel: CancellationToken::new(),
        };
        let cancel = ctx.cancel.clone();
        let ctx_deadline = ctx.deadline;
        let (tx, rx) = crossbeam_channel::bounded::<Result<Value>>(1);

        self.dispatcher.submit(Box::new(move || {
            if ctx.is_cancelled() {
                trace!("Skipping abandoned call to '{}'", ctx.tool);
                return;
            }
            let _ = tx.send(invoke(&ctx, &args));
        }))?;

        let received = match ctx_deadline {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(RecvTimeoutError::from),
        };
        let result = match received {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                cancel.cancel();
                warn!("Tool '{}' timed out after {:?}", name, timeout);
                Err(EngineError::Timeout {
                    name: name.to_string(),
                    after: timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::execution(
                name,
                "call dropped before completion",
            )),
        };

        match &result {
            Ok(_) => record_call("ok"),
            Err(e) => {
                debug!("Tool '{}' failed: {}", name, e);
                record_call(e.kind().as_str());
            }
        }
        result
    }

    /// Run several calls one after another; each failure stays in its slot
    pub fn execute_tools<I, S>(&self, calls: I) -> Vec<Result<Value>>
    where
        I: IntoIterator<Item = (S, ToolArgs)>,
        S: AsRef<str>,
    {
        calls
            .into_iter()
            .map(|(name, args)| self.execute_tool(name.as_ref(), args))
            .collect()
    }
}

fn record_call(outcome: &'static str) {
    metrics::counter!("accelerate_tool_calls_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tools::FnTool;
    use crate::utils::errors::ErrorKind;
    use serde_json::json;
    use std::thread;

    fn args(value: Value) -> ToolArgs {
        value.as_object().cloned().unwrap_or_default()
    }

    fn limits(depth: usize, timeout: Duration) -> ToolLimits {
        ToolLimits {
            max_recursion_depth: depth,
            timeout,
            max_concurrency: 2,
        }
    }

    fn executors(limits: ToolLimits) -> Vec<AcceleratedToolExecutor> {
        vec![
            AcceleratedToolExecutor::with_backend(Backend::Native, limits.clone()).unwrap(),
            AcceleratedToolExecutor::with_backend(Backend::Fallback, limits).unwrap(),
        ]
    }

    /// Tool that calls itself `remaining` more times
    fn recursive_tool() -> Arc<dyn Tool> {
        Arc::new(FnTool::new("recurse", "", |args, ctx| {
            let remaining = args["remaining"].as_u64().unwrap_or(0);
            if remaining == 0 {
                return Ok(json!(ctx.depth()));
            }
            ctx.call_tool("recurse", args_with_remaining(remaining - 1))
        }))
    }

    fn args_with_remaining(n: u64) -> ToolArgs {
        let mut map = ToolArgs::new();
        map.insert("remaining".to_string(), json!(n));
        map
    }

    #[test]
    fn test_builtin_calculator() {
        for executor in executors(ToolLimits::default()) {
            let result = executor
                .execute_tool("calculator", args(json!({"operation": "add", "a": 2, "b": 3})))
                .unwrap();
            assert_eq!(result, json!(5));
        }
    }

    #[test]
    fn test_unknown_tool_is_distinct_from_failure() {
        for executor in executors(ToolLimits::default()) {
            let err = executor.execute_tool("nope", ToolArgs::new()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnknownTool);

            let err = executor
                .execute_tool(
                    "calculator",
                    args(json!({"operation": "divide", "a": 1, "b": 0})),
                )
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
            assert!(err.to_string().contains("division by zero"));
        }
    }

    #[test]
    fn test_recursion_within_budget() {
        for executor in executors(limits(3, Duration::from_secs(5))) {
            executor.register_tool(recursive_tool());
            let depth = executor
                .execute_tool("recurse", args_with_remaining(3))
                .unwrap();
            assert_eq!(depth, json!(3));
        }
    }

    #[test]
    fn test_recursion_limit_exceeded() {
        for executor in executors(limits(3, Duration::from_secs(5))) {
            executor.register_tool(recursive_tool());
            let err = executor
                .execute_tool("recurse", args_with_remaining(4))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::RecursionLimitExceeded);
            match err {
                EngineError::RecursionLimitExceeded { depth, max } => {
                    assert_eq!(depth, 4);
                    assert_eq!(max, 3);
                }
                other => panic!("unexpected error {:?}", other),
            }
        }
    }

    #[test]
    fn test_zero_depth_forbids_nesting() {
        for executor in executors(limits(0, Duration::from_secs(5))) {
            executor.register_tool(recursive_tool());
            assert_eq!(
                executor
                    .execute_tool("recurse", args_with_remaining(0))
                    .unwrap(),
                json!(0)
            );
            assert_eq!(
                executor
                    .execute_tool("recurse", args_with_remaining(1))
                    .unwrap_err()
                    .kind(),
                ErrorKind::RecursionLimitExceeded
            );
        }
    }

    #[test]
    fn test_nested_unknown_tool() {
        for executor in executors(ToolLimits::default()) {
            executor.register_tool(Arc::new(FnTool::new("outer", "", |_, ctx| {
                ctx.call_tool("ghost", ToolArgs::new())
            })));
            let err = executor.execute_tool("outer", ToolArgs::new()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnknownTool);
        }
    }

    #[test]
    fn test_nested_failure_is_wrapped() {
        for executor in executors(ToolLimits::default()) {
            executor.register_tool(Arc::new(FnTool::new("outer", "", |_, ctx| {
                let mut inner = ToolArgs::new();
                inner.insert("operation".into(), json!("divide"));
                inner.insert("a".into(), json!(1));
                inner.insert("b".into(), json!(0));
                ctx.call_tool("calculator", inner)
            })));
            match executor.execute_tool("outer", ToolArgs::new()).unwrap_err() {
                EngineError::ExecutionFailed { name, cause } => {
                    assert_eq!(name, "outer");
                    assert!(cause.contains("division by zero"));
                }
                other => panic!("unexpected error {:?}", other),
            }
        }
    }

    #[test]
    fn test_timeout() {
        for executor in executors(limits(3, Duration::from_millis(100))) {
            executor.register_tool(Arc::new(FnTool::new("sleepy", "", |_, _| {
                thread::sleep(Duration::from_millis(600));
                Ok(Value::Null)
            })));

            let started = Instant::now();
            let err = executor.execute_tool("sleepy", ToolArgs::new()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Timeout);
            assert!(started.elapsed() < Duration::from_secs(2));
        }
    }

    #[test]
    fn test_panicking_tool() {
        for executor in executors(ToolLimits::default()) {
            executor.register_tool(Arc::new(FnTool::new("explode", "", |_, _| {
                panic!("kaboom")
            })));
            let err = executor.execute_tool("explode", ToolArgs::new()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
            assert!(err.to_string().contains("kaboom"));

            // Executor keeps working afterwards
            assert!(executor
                .execute_tool("text_processor", args(json!({"text": "a b", "operation": "word_count"})))
                .is_ok());
        }
    }

    #[test]
    fn test_execute_tools_isolates_failures() {
        for executor in executors(ToolLimits::default()) {
            let results = executor.execute_tools(vec![
                ("calculator", args(json!({"operation": "multiply", "a": 4, "b": 5}))),
                ("missing", ToolArgs::new()),
                ("text_processor", args(json!({"text": "abc", "operation": "uppercase"}))),
            ]);

            assert_eq!(results.len(), 3);
            assert_eq!(results[0].as_ref().unwrap(), &json!(20));
            assert_eq!(
                results[1].as_ref().unwrap_err().kind(),
                ErrorKind::UnknownTool
            );
            assert_eq!(results[2].as_ref().unwrap(), &json!("ABC"));
        }
    }

    #[test]
    fn test_unbounded_timeout_does_not_overflow() {
        for executor in executors(limits(3, Duration::MAX)) {
            executor.register_tool(recursive_tool());
            assert_eq!(
                executor
                    .execute_tool("recurse", args_with_remaining(2))
                    .unwrap(),
                json!(2)
            );
            assert_eq!(
                executor
                    .execute_tool("calculator", args(json!({"operation": "add", "a": 1, "b": 1})))
                    .unwrap(),
                json!(2)
            );
        }
    }

    #[test]
    fn test_implementation_is_requested_backend() {
        for backend in [Backend::Native, Backend::Fallback] {
            let executor =
                AcceleratedToolExecutor::with_backend(backend, ToolLimits::default()).unwrap();
            assert_eq!(executor.implementation(), backend);
        }
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let bad = ToolLimits {
            timeout: Duration::ZERO,
            ..ToolLimits::default()
        };
        assert!(AcceleratedToolExecutor::with_backend(Backend::Fallback, bad).is_err());
    }
}
