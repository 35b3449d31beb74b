// src/runtime/mod.rs
//! Execution runtime
//!
//! This module runs host work on bounded worker pools:
//!
//! - **Dispatcher**: FIFO worker pool, tokio-backed (native) or std threads (fallback)
//! - **Task Executor**: concurrent task batches and single tasks under a timeout
//! - **Tool Executor**: named tool dispatch with recursion and time limits
//! - **Tools**: tool registry and the builtin tools
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────┐   ┌────────────────────────┐
//! │ AcceleratedTaskExecutor│   │ AcceleratedToolExecutor│
//! │   positional slots     │   │   depth + deadline     │
//! └───────────┬────────────┘   └───────────┬────────────┘
//!             │ submit(Job)                │
//!             ▼                            ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ Dispatcher  (Native: tokio  |  Fallback: threads)   │
//! │ at most N jobs running, the rest queued in order    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod dispatcher;
pub mod task_executor;
pub mod tool_executor;
pub mod tools;

// Re-export commonly used types
pub use dispatcher::{Dispatcher, DispatcherStats, FallbackDispatcher, NativeDispatcher};
pub use task_executor::{
    AcceleratedTaskExecutor, DefaultTaskHandler, TaskContext, TaskDescriptor, TaskHandler,
    TaskResult, TaskState,
};
pub use tool_executor::{AcceleratedToolExecutor, ToolContext, ToolLimits};
pub use tools::{FnTool, Tool, ToolArgs, ToolRegistry};

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
