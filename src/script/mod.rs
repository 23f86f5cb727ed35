//! Script execution subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher / admin eval / watcher
//!     → serializer.rs (FIFO queue, single worker thread)
//!     → engine.rs (RhaiEngine, one execution at a time)
//!     → bindings.rs (Rhai functions and modules)
//!     → host.rs (commands against the scope's context or a held connection)
//!     → paths.rs (the `path::` helpers), commands.rs (the `help` table)
//! ```
//!
//! # Design Decisions
//! - Every execution carries an explicit [`ExecutionScope`]; host commands
//!   see it only while that execution runs, there is no global current request
//! - The engine is owned by one thread, so it never needs to be `Sync`

pub mod bindings;
pub mod commands;
pub mod engine;
pub mod host;
pub mod paths;
pub mod serializer;
pub mod watcher;

use std::sync::Arc;

use crate::http::context::RequestContext;

pub use engine::{EngineLimits, RhaiEngine, ScriptEngine};
pub use host::{Host, Target};
pub use serializer::ExecutionSerializer;

/// Sink for `print`/`puts` output of one execution.
pub type OutputFn = Arc<dyn Fn(&str) + Send + Sync>;

/// What one execution may act upon.
#[derive(Clone, Default)]
pub struct ExecutionScope {
    /// The request that started the execution, if any.
    pub context: Option<Arc<RequestContext>>,
    /// Where script output goes; the `script` log target when unset.
    pub output: Option<OutputFn>,
}

impl ExecutionScope {
    /// Scope bound to a request.
    pub fn for_request(context: Arc<RequestContext>) -> Self {
        Self {
            context: Some(context),
            output: None,
        }
    }

    /// Scope with no request, used for startup, reloads and callbacks.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, output: OutputFn) -> Self {
        self.output = Some(output);
        self
    }

    /// Send one line of script output to the sink.
    pub fn emit(&self, text: &str) {
        match &self.output {
            Some(output) => output(text),
            None => tracing::info!(target: "script", "{text}"),
        }
    }
}

impl std::fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("context", &self.context.as_ref().map(|ctx| ctx.id()))
            .field("output", &self.output.is_some())
            .finish()
    }
}
