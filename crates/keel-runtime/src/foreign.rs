use thiserror::Error;

use crate::config::RuntimeConfig;
use crate::outcome::Value;

/// What a successful `eval_string` call hands back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluated {
    pub value: Option<Value>,
    pub output: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ForeignError {
    /// The evaluated code raised an error. The runtime is still usable.
    #[error("{message}")]
    Exception {
        message: String,
        output: Vec<String>,
    },

    /// The runtime itself cannot continue.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ForeignError {
    pub fn exception(message: impl Into<String>) -> Self {
        Self::Exception {
            message: message.into(),
            output: Vec::new(),
        }
    }
}

/// The embedding contract of a foreign runtime.
///
/// Implementations are driven exclusively by [`RuntimeHandle`]: `init` runs at
/// most once per process slot, `eval_string` only while the handle is ready,
/// and `atexit_hook` exactly once for every successful `init`.
///
/// [`RuntimeHandle`]: crate::handle::RuntimeHandle
pub trait ForeignRuntime: Send + Sized + 'static {
    /// Short name for logs.
    const NAME: &'static str;

    fn init(config: &RuntimeConfig) -> Result<Self, ForeignError>;

    fn eval_string(&mut self, source: &str) -> Result<Evaluated, ForeignError>;

    /// Flush and finalize runtime state before the process exits.
    fn atexit_hook(&mut self, status: i32);
}
