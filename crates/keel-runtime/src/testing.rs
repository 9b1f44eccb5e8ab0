//! Scripted backend for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::RuntimeConfig;
use crate::foreign::{Evaluated, ForeignError, ForeignRuntime};
use crate::outcome::Value;

#[derive(Debug, Default)]
pub struct Calls {
    pub inits: AtomicUsize,
    pub evals: AtomicUsize,
    pub exits: AtomicUsize,
}

impl Calls {
    pub fn evals(&self) -> usize {
        self.evals.load(Ordering::SeqCst)
    }
    pub fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }
}

/// Understands a handful of sources: an integer literal evaluates to itself,
/// `fail` raises an exception, `fatal` reports a fatal error and `panic`
/// panics. `print:<text>` prints a line and yields nothing.
pub struct ScriptedRuntime {
    calls: Arc<Calls>,
}

impl ScriptedRuntime {
    pub fn factory(
        calls: &Arc<Calls>,
    ) -> impl FnOnce(&RuntimeConfig) -> Result<ScriptedRuntime, ForeignError> + use<> {
        let calls = Arc::clone(calls);
        move |_| {
            calls.inits.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedRuntime { calls })
        }
    }
}

impl ForeignRuntime for ScriptedRuntime {
    const NAME: &'static str = "scripted";

    fn init(_config: &RuntimeConfig) -> Result<Self, ForeignError> {
        Ok(Self {
            calls: Arc::default(),
        })
    }

    fn eval_string(&mut self, source: &str) -> Result<Evaluated, ForeignError> {
        self.calls.evals.fetch_add(1, Ordering::SeqCst);
        match source {
            "fail" => Err(ForeignError::Exception {
                message: "scripted failure".into(),
                output: vec!["before failure".into()],
            }),
            "fatal" => Err(ForeignError::Fatal("scripted fatal error".into())),
            "panic" => panic!("scripted panic"),
            other => {
                if let Some(text) = other.strip_prefix("print:") {
                    return Ok(Evaluated {
                        value: None,
                        output: vec![text.to_string()],
                    });
                }
                Ok(Evaluated {
                    value: other.trim().parse().ok().map(Value::Int),
                    output: Vec::new(),
                })
            }
        }
    }

    fn atexit_hook(&mut self, _status: i32) {
        self.calls.exits.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn relaxed_config() -> RuntimeConfig {
    RuntimeConfig {
        require_init_on_main_thread: false,
        ..RuntimeConfig::default()
    }
}
