use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::affinity;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::evaluator;
use crate::foreign::{ForeignError, ForeignRuntime};
use crate::handle::{RuntimeHandle, RuntimeSlot};
use crate::outcome::{CodeUnit, EvalOutcome};
use crate::wasm::WasmRuntime;

/// Cooperative stop request shared with a signal handler or another thread.
///
/// The coordinator checks it between code units; an evaluation that is
/// already running is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives the whole lifecycle: register, initialize, evaluate, shut down.
#[derive(Debug)]
pub struct LifecycleCoordinator<'s> {
    slot: &'s RuntimeSlot,
    config: RuntimeConfig,
    stop: StopHandle,
}

impl LifecycleCoordinator<'static> {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_slot(RuntimeSlot::process(), config)
    }
}

impl<'s> LifecycleCoordinator<'s> {
    pub fn with_slot(slot: &'s RuntimeSlot, config: RuntimeConfig) -> Self {
        Self {
            slot,
            config,
            stop: StopHandle::default(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Evaluate `units` in order on the Wasm runtime.
    pub fn run(&self, units: &[CodeUnit]) -> Result<Vec<EvalOutcome>, RuntimeError> {
        self.run_with(units, WasmRuntime::init)
    }

    /// Evaluate `units` in order on a runtime built by `init`.
    ///
    /// Failed units are recorded and the next unit is attempted. If
    /// initialization fails nothing is evaluated and the error is returned.
    /// Any other error stops the run and is returned after the runtime has
    /// been shut down. Shutdown happens exactly once per successful
    /// initialization, also when the calling thread unwinds.
    pub fn run_with<B, F>(
        &self,
        units: &[CodeUnit],
        init: F,
    ) -> Result<Vec<EvalOutcome>, RuntimeError>
    where
        B: ForeignRuntime,
        F: FnOnce(&RuntimeConfig) -> Result<B, ForeignError>,
    {
        affinity::register_current_thread();

        // Dropping the handle shuts it down, whichever way we leave.
        let handle: RuntimeHandle<'s, B> = RuntimeHandle::in_slot(self.slot, self.config.clone());
        handle.initialize_with(init)?;

        tracing::info!(units = units.len(), "Running code units");

        let mut outcomes = Vec::with_capacity(units.len());
        for unit in units {
            if self.stop.is_requested() {
                tracing::warn!(
                    completed = outcomes.len(),
                    skipped = units.len() - outcomes.len(),
                    "Stop requested, skipping remaining units"
                );
                break;
            }

            match evaluator::evaluate(&handle, unit) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(unit = unit.label(), "Aborting run: {e}");
                    handle.shutdown();
                    return Err(e);
                }
            }
        }

        handle.shutdown();

        let failures = outcomes.iter().filter(|o| !o.is_success()).count();
        tracing::info!(evaluated = outcomes.len(), failures, "Run complete");
        Ok(outcomes)
    }
}
