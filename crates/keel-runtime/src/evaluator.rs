use std::panic::{self, AssertUnwindSafe};

use crate::affinity;
use crate::error::RuntimeError;
use crate::foreign::{ForeignError, ForeignRuntime};
use crate::handle::{RuntimeHandle, panic_message};
use crate::outcome::{CodeUnit, EvalOutcome};

/// Submit `unit` to the runtime behind `handle`.
///
/// Exceptions raised by the evaluated code come back as
/// [`EvalOutcome::Failure`]. `Err` is reserved for misuse (handle not ready,
/// thread not registered, wrong thread under the single-threaded policy) and
/// for [`RuntimeError::UnrecoverableRuntimeFault`].
pub fn evaluate<B: ForeignRuntime>(
    handle: &RuntimeHandle<'_, B>,
    unit: &CodeUnit,
) -> Result<EvalOutcome, RuntimeError> {
    handle.ensure_ready()?;

    let token = affinity::require_registered()?;
    if !handle.config().serialize_calls {
        if let Some(owner) = handle.owner() {
            if owner != token.thread_id() {
                return Err(RuntimeError::WrongThread {
                    owner,
                    caller: token.thread_id(),
                });
            }
        }
    }

    tracing::debug!(unit = unit.label(), bytes = unit.source().len(), "Evaluating");

    let result = handle.with_runtime(|runtime| {
        panic::catch_unwind(AssertUnwindSafe(|| runtime.eval_string(unit.source())))
    })?;

    match result {
        Ok(Ok(evaluated)) => Ok(EvalOutcome::Success {
            value: evaluated.value,
            output: evaluated.output,
        }),
        Ok(Err(ForeignError::Exception { message, output })) => {
            tracing::warn!(unit = unit.label(), "Evaluation failed: {message}");
            Ok(EvalOutcome::Failure {
                diagnostic: message,
                output,
            })
        }
        Ok(Err(ForeignError::Fatal(message))) => {
            tracing::error!(unit = unit.label(), "Runtime fault: {message}");
            Err(RuntimeError::UnrecoverableRuntimeFault(message))
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            tracing::error!(unit = unit.label(), "Runtime panicked: {message}");
            Err(RuntimeError::UnrecoverableRuntimeFault(format!(
                "runtime panicked: {message}"
            )))
        }
    }
}
