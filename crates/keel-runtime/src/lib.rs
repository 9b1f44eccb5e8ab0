//! Lifecycle manager for an embedded WebAssembly runtime.
//!
//! The runtime is brought up once per process, driven through a narrow
//! evaluate entry point and torn down exactly once, whichever way the host
//! leaves the owning scope. [`LifecycleCoordinator`] strings the steps
//! together; [`RuntimeHandle`] and [`evaluate`] are available for hosts that
//! need finer control.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use keel_runtime::{CodeUnit, LifecycleCoordinator, RuntimeConfig};
//!
//! # fn run() -> Result<(), keel_runtime::RuntimeError> {
//! let coordinator = LifecycleCoordinator::new(RuntimeConfig::default());
//! let outcomes = coordinator.run(&[
//!     CodeUnit::from("1 + 1"),
//!     CodeUnit::from("div(1, 0)"),
//!     CodeUnit::from("println(sqrt(2.0))"),
//! ])?;
//!
//! for outcome in &outcomes {
//!     println!("{outcome:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Driving the handle directly
//!
//! ```rust,no_run
//! use keel_runtime::{affinity, evaluate, CodeUnit, RuntimeConfig, RuntimeHandle};
//!
//! # fn run() -> Result<(), keel_runtime::RuntimeError> {
//! affinity::register_current_thread();
//! let handle: RuntimeHandle = RuntimeHandle::initialized(RuntimeConfig::default())?;
//! let outcome = evaluate(&handle, &CodeUnit::from("sqrt(2.0)"))?;
//! assert!(outcome.is_success());
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod affinity;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod evaluator;
pub mod foreign;
pub mod handle;
pub mod outcome;
pub mod wasm;

#[cfg(test)]
mod testing;

pub use affinity::{ThreadAffinityToken, register_current_thread};
pub use config::{EngineConfig, RuntimeConfig};
pub use coordinator::{LifecycleCoordinator, StopHandle};
pub use error::RuntimeError;
pub use evaluator::evaluate;
pub use foreign::{Evaluated, ForeignError, ForeignRuntime};
pub use handle::{RuntimeHandle, RuntimeSlot, RuntimeState};
pub use outcome::{CodeUnit, EvalOutcome, Value};
pub use wasm::WasmRuntime;
