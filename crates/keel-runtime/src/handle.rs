use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::ThreadId;

use crate::affinity;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::foreign::{ForeignError, ForeignRuntime};
use crate::wasm::WasmRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RuntimeState {
    Uninitialized = 0,
    Ready = 1,
    ShuttingDown = 2,
    Terminated = 3,
}

impl RuntimeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::Ready,
            2 => Self::ShuttingDown,
            _ => Self::Terminated,
        }
    }
}

/// The right to bring one foreign runtime to life.
///
/// A slot is claimed by the first successful `initialize()` of any handle
/// bound to it and is never handed out again, even after that runtime shut
/// down: the engine's global state is not re-entered.
#[derive(Debug)]
pub struct RuntimeSlot {
    claimed: AtomicBool,
}

static PROCESS_SLOT: RuntimeSlot = RuntimeSlot::new();

impl RuntimeSlot {
    /// An isolated slot, independent from the process slot.
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// The slot shared by the whole process.
    pub fn process() -> &'static RuntimeSlot {
        &PROCESS_SLOT
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }
}

impl Default for RuntimeSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of the embedded runtime instance.
///
/// A handle starts `Uninitialized`, becomes `Ready` after [`initialize`] and
/// ends `Terminated` after [`shutdown`]. Dropping the handle shuts it down, so
/// the runtime's exit hook runs on every path out of the owning scope.
///
/// # Threading
///
/// The handle is `Sync` when the backend is `Send`. Every call into the
/// backend holds the handle's runtime lock; whether threads other than the
/// initializing one may take that lock is decided by
/// [`RuntimeConfig::serialize_calls`] and enforced by the evaluator.
///
/// [`initialize`]: RuntimeHandle::initialize
/// [`shutdown`]: RuntimeHandle::shutdown
pub struct RuntimeHandle<'s, B: ForeignRuntime = WasmRuntime> {
    slot: &'s RuntimeSlot,
    config: RuntimeConfig,
    state: AtomicU8,
    /// Serializes initialize/shutdown against each other.
    transition: Mutex<()>,
    runtime: Mutex<Option<B>>,
    owner: OnceLock<ThreadId>,
}

impl<B: ForeignRuntime> RuntimeHandle<'static, B> {
    /// A handle bound to the process slot.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::in_slot(RuntimeSlot::process(), config)
    }

    /// Create a handle on the process slot and initialize it.
    pub fn initialized(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let handle = Self::new(config);
        handle.initialize()?;
        Ok(handle)
    }
}

impl<'s, B: ForeignRuntime> RuntimeHandle<'s, B> {
    pub fn in_slot(slot: &'s RuntimeSlot, config: RuntimeConfig) -> Self {
        Self {
            slot,
            config,
            state: AtomicU8::new(RuntimeState::Uninitialized as u8),
            transition: Mutex::new(()),
            runtime: Mutex::new(None),
            owner: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn state(&self) -> RuntimeState {
        RuntimeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == RuntimeState::Ready
    }

    /// The thread that initialized the runtime.
    pub fn owner(&self) -> Option<ThreadId> {
        self.owner.get().copied()
    }

    /// Bring up the backend with [`ForeignRuntime::init`].
    pub fn initialize(&self) -> Result<(), RuntimeError> {
        self.initialize_with(B::init)
    }

    /// Bring up the backend with a custom constructor.
    ///
    /// Fails with `AlreadyInitialized` unless the handle is `Uninitialized` and
    /// its slot is unclaimed. When the constructor fails the slot is released
    /// and the handle stays `Uninitialized`.
    pub fn initialize_with<F>(&self, init: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(&RuntimeConfig) -> Result<B, ForeignError>,
    {
        let _transition = lock(&self.transition);

        if self.state() != RuntimeState::Uninitialized {
            tracing::warn!(state = ?self.state(), "Refusing to initialize runtime twice");
            return Err(RuntimeError::AlreadyInitialized);
        }

        let token = affinity::require_registered()?;
        if self.config.require_init_on_main_thread && !token.is_primary() {
            return Err(RuntimeError::NotMainThread(token.thread_id()));
        }

        if !self.slot.claim() {
            tracing::warn!("Runtime slot already claimed by another handle");
            return Err(RuntimeError::AlreadyInitialized);
        }

        tracing::info!(backend = B::NAME, thread = ?token.thread_id(), "Initializing runtime");

        let result = panic::catch_unwind(AssertUnwindSafe(|| init(&self.config)))
            .unwrap_or_else(|payload| Err(ForeignError::Fatal(panic_message(&*payload))));

        match result {
            Ok(runtime) => {
                *lock(&self.runtime) = Some(runtime);
                let _ = self.owner.set(token.thread_id());
                self.set_state(RuntimeState::Ready);
                tracing::info!(backend = B::NAME, "Runtime ready");
                Ok(())
            }
            Err(e) => {
                self.slot.release();
                tracing::error!(backend = B::NAME, "Runtime initialization failed: {e}");
                Err(RuntimeError::InitFailed(e.to_string()))
            }
        }
    }

    /// Tear the runtime down. Safe to call any number of times; only the first
    /// call on a `Ready` handle reaches the backend's exit hook.
    ///
    /// Waits for an in-flight evaluation to return before running the hook.
    pub fn shutdown(&self) {
        let _transition = lock(&self.transition);

        match self.state() {
            RuntimeState::Ready => {}
            RuntimeState::Uninitialized => {
                self.set_state(RuntimeState::Terminated);
                tracing::debug!("Runtime terminated before initialization");
                return;
            }
            RuntimeState::ShuttingDown | RuntimeState::Terminated => return,
        }

        self.set_state(RuntimeState::ShuttingDown);
        tracing::info!(backend = B::NAME, "Shutting down runtime");

        let runtime = lock(&self.runtime).take();
        if let Some(mut runtime) = runtime {
            let hook = panic::catch_unwind(AssertUnwindSafe(|| runtime.atexit_hook(0)));
            if let Err(payload) = hook {
                tracing::error!(
                    backend = B::NAME,
                    "Runtime exit hook panicked: {}",
                    panic_message(&*payload)
                );
            }
        }

        self.set_state(RuntimeState::Terminated);
        tracing::info!(backend = B::NAME, "Runtime terminated");
    }

    /// Error describing why the handle cannot accept calls right now.
    pub(crate) fn ensure_ready(&self) -> Result<(), RuntimeError> {
        match self.state() {
            RuntimeState::Ready => Ok(()),
            RuntimeState::Uninitialized | RuntimeState::ShuttingDown => {
                Err(RuntimeError::RuntimeNotReady)
            }
            RuntimeState::Terminated => Err(RuntimeError::RuntimeTerminated),
        }
    }

    /// Run `f` against the backend while holding the runtime lock.
    pub(crate) fn with_runtime<R>(&self, f: impl FnOnce(&mut B) -> R) -> Result<R, RuntimeError> {
        self.ensure_ready()?;
        let mut guard = lock(&self.runtime);
        // Shutdown may have finished while we waited for the lock.
        self.ensure_ready()?;
        match guard.as_mut() {
            Some(runtime) => Ok(f(runtime)),
            None => Err(RuntimeError::RuntimeTerminated),
        }
    }

    fn set_state(&self, state: RuntimeState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl<B: ForeignRuntime> Drop for RuntimeHandle<'_, B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<B: ForeignRuntime> fmt::Debug for RuntimeHandle<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("backend", &B::NAME)
            .field("state", &self.state())
            .field("owner", &self.owner())
            .field("config", &self.config)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}
