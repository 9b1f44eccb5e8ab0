//! Per-thread registration with the embedded engine.
//!
//! Wasmtime keeps trap-handling state in thread-local storage that is normally
//! set up lazily on the first call into wasm. Registering a thread sets it up
//! eagerly and records the thread in the slot declared below, so every later
//! runtime operation can check that it runs on a registered thread.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use crate::error::RuntimeError;

static NEXT_ORDINAL: AtomicU64 = AtomicU64::new(1);
static PRIMARY_THREAD: OnceLock<ThreadId> = OnceLock::new();

thread_local! {
    static REGISTRATION: Cell<Option<Registration>> = const { Cell::new(None) };
}

#[derive(Clone, Copy)]
struct Registration {
    thread: ThreadId,
    ordinal: u64,
}

/// Proof that the current thread has registered with the runtime.
///
/// The token is neither `Send` nor `Sync`: it is only meaningful on the thread
/// that obtained it. Other threads must register themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadAffinityToken {
    thread: ThreadId,
    ordinal: u64,
    _thread_bound: PhantomData<*const ()>,
}

impl ThreadAffinityToken {
    fn from_registration(reg: Registration) -> Self {
        Self {
            thread: reg.thread,
            ordinal: reg.ordinal,
            _thread_bound: PhantomData,
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// Process-unique registration number, starting at 1.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// True for the first thread that ever registered in this process.
    pub fn is_primary(&self) -> bool {
        PRIMARY_THREAD.get() == Some(&self.thread)
    }
}

/// Register the calling thread. Calling it again on the same thread returns
/// the existing token.
pub fn register_current_thread() -> ThreadAffinityToken {
    REGISTRATION.with(|slot| {
        if let Some(reg) = slot.get() {
            return ThreadAffinityToken::from_registration(reg);
        }

        wasmtime::Engine::tls_eager_initialize();

        let thread = thread::current().id();
        PRIMARY_THREAD.get_or_init(|| thread);
        let reg = Registration {
            thread,
            ordinal: NEXT_ORDINAL.fetch_add(1, Ordering::Relaxed),
        };
        slot.set(Some(reg));

        tracing::debug!(thread = ?thread, ordinal = reg.ordinal, "Thread registered with runtime");
        ThreadAffinityToken::from_registration(reg)
    })
}

pub fn current_token() -> Option<ThreadAffinityToken> {
    REGISTRATION.with(|slot| slot.get().map(ThreadAffinityToken::from_registration))
}

pub fn is_registered() -> bool {
    current_token().is_some()
}

pub(crate) fn require_registered() -> Result<ThreadAffinityToken, RuntimeError> {
    current_token().ok_or_else(|| RuntimeError::ThreadNotRegistered(thread::current().id()))
}
