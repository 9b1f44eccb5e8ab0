use std::thread::ThreadId;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime already initialized")]
    AlreadyInitialized,

    #[error("runtime is not ready")]
    RuntimeNotReady,

    #[error("runtime has been terminated")]
    RuntimeTerminated,

    #[error("thread {0:?} has not registered with the runtime")]
    ThreadNotRegistered(ThreadId),

    #[error("initialize must run on the primary registered thread, called from {0:?}")]
    NotMainThread(ThreadId),

    #[error("runtime is owned by thread {owner:?}, called from {caller:?}")]
    WrongThread { owner: ThreadId, caller: ThreadId },

    #[error("runtime initialization failed: {0}")]
    InitFailed(String),

    #[error("unrecoverable runtime fault: {0}")]
    UnrecoverableRuntimeFault(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Contract violations by the caller, as opposed to faults of the runtime.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInitialized
                | Self::RuntimeNotReady
                | Self::RuntimeTerminated
                | Self::ThreadNotRegistered(_)
                | Self::NotMainThread(_)
                | Self::WrongThread { .. }
        )
    }
}
