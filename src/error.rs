use thiserror::Error;

/// Errors raised by the process runtime (spawn, link, mailbox, exit).
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("mailbox is closed")]
    QueueClosed,

    /// The current process was killed; its mailbox was closed by another
    /// process. Unwinds the process body.
    #[error("the current process was killed")]
    ProcessKilled,

    /// A message could not be delivered because the target process already
    /// exited.
    #[error("process {0} has exited")]
    ProcessExited(crate::process::Pid),

    #[error("no pattern matched the message")]
    NoMatch,

    #[error("unknown PID {0}")]
    UnknownPid(crate::process::Pid),

    #[error("the current thread is already attached to a process")]
    AlreadyAttached,

    #[error("the current thread has no attached process")]
    NotAttached,
}

/// Errors raised by the wire protocol (framing and negotiation).
#[derive(Error, Debug)]
pub enum WireError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("frame payload exceeds the maximum of {max} bytes")]
    FrameTooLarge { max: usize },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("end of stream")]
    Eof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by a file transfer.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unknown transfer {0}")]
    UnknownTransfer(u32),

    #[error("transfer is not in a state that allows this operation")]
    InvalidState,
}

/// Crate-wide error, unifying the per-subsystem error enums at call
/// boundaries that can fail for more than one reason (e.g. the TCP
/// messenger, which can fail at the socket layer or the negotiation layer).
#[derive(Error, Debug)]
pub enum SparkError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
