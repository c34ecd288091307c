use std::error::Error;
use std::fmt;

const ERR_MSG_TIMEOUT: &str = "operation timed out";
const ERR_MSG_CLOSED: &str = "queue endpoint is closed";

/// Why a timed push did not complete.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PushFailReason {
    Timeout,
    Closed,
}

impl fmt::Display for PushFailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushFailReason::Timeout => write!(f, "{ERR_MSG_TIMEOUT}"),
            PushFailReason::Closed => write!(f, "{ERR_MSG_CLOSED}"),
        }
    }
}

/// Failed push. Hands the rejected value back to the caller so a timeout
/// never loses data.
#[derive(Debug)]
pub struct PushError<T> {
    pub value: Option<T>,
    pub reason: PushFailReason,
}

impl<T> PushError<T> {
    pub fn timeout(value: Option<T>) -> Self {
        Self {
            value,
            reason: PushFailReason::Timeout,
        }
    }

    pub fn closed(value: Option<T>) -> Self {
        Self {
            value,
            reason: PushFailReason::Closed,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.reason == PushFailReason::Timeout
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push failed: {}", self.reason)
    }
}

impl<T: fmt::Debug> Error for PushError<T> {}

/// Failed pop. A timeout is an outcome of normal traffic, not a fault.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PopError {
    Timeout,
    Closed,
}

impl fmt::Display for PopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopError::Timeout => write!(f, "{ERR_MSG_TIMEOUT}"),
            PopError::Closed => write!(f, "{ERR_MSG_CLOSED}"),
        }
    }
}

impl Error for PopError {}

/// Rejected claim of a queue endpoint half during topology construction.
#[derive(Debug)]
pub enum ClaimError {
    UnknownQueue {
        queue: String,
        module: String,
    },
    WrongElementType {
        queue: String,
        stored: &'static str,
        requested: &'static str,
    },
    AlreadyClaimed {
        queue: String,
        end: &'static str,
        by: String,
    },
}

impl fmt::Display for ClaimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimError::UnknownQueue { queue, module } => {
                write!(f, "module {module} references undeclared queue {queue}")
            }
            ClaimError::WrongElementType {
                queue,
                stored,
                requested,
            } => write!(
                f,
                "queue {queue} carries {stored}, claim requested {requested}"
            ),
            ClaimError::AlreadyClaimed { queue, end, by } => {
                write!(f, "{end} half of queue {queue} already claimed by {by}")
            }
        }
    }
}

impl Error for ClaimError {}

/// Fatal topology-construction failure.
#[derive(Debug)]
pub enum InitError {
    DuplicateQueue { name: String },
    DuplicateModule { name: String },
    UnknownKind { module: String, kind: String },
    Construction { module: String, source: anyhow::Error },
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::DuplicateQueue { name } => write!(f, "queue {name} declared twice"),
            InitError::DuplicateModule { name } => write!(f, "module name {name} claimed twice"),
            InitError::UnknownKind { module, kind } => {
                write!(f, "module {module}: no factory registered for kind {kind}")
            }
            InitError::Construction { module, source } => {
                write!(f, "module {module} failed to construct: {source:#}")
            }
        }
    }
}

impl Error for InitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InitError::Construction { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Why a command was rejected before touching any module.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum InvalidReason {
    Busy,
    ErrorLatched,
    WrongEntryState { expected: String, actual: String },
    Draining,
    MalformedPayload(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Busy => write!(f, "a command is already in flight"),
            InvalidReason::ErrorLatched => write!(f, "error flag is set and not acknowledged"),
            InvalidReason::WrongEntryState { expected, actual } => {
                write!(f, "entry state {expected} required, application is {actual}")
            }
            InvalidReason::Draining => write!(f, "application no longer accepts commands"),
            InvalidReason::MalformedPayload(msg) => write!(f, "malformed payload: {msg}"),
        }
    }
}

/// Outcome of command execution, propagated by value from the module
/// manager through the application controller to the caller.
#[derive(Debug)]
pub enum CommandError {
    /// Command arrived before topology initialization completed.
    NotInitialized { cmd: String },
    /// Rejected by validation; no state change, no module touched.
    Invalid { cmd: String, reason: InvalidReason },
    /// Exclusive dispatch matched a number of modules other than one.
    ConflictingMatch { cmd: String, matched: Vec<String> },
    /// One or more modules failed the command; lists every failing name.
    DispatchFailure { cmd: String, failed: Vec<String> },
}

impl CommandError {
    pub fn invalid(cmd: impl Into<String>, reason: InvalidReason) -> Self {
        CommandError::Invalid {
            cmd: cmd.into(),
            reason,
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::NotInitialized { cmd } => {
                write!(f, "command {cmd} received before initialization")
            }
            CommandError::Invalid { cmd, reason } => {
                write!(f, "command {cmd} rejected: {reason}")
            }
            CommandError::ConflictingMatch { cmd, matched } if matched.is_empty() => {
                write!(f, "command {cmd} matched no module")
            }
            CommandError::ConflictingMatch { cmd, matched } => {
                write!(
                    f,
                    "command {cmd} matched multiple modules: {}",
                    matched.join(", ")
                )
            }
            CommandError::DispatchFailure { cmd, failed } => {
                write!(
                    f,
                    "command {cmd} was not executed correctly by: {}",
                    failed.join(", ")
                )
            }
        }
    }
}

impl Error for CommandError {}
