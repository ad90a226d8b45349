//! Bridge-wide error type.

use std::fmt;

/// Error codes a server actor may return in the `error` field of a response
/// packet. Codes outside the known set are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorError {
    /// The actor cannot service the request in its current state. Benign
    /// during pause/resume races.
    WrongState,
    /// No script matches the requested location.
    NoScript,
    /// The requested line/column carries no executable code.
    NoCodeAtLineColumn,
    UnknownMethod,
    Other { code: String, message: String },
}

impl ActorError {
    pub fn from_packet(code: &str, message: String) -> Self {
        match code {
            "wrongState" => ActorError::WrongState,
            "noScript" => ActorError::NoScript,
            "noCodeAtLineColumn" => ActorError::NoCodeAtLineColumn,
            "unknownMethod" => ActorError::UnknownMethod,
            _ => ActorError::Other {
                code: code.to_string(),
                message,
            },
        }
    }
}

impl fmt::Display for ActorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorError::WrongState => write!(f, "wrongState"),
            ActorError::NoScript => write!(f, "noScript"),
            ActorError::NoCodeAtLineColumn => write!(f, "noCodeAtLineColumn"),
            ActorError::UnknownMethod => write!(f, "unknownMethod"),
            ActorError::Other { code, message } => write!(f, "{code}: {message}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- transport errors ------------------------------------------
    #[error("packet decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed packet frame")]
    Truncated,
    #[error("remote stream closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),

    // --------------------------------- protocol errors -------------------------------------------
    #[error("connection is down")]
    Disconnected,
    #[error("actor `{actor}`: {kind}")]
    Actor { actor: String, kind: ActorError },
    #[error("unexpected response shape from `{0}`")]
    UnexpectedResponse(String),

    // --------------------------------- session errors --------------------------------------------
    #[error("cannot connect to the browser: {0}")]
    Connect(String),
    #[error("unsupported browser build: {0}")]
    Unsupported(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("no local path derivable for `{0}`")]
    PathMappingMiss(String),
    #[error("thread {0} not found")]
    ThreadNotFound(i64),
    #[error("frame {0} not found")]
    FrameNotFound(i64),
    #[error("variables reference {0} is not valid")]
    StaleVariablesReference(i64),

    // --------------------------------- configuration errors --------------------------------------
    #[error("bad skip-files pattern: {0}")]
    Glob(#[from] glob::PatternError),
    #[error("source map error: {0}")]
    SourceMap(#[from] sourcemap::Error),
    #[error("launch error: {0}")]
    Launch(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Return a hint to the session - continue serving the editor after this
    /// error or tear the whole session down.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Actor { .. } => false,
            Error::UnexpectedResponse(_) => false,
            Error::Timeout(_) => false,
            Error::PathMappingMiss(_) => false,
            Error::ThreadNotFound(_) => false,
            Error::FrameNotFound(_) => false,
            Error::StaleVariablesReference(_) => false,
            Error::Glob(_) => false,
            Error::SourceMap(_) => false,
            Error::Launch(_) => false,

            // transport loss and startup failures end the session
            Error::Decode(_) => true,
            Error::Truncated => true,
            Error::Closed => true,
            Error::Io(_) => true,
            Error::Disconnected => true,
            Error::Connect(_) => true,
            Error::Unsupported(_) => true,
        }
    }

    /// True for the benign pause/resume race: the thread already left the
    /// state the request assumed.
    pub fn is_wrong_state(&self) -> bool {
        matches!(
            self,
            Error::Actor {
                kind: ActorError::WrongState,
                ..
            }
        )
    }
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(target: "session", "{:#}", e);
                None
            }
        }
    };
    ($res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(target: "session", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}
