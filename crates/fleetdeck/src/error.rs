use std::fmt;

/// Distinguishes "the remote never answered" from "we could not reach or
/// launch the remote shell at all". Non-zero remote exits are not errors
/// anywhere in this crate; they travel inside `CmdOutput`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Transport,
    Other,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self {
            kind: ErrorKind::Other,
            msg: msg.into(),
        }
    }

    pub fn timeout<M: Into<String>>(msg: M) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            msg: msg.into(),
        }
    }

    pub fn transport<M: Into<String>>(msg: M) -> Self {
        Self {
            kind: ErrorKind::Transport,
            msg: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Timeout => write!(f, "timeout: {}", self.msg),
            ErrorKind::Transport => write!(f, "transport: {}", self.msg),
            ErrorKind::Other => write!(f, "{}", self.msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
