use std::fmt;

/// Errors that can surface while parsing the wire protocol or dispatching a command.
///
/// `Protocol` and `Command` variants are recoverable: the connection they were raised
/// on keeps running. `Io` is terminal for the connection it was raised on. Nothing in
/// this enum aborts the process; bootstrap failures (bad config, failed bind, AOF open)
/// are reported separately in `main`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Command(String),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        Error::Command(msg.into())
    }

    /// True for the handful of io::Error shapes that mean "the peer is gone", which
    /// the handler treats as a normal connection close rather than something to log
    /// as a protocol violation.
    pub fn is_peer_closed(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

impl fmt::Display for ErrorKindLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Small helper for log lines that want to name the error kind without the full Display text.
pub struct ErrorKindLabel(pub &'static str);

impl Error {
    pub fn kind_label(&self) -> ErrorKindLabel {
        match self {
            Error::Io(_) => ErrorKindLabel("io"),
            Error::Protocol(_) => ErrorKindLabel("protocol"),
            Error::Command(_) => ErrorKindLabel("command"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
