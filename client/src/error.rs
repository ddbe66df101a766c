use std::fmt;

/// Failures surfaced by client sessions and bus transports.
#[derive(Debug)]
pub enum ClientError {
    Io(std::io::Error),
    Codec(bincode::Error),
    /// The session task or the transport behind a channel has stopped.
    ChannelClosed,
    /// The bus connection was closed by [`crate::bus::Bus::disconnect`].
    NotConnected,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(e) => write!(f, "I/O error: {}", e),
            ClientError::Codec(e) => write!(f, "encoding error: {}", e),
            ClientError::ChannelClosed => write!(f, "session channel closed"),
            ClientError::NotConnected => write!(f, "not connected"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Io(e) => Some(e),
            ClientError::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e)
    }
}

impl From<bincode::Error> for ClientError {
    fn from(e: bincode::Error) -> Self {
        ClientError::Codec(e)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ClientError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ClientError::ChannelClosed
    }
}
