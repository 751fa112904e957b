#![allow(missing_docs)]

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Transport is not started, call start first")]
    NotStarted,

    #[error("Transport is already started")]
    AlreadyStarted,

    #[error("Transport lock poisoned")]
    LockPoisoned,

    #[error("Endpoint {0} is unreachable")]
    EndpointNotFound(String),

    #[error("Handshake with {0} failed")]
    HandshakeFailed(String),

    #[error("Connection {0} is not open")]
    ConnectionNotOpen(String),

    #[error("Connection {0} already exists")]
    ConnectionAlreadyExists(String),

    #[error("Connection {0} not found, should connect first")]
    ConnectionNotFound(String),

    #[error("Connection {0} is released")]
    ConnectionReleased(String),
}
