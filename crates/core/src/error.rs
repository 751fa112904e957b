#![allow(missing_docs)]
//! Error of chordnet_core

use crate::dht::Did;

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors collections in chordnet-core.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Invalid identifier format: {0}")]
    InvalidIdentifierFormat(String),

    #[error("Identifier width {0} is not a multiple of 8 within 8..=512")]
    InvalidIdentifierWidth(usize),

    #[error("No connection to {0} could be established")]
    TransportUnavailable(Did),

    #[error("Remote call timed out")]
    CallTimeout,

    #[error("Remote call failed: {0}")]
    RemoteError(String),

    #[error("Transport error: {0}")]
    Transport(#[from] chordnet_transport::error::Error),

    #[error("Bincode serialization error")]
    BincodeSerialize(#[source] bincode::Error),

    #[error("Bincode deserialization error")]
    BincodeDeserialize(#[source] bincode::Error),

    #[error("Envelope version {0} is not supported")]
    EnvelopeVersionMismatch(String),

    #[error("Envelope ran out of hops on the way to {0}")]
    EnvelopeHopsExhausted(Did),

    #[error("No module registered as {0}")]
    UnknownModule(String),

    #[error("Module {0} is already registered")]
    ModuleAlreadyRegistered(String),

    #[error("Module {0} has no method {1}")]
    UnknownMethod(String, String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Not the owner of item {0}")]
    NotOwner(String),

    #[error("Unexpected store status: {0}")]
    UnexpectedStoreStatus(String),

    #[error("PeerRing lock poisoned")]
    DHTSyncLockError,

    #[error("Swarm lock poisoned")]
    SwarmSyncLockError,

    #[error("Send event through channel failed")]
    ChannelSendMessageFailed,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Node is not connected to any peer")]
    NotConnected,

    #[error("Lookup of {0} did not converge")]
    LookupNotConverged(Did),
}
