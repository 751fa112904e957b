//! The main concepts of this mod are:
//!
//! The [ConnectionInterface](transport::ConnectionInterface) trait defines how to
//! send framed messages to a remote peer over an established connection.
//! See the [transport] module.
//!
//! The [TransportInterface](transport::TransportInterface) trait should be
//! implemented for each Transport. It dials endpoints, keeps the connections
//! in a pool and routes outgoing messages by connection id. See the [transport] module.
//!
//! The [TransportCallback](callback::TransportCallback) trait is used to let user handle
//! the events of a transport, including connection state change and
//! incoming messages. See the [callback] module.

pub mod callback;
pub mod transport;
