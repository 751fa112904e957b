//! Default using `TcpTransport` for native environment.
//! Also provide a `MemoryTransport` for testing and local simulation.

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "tcp")]
mod tcp;

#[cfg(feature = "memory")]
pub use crate::connections::memory::MemoryConnection;
#[cfg(feature = "memory")]
pub use crate::connections::memory::MemoryHub;
#[cfg(feature = "memory")]
pub use crate::connections::memory::MemoryTransport;
#[cfg(feature = "tcp")]
pub use crate::connections::tcp::TcpConnection;
#[cfg(feature = "tcp")]
pub use crate::connections::tcp::TcpTransport;
