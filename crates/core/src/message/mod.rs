#![warn(missing_docs)]
//! Envelope and module dispatch.
mod envelope;
pub use envelope::Envelope;
pub use envelope::EnvelopeBody;

mod registry;
pub use registry::ModuleHandler;
pub use registry::ModuleRegistry;
pub use registry::SharedModuleHandler;
