// Execution trace recorder modules
pub mod config;
pub mod culler;
pub mod error;
pub mod format;
pub mod harness;
pub mod platform;
pub mod prelude;
pub mod reader;
pub mod registers;
pub mod session;
pub mod strategy;


// Re-exports
pub use config::TraceConfig;
pub use error::{DecodeError, HarnessError, TraceError, ValidationError};
pub use session::{CpuEvent, MemoryAccess, TraceSession};
