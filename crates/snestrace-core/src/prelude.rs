//! Convenient imports for emulator integrations
//!
//! Pull in everything commonly needed in one line:
//! ```rust
//! use snestrace_core::prelude::*;
//! ```

// Recorder API
pub use crate::config::TraceConfig;
pub use crate::session::{CpuEvent, MemoryAccess, TraceSession};

// Traits the host emulator implements
pub use crate::platform::{RegisterCapture, RomDescriptor, UniqueIdProvider, WorkingMemoryAccess};
pub use crate::platform::{RandomIdProvider, RomInfo};

// Register capture
pub use crate::registers::{LazyFlags, RawRegisters, StatusFlags};

// Wire format
pub use crate::format::{FormatVersion, RomMode};
pub use crate::reader::{TraceReader, TraceRecord};
pub use crate::strategy::StrategyKind;

pub use crate::error::{TraceError, ValidationError};
