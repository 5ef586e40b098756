//! # vrouter Common
//!
//! Shared types, errors, and constants used across vrouter components.
//!
//! ## Modules
//! - `types` - Core data structures (SubnetBlock, LeaseState, ServiceDescriptor, etc.)
//! - `error` - The coordination error taxonomy
//! - `constants` - Defaults and the registry key layout

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Result, VrouterError};
pub use types::*;
