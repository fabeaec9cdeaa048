//! # devhub-core
//!
//! Shared building blocks for the DevHub crates:
//!
//! - **Paths**: Locations under `~/.devhub` used by the vault and its callers
//! - **Environment**: Typed environment lookups and the acting user
//! - **Secrets**: Byte buffers that are zeroed on drop and never printed

pub mod env;
pub mod error;
pub mod paths;
pub mod secret;

// Re-exports for convenience
pub use error::ConfigError;
pub use secret::SecretBytes;
