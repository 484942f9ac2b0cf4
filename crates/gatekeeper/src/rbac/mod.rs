//! Role-based authorization.
//!
//! - `registry` - Static role → permission mapping

pub mod registry;

pub use registry::{PermissionRegistry, RegistryError};
