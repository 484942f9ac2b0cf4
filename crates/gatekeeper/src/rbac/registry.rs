//! Role to permission mapping.
//!
//! The registry is loaded once at startup and never mutated. Roles are matched
//! case-insensitively (exact configured name first, then the upper-cased name);
//! permission strings are matched case-sensitively.

use crate::auth::Principal;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Permission map shipped with the service.
const BUILTIN_PERMISSIONS: &str = include_str!("../../config/permissions.json");

/// Errors loading a permission registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read permissions file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid permissions document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Immutable role → permissions mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionRegistry {
    roles: HashMap<String, Vec<String>>,
}

impl PermissionRegistry {
    /// Build a registry from an in-memory map.
    pub fn from_map(roles: HashMap<String, Vec<String>>) -> Self {
        Self { roles }
    }

    /// Parse a JSON object of `role → [permission, ...]`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Parse` if the document is not such an object.
    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        let roles: HashMap<String, Vec<String>> = serde_json::from_str(json)?;
        Ok(Self::from_map(roles))
    }

    /// Load a registry from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Io` if the file cannot be read and
    /// `RegistryError::Parse` if it is not a valid permissions document.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::from_json_str(&json)?;

        tracing::info!(
            target: "gatekeeper.rbac",
            path = %path.display(),
            role_count = registry.roles.len(),
            "Loaded permission registry"
        );
        Ok(registry)
    }

    /// The registry embedded in the binary.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Parse` only if the embedded document is broken.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_json_str(BUILTIN_PERMISSIONS)
    }

    /// Whether any of the principal's roles grants `permission`.
    pub fn has_permission(&self, principal: &Principal, permission: &str) -> bool {
        let mut seen = HashSet::new();

        principal
            .roles()
            .iter()
            .filter(|role| seen.insert(role.as_str()))
            .filter_map(|role| self.permissions_for(role))
            .any(|granted| granted.iter().any(|p| p == permission))
    }

    /// Permissions configured for `role`.
    ///
    /// Tries the role as given, then its upper-cased form.
    pub fn permissions_for(&self, role: &str) -> Option<&[String]> {
        self.roles
            .get(role)
            .or_else(|| self.roles.get(&role.to_uppercase()))
            .map(Vec::as_slice)
    }

    /// Union of the permissions granted to the principal, sorted.
    pub fn effective_permissions(&self, principal: &Principal) -> Vec<String> {
        principal
            .roles()
            .iter()
            .filter_map(|role| self.permissions_for(role))
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Configured role names, sorted.
    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self.roles.keys().map(String::as_str).collect();
        roles.sort_unstable();
        roles
    }
}
