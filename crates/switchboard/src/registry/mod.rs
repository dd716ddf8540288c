//! Version-pinned handler registry.
//!
//! The [`HandlerRegistry`] stores one registration per `module@version`.
//! Several versions of a module may coexist. Duplicate registrations are
//! rejected rather than overwritten. Lookups hand out cloned
//! [`Registration`] snapshots so callers can never mutate the registry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::envelope::{Envelope, MessageKind, ModuleVersion, Version, VersionParseError};
use crate::handler::{Handler, HandlerDescriptor};

/// A handler bound to an exact module version.
#[derive(Clone)]
pub struct Registration {
    module_version: ModuleVersion,
    handler: Arc<dyn Handler>,
    descriptor: HandlerDescriptor,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("module_version", &self.module_version)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl Registration {
    /// Module name.
    #[must_use]
    pub fn module(&self) -> &str {
        self.module_version.module()
    }

    /// Registered version.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.module_version.version()
    }

    /// Pinned module version.
    #[must_use]
    pub const fn module_version(&self) -> &ModuleVersion {
        &self.module_version
    }

    /// `module@x.y.z` key.
    #[must_use]
    pub fn key(&self) -> String {
        self.module_version.key()
    }

    /// Accepted schemas and kinds.
    #[must_use]
    pub const fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    /// Shared handle to the handler.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }

    /// Checks the descriptor and the handler's own `can_handle`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first capability the envelope lacks.
    pub fn accepts(&self, envelope: &Envelope) -> Result<(), String> {
        if !self.descriptor.supports_schema(envelope.payload_schema()) {
            return Err(format!(
                "payload schema '{}' is not supported by {}",
                envelope.payload_schema(),
                self.module_version
            ));
        }
        if !self.descriptor.supports_kind(envelope.kind()) {
            return Err(format!(
                "kind '{}' is not supported by {}",
                envelope.kind(),
                self.module_version
            ));
        }
        if !self.handler.can_handle(envelope) {
            return Err(format!("{} declined the envelope", self.module_version));
        }
        Ok(())
    }
}

/// Errors raised while registering handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The exact module version is already registered.
    #[error("handler '{key}' is already registered")]
    Duplicate {
        /// `module@x.y.z` key.
        key: String,
    },

    /// The module name or version could not be parsed.
    #[error("invalid handler registration '{module}@{version}': {source}")]
    InvalidVersion {
        /// Module name supplied.
        module: String,
        /// Version string supplied.
        version: String,
        /// Parser failure.
        #[source]
        source: VersionParseError,
    },
}

/// Registry of handlers keyed by module and exact version.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use switchboard::{HandlerDescriptor, HandlerRegistry};
/// # use switchboard::{Envelope, ExecutionContext, Handler, HandlerError};
/// # struct Echo;
/// # impl Handler for Echo {
/// #     fn handle(&self, e: &Envelope, _: &ExecutionContext)
/// #         -> Result<serde_json::Value, HandlerError> { Ok(e.payload().clone()) }
/// # }
///
/// let mut registry = HandlerRegistry::new();
/// registry
///     .register("memory", "3.21.0", Arc::new(Echo), HandlerDescriptor::new())
///     .expect("registration succeeds");
/// assert!(registry.get("memory", None).is_some());
/// ```
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    modules: HashMap<String, BTreeMap<Version, Registration>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.list().iter().map(Registration::key))
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` as `module@version`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidVersion`] when `module@version` is not
    /// a valid pinned version, or [`RegistryError::Duplicate`] when it is
    /// already registered.
    pub fn register(
        &mut self,
        module: &str,
        version: &str,
        handler: Arc<dyn Handler>,
        descriptor: HandlerDescriptor,
    ) -> Result<(), RegistryError> {
        let module_version = format!("{module}@{version}")
            .parse::<ModuleVersion>()
            .map_err(|source| RegistryError::InvalidVersion {
                module: module.to_owned(),
                version: version.to_owned(),
                source,
            })?;
        let versions = self.modules.entry(module.to_owned()).or_default();
        if versions.contains_key(&module_version.version()) {
            return Err(RegistryError::Duplicate {
                key: module_version.key(),
            });
        }
        versions.insert(
            module_version.version(),
            Registration {
                module_version,
                handler,
                descriptor,
            },
        );
        Ok(())
    }

    /// Looks up `module` at an exact version, or its highest version when
    /// `version` is `None`.
    #[must_use]
    pub fn get(&self, module: &str, version: Option<Version>) -> Option<Registration> {
        let versions = self.modules.get(module)?;
        match version {
            Some(exact) => versions.get(&exact).cloned(),
            None => versions.values().next_back().cloned(),
        }
    }

    /// Exact lookup used at dispatch time. Never falls back to another version.
    #[must_use]
    pub fn resolve(&self, module_version: &ModuleVersion) -> Option<Registration> {
        self.get(module_version.module(), Some(module_version.version()))
    }

    /// Highest registered version of `module`.
    #[must_use]
    pub fn latest(&self, module: &str) -> Option<Registration> {
        self.get(module, None)
    }

    /// Registered versions of `module`, ascending.
    #[must_use]
    pub fn versions(&self, module: &str) -> Vec<Version> {
        self.modules
            .get(module)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every registration, ordered by module then version.
    #[must_use]
    pub fn list(&self) -> Vec<Registration> {
        let mut all: Vec<Registration> = self
            .modules
            .values()
            .flat_map(|versions| versions.values().cloned())
            .collect();
        all.sort_by(|left, right| left.module_version.cmp(&right.module_version));
        all
    }

    /// Registrations that accept `kind`.
    #[must_use]
    pub fn list_by_kind(&self, kind: MessageKind) -> Vec<Registration> {
        self.list()
            .into_iter()
            .filter(|registration| registration.descriptor.supports_kind(kind))
            .collect()
    }

    /// Number of registrations across all modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.values().map(BTreeMap::len).sum()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests;
