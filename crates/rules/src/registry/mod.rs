//! Capability registries: a catalog of named factories plus the shared
//! dependency bundle they build from.
//!
//! The same generic [`Registry`] backs triggers, actions, conditions and
//! templates. The bundle is installed with [`Registry::set_context`] and may
//! be replaced at any time; `create` always builds from one complete bundle.

mod bundle;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error};

use crate::config::TypedConfig;
use crate::error::{CreateError, RegistryError};

pub use bundle::{ActionContext, ConditionContext, TemplateContext, TriggerContext};

/// Builds one instance from its config block and the active bundle.
pub type Factory<C, B, T> = fn(&C, &Arc<B>) -> Result<Arc<T>, CreateError>;

/// A canonical type name and its constructor. Names without a constructor
/// are recognised in config but cannot be built on this host.
pub struct CatalogEntry<C, B, T: ?Sized> {
    pub name: &'static str,
    pub factory: Option<Factory<C, B, T>>,
}

impl<C, B, T: ?Sized> CatalogEntry<C, B, T> {
    pub const fn new(name: &'static str, factory: Factory<C, B, T>) -> Self {
        Self {
            name,
            factory: Some(factory),
        }
    }

    pub const fn known(name: &'static str) -> Self {
        Self { name, factory: None }
    }
}

impl<C, B, T: ?Sized> Clone for CatalogEntry<C, B, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            factory: self.factory,
        }
    }
}

pub struct Registry<C, B, T: ?Sized> {
    kind: &'static str,
    catalog: Vec<CatalogEntry<C, B, T>>,
    context: RwLock<Option<Arc<B>>>,
}

impl<C, B, T: ?Sized> std::fmt::Debug for Registry<C, B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("types", &self.names())
            .field("has_context", &self.has_context())
            .finish()
    }
}

impl<C, B, T: ?Sized> Registry<C, B, T> {
    pub fn new(kind: &'static str, catalog: Vec<CatalogEntry<C, B, T>>) -> Self {
        Self {
            kind,
            catalog,
            context: RwLock::new(None),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Install the bundle used by subsequent `create` calls.
    pub fn set_context(&self, bundle: Arc<B>) {
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = Some(bundle);
        debug!(kind = self.kind, "registry context installed");
    }

    /// Drop the installed bundle (breaks bundle/registry reference cycles).
    pub fn clear_context(&self) {
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn context(&self) -> Option<Arc<B>> {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_context(&self) -> bool {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.catalog.iter().map(|e| e.name).collect()
    }

    fn entry(&self, name: &str) -> Option<&CatalogEntry<C, B, T>> {
        let name = name.trim();
        self.catalog.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }
}

impl<C, B, T> Registry<C, B, T>
where
    C: TypedConfig,
    T: ?Sized,
{
    /// Build an instance for `config`.
    ///
    /// Lookup failures and parameter validation errors are returned; any
    /// other factory failure is logged and yields `Ok(None)`.
    pub fn create(&self, config: &C) -> Result<Option<Arc<T>>, RegistryError> {
        let type_name = config.type_name();
        let entry = self.entry(type_name).ok_or_else(|| RegistryError::UnknownType {
            kind: self.kind,
            name: type_name.to_string(),
            valid: self.names().join(", "),
        })?;
        let factory = entry.factory.ok_or_else(|| RegistryError::NoCreator {
            kind: self.kind,
            name: entry.name.to_string(),
        })?;
        let bundle = self
            .context()
            .ok_or(RegistryError::ContextNotSet { kind: self.kind })?;

        let built = match catch_unwind(AssertUnwindSafe(|| factory(config, &bundle))) {
            Ok(built) => built,
            Err(payload) => {
                error!(kind = self.kind, type_name = entry.name, panic = %panic_message(&*payload), "factory panicked");
                return Ok(None);
            }
        };
        match built {
            Ok(instance) => Ok(Some(instance)),
            Err(CreateError::Config(source)) => Err(RegistryError::Config {
                kind: self.kind,
                type_name: entry.name.to_string(),
                source,
            }),
            Err(CreateError::Failed(message)) => {
                error!(kind = self.kind, type_name = entry.name, error = %message, "failed to create instance");
                Ok(None)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
