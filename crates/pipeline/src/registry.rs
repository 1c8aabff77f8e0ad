//! Unit registry for creating processing unit instances.

use crate::error::{PipelineError, PipelineResult, UnitError};
use crate::unit::{ProcessingUnit, UnitImpl, UnitKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A factory for creating instances of a specific unit type.
pub trait UnitFactory: Send + Sync {
    /// Symbolic type name this factory is registered under.
    fn type_name(&self) -> &'static str;

    fn kind(&self) -> UnitKind;

    /// Create the unit behavior. May fail if an external resource the unit
    /// depends on is unavailable.
    fn create(&self, name: &str) -> Result<Box<dyn UnitImpl>, UnitError>;
}

/// A registry for unit factories.
#[derive(Default, Clone)]
pub struct UnitRegistry {
    factories: HashMap<String, Arc<dyn UnitFactory>>,
}

impl UnitRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every statically registered factory.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for registrar in inventory::iter::<StaticUnitRegistrar> {
            registry.register_arc((registrar.factory_fn)());
        }
        registry
    }

    /// Registers a unit factory, replacing any factory with the same type name.
    pub fn register<F>(&mut self, factory: F)
    where
        F: UnitFactory + 'static,
    {
        self.register_arc(Arc::new(factory));
    }

    fn register_arc(&mut self, factory: Arc<dyn UnitFactory>) {
        debug!(unit_type = factory.type_name(), "Registered unit factory");
        self.factories
            .insert(factory.type_name().to_string(), factory);
    }

    /// Creates a new unit of `unit_type` named `name`. The framework must
    /// be initialized.
    pub fn create(&self, unit_type: &str, name: &str) -> PipelineResult<ProcessingUnit> {
        if !crate::framework::is_initialized() {
            return Err(PipelineError::NotInitialized);
        }
        let factory = self
            .factories
            .get(unit_type)
            .ok_or_else(|| PipelineError::UnknownType {
                unit_type: unit_type.to_string(),
            })?;
        let inner = factory
            .create(name)
            .map_err(|source| PipelineError::UnitCreation {
                name: name.to_string(),
                unit_type: unit_type.to_string(),
                source,
            })?;
        Ok(ProcessingUnit::new(name, unit_type, inner))
    }

    pub fn contains(&self, unit_type: &str) -> bool {
        self.factories.contains_key(unit_type)
    }

    /// All registered type names, sorted.
    pub fn unit_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    pub fn kind_of(&self, unit_type: &str) -> Option<UnitKind> {
        self.factories.get(unit_type).map(|f| f.kind())
    }
}

/// A struct for statically registering a `UnitFactory`.
pub struct StaticUnitRegistrar {
    pub factory_fn: fn() -> Arc<dyn UnitFactory>,
}

inventory::collect!(StaticUnitRegistrar);

/// Registers a built-in unit factory with the static registry.
#[macro_export]
macro_rules! register_unit {
    ($factory:expr) => {
        $crate::inventory::submit! {
            $crate::registry::StaticUnitRegistrar {
                factory_fn: || -> ::std::sync::Arc<dyn $crate::registry::UnitFactory> {
                    ::std::sync::Arc::new($factory)
                },
            }
        }
    };
}
