//! Process-wide initialization.
//!
//! Units can only be created while at least one [`Framework`] handle is
//! alive. Handles nest; the last one dropped performs the teardown.

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::graph::PipelineGraph;
use crate::registry::UnitRegistry;
use crate::unit::ProcessingUnit;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

static INIT_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Handle on the initialized framework, holding the built-in unit registry.
pub struct Framework {
    registry: UnitRegistry,
}

/// Initialize the framework and load every built-in unit type.
pub fn init() -> Framework {
    let previous = INIT_COUNT.fetch_add(1, Ordering::SeqCst);
    let registry = UnitRegistry::with_builtins();
    if previous == 0 {
        info!(unit_types = registry.unit_types().len(), "Framework initialized");
    } else {
        debug!(handles = previous + 1, "Framework already initialized");
    }
    Framework { registry }
}

pub fn is_initialized() -> bool {
    INIT_COUNT.load(Ordering::SeqCst) > 0
}

impl Framework {
    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    /// Mutable access, for registering additional unit types.
    pub fn registry_mut(&mut self) -> &mut UnitRegistry {
        &mut self.registry
    }

    pub fn create(&self, unit_type: &str, name: &str) -> PipelineResult<ProcessingUnit> {
        self.registry.create(unit_type, name)
    }

    pub fn build(&self, config: &PipelineConfig) -> PipelineResult<PipelineGraph> {
        config.build(&self.registry)
    }

    /// Explicit form of dropping the handle.
    pub fn deinit(self) {}
}

impl Drop for Framework {
    fn drop(&mut self) {
        if INIT_COUNT.fetch_sub(1, Ordering::SeqCst) == 1 {
            info!("Framework deinitialized");
        }
    }
}
