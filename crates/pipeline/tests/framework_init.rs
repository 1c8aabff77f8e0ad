//! Unit creation is refused until the framework is initialized. Kept in its
//! own test binary since initialization is process-wide.

use pipeline::{PipelineError, UnitRegistry};

#[test]
fn test_creation_requires_initialized_framework() {
    let registry = UnitRegistry::with_builtins();
    assert!(!pipeline::is_initialized());
    assert!(matches!(
        registry.create("filesrc", "file-source"),
        Err(PipelineError::NotInitialized)
    ));

    let framework = pipeline::init();
    assert!(pipeline::is_initialized());
    assert!(framework.create("filesrc", "file-source").is_ok());
    assert!(registry.create("filesrc", "file-source").is_ok());

    let nested = pipeline::init();
    framework.deinit();
    assert!(pipeline::is_initialized());
    drop(nested);
    assert!(!pipeline::is_initialized());
}
