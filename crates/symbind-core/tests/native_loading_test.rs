//! End-to-end tests for the loading pipeline:
//! embedded payload -> materialization -> platform loader -> capability proxy.
//!
//! The payload is the `symbind-smoke-library` cdylib built by this
//! workspace. Its bytes are registered as an embedded resource so the whole
//! extract-then-load path runs exactly as it would for a real embedded
//! binary.

use std::path::PathBuf;
use std::sync::Arc;

use symbind_core::{
    current_generation, platform_loader, CapabilityDescription, EmbeddedResources, LibraryRegistry,
    LoaderError, ResourceLocator, ResourceStore, Value, ValueType,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "symbind_core=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Locate the built fixture cdylib under the workspace target directory.
fn fixture_artifact() -> Option<PathBuf> {
    let file_name = libloading::library_filename("symbind_smoke");
    let target_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("target");
    for profile in ["debug", "release"] {
        let candidate = target_root.join(profile).join(&file_name);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

/// Registry wired to the real platform loader, with the fixture bytes as
/// the embedded payload for `native/smoke`.
fn fixture_registry(scratch: &tempfile::TempDir) -> Option<(LibraryRegistry, ResourceLocator)> {
    let Some(artifact) = fixture_artifact() else {
        eprintln!("smoke library artifact not built; skipping");
        return None;
    };
    let bytes = std::fs::read(&artifact).expect("read fixture cdylib");
    let file_name = artifact.file_name().unwrap().to_string_lossy().into_owned();

    let locator = ResourceLocator::new("native/smoke", file_name);
    let provider = EmbeddedResources::new().insert(locator.clone(), bytes);
    let registry = LibraryRegistry::new(
        platform_loader(),
        Box::new(provider),
        ResourceStore::with_root(scratch.path()),
    );
    Some((registry, locator))
}

fn smoke_capability() -> CapabilityDescription {
    // Capability descriptions are plain data; a manifest-shaped JSON form
    // round-trips through serde.
    serde_json::from_str(
        r#"{
            "name": "smoke",
            "methods": [
                { "name": "smoke_add", "params": ["int", "int"], "ret": "int" },
                { "name": "smoke_scale", "params": ["double", "double"], "ret": "double" },
                { "name": "smoke_mix", "params": ["int", "double"], "ret": "double" },
                { "name": "smoke_status", "params": [], "ret": "str" },
                { "name": "smoke_text_len", "params": ["str"], "ret": "long" },
                { "name": "smoke_handle_echo", "params": ["handle"], "ret": "handle" },
                { "name": "smoke_noop", "params": [], "ret": "unit" }
            ]
        }"#,
    )
    .expect("capability description JSON")
}

#[test]
fn test_full_pipeline_loads_and_dispatches() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let Some((registry, locator)) = fixture_registry(&scratch) else {
        return;
    };

    // Sanity-check the fixture through its rlib before going through the
    // dynamic path.
    assert_eq!(symbind_smoke::smoke_add(2, 2), 4);

    registry.ensure_loaded("smoke", &locator).unwrap();
    // Idempotent: a second identical request is a no-op.
    registry.ensure_loaded("smoke", &locator).unwrap();

    // The materialized file sits under the scratch root with the payload's
    // full length.
    let materialized = ResourceStore::with_root(scratch.path()).target_path(&locator);
    assert!(materialized.exists());
    assert!(std::fs::metadata(&materialized).unwrap().len() > 0);

    let proxy = registry.get_proxy("smoke", &smoke_capability()).unwrap();
    assert_eq!(proxy.library(), "smoke");
    assert_eq!(proxy.capability(), "smoke");
    assert_eq!(
        proxy
            .call("smoke_add", &[Value::Int(40), Value::Int(2)])
            .unwrap(),
        Value::Int(42)
    );
    assert_eq!(
        proxy
            .call("smoke_scale", &[Value::Double(1.5), Value::Double(4.0)])
            .unwrap(),
        Value::Double(6.0)
    );
    assert_eq!(
        proxy
            .call("smoke_mix", &[Value::Int(3), Value::Double(0.5)])
            .unwrap(),
        Value::Double(1.5)
    );
    assert_eq!(
        proxy.call("smoke_status", &[]).unwrap(),
        Value::Str("ok".to_string())
    );
    assert_eq!(
        proxy
            .call("smoke_text_len", &[Value::Str("benzene".to_string())])
            .unwrap(),
        Value::Long(7)
    );
    assert_eq!(
        proxy
            .call("smoke_handle_echo", &[Value::Handle(0xbeef)])
            .unwrap(),
        Value::Handle(0xbeef)
    );
    assert_eq!(proxy.call("smoke_noop", &[]).unwrap(), Value::Unit);

    // Same capability, same instance; different capability, different one.
    let again = registry.get_proxy("smoke", &smoke_capability()).unwrap();
    assert!(Arc::ptr_eq(&proxy, &again));
    let version_only = CapabilityDescription::new("version").with_method(
        "smoke_version",
        vec![],
        ValueType::Str,
    );
    let other = registry.get_proxy("smoke", &version_only).unwrap();
    assert!(!Arc::ptr_eq(&proxy, &other));
    assert!(matches!(
        other.call("smoke_version", &[]).unwrap(),
        Value::Str(v) if !v.is_empty()
    ));
}

#[test]
fn test_missing_symbol_names_method_and_library() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let Some((registry, locator)) = fixture_registry(&scratch) else {
        return;
    };
    registry.ensure_loaded("smoke", &locator).unwrap();

    let absent = CapabilityDescription::new("absent")
        .with_method("smoke_add", vec![ValueType::Int, ValueType::Int], ValueType::Int)
        .with_method("smoke_missing_entry", vec![], ValueType::Unit);
    match registry.get_proxy("smoke", &absent).unwrap_err() {
        LoaderError::SymbolNotFound { symbol, library } => {
            assert_eq!(symbol, "smoke_missing_entry");
            assert_eq!(library, "smoke");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_conflict_and_teardown() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let Some((registry, locator)) = fixture_registry(&scratch) else {
        return;
    };
    registry.ensure_loaded("smoke", &locator).unwrap();

    let elsewhere = ResourceLocator::new("native/other", locator.file_name.as_str());
    assert!(matches!(
        registry.ensure_loaded("smoke", &elsewhere),
        Err(LoaderError::PathConflict { .. })
    ));

    let generation = registry.generation();
    registry.shutdown();
    assert!(!registry.is_open());
    assert!(current_generation() > generation);
    assert!(matches!(
        registry.get_proxy("smoke", &smoke_capability()),
        Err(LoaderError::RegistryClosed)
    ));
}
