// crates/deployer-cli/tests/config_validation.rs
// ============================================================================
// Module: Configuration Validation Scenario
// Description: Drives `orgaform` against packages with an unregistered
// engine and a malformed opaque module configuration, confirming both fail
// the run before any step is scheduled.
// Purpose: Exercise the fatal, pre-scheduling error paths `main.rs` maps to
// exit code 1, not just the unit tests around `validate_module_configs`.
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

mod helpers;

use helpers::fixture::Fixture;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn unknown_engine_fails_before_scheduling_anything() -> TestResult {
    let fixture = Fixture::new();
    let state_uri = format!("file://{}", fixture.state_dir().display());
    fixture.write_package(&format!(
        "package:\n  object_store_location: \"{state_uri}\"\nmodules:\n  vpc:\n    engine: terraform_cloud\n    path: modules/vpc\n    deployments:\n      - {{}}\n"
    ));

    let output = fixture.run("list", &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("vpc"), "expected the module name in the error: {stderr}");
    assert!(stderr.contains("terraform_cloud"), "expected the unknown engine name in the error: {stderr}");
    assert!(!fixture.state_dir().join("state.json").exists());
    Ok(())
}

#[test]
fn non_string_script_opaque_setting_fails_module_config_validation() -> TestResult {
    let fixture = Fixture::new();
    let state_uri = format!("file://{}", fixture.state_dir().display());
    fixture.write_package(&format!(
        "package:\n  object_store_location: \"{state_uri}\"\nmodules:\n  vpc:\n    engine: script\n    path: modules/vpc\n    module_config:\n      opaque:\n        script: 5\n    deployments:\n      - {{}}\n"
    ));

    let output = fixture.run("list", &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("vpc"), "expected the module name in the error: {stderr}");
    Ok(())
}

#[test]
fn unknown_top_level_package_field_is_a_load_error() -> TestResult {
    let fixture = Fixture::new();
    let state_uri = format!("file://{}", fixture.state_dir().display());
    fixture.write_package(&format!(
        "package:\n  object_store_location: \"{state_uri}\"\nmodules: {{}}\nbogus_field: true\n"
    ));

    let output = fixture.run("list", &[]);
    assert!(!output.status.success());
    Ok(())
}
