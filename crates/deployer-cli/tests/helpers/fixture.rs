// crates/deployer-cli/tests/helpers/fixture.rs
// ============================================================================
// Module: CLI Fixture Builder
// Description: Assembles a minimal on-disk package/inventory/module-script
// fixture, and a wrapper for invoking the compiled `orgaform` binary against
// it.
// Purpose: Give every scenario test a one-call way to stand up a runnable
// package without repeating the YAML/JSON/script boilerplate.
// ============================================================================

#![allow(clippy::expect_used, clippy::unwrap_in_result, clippy::panic_in_result_fn, reason = "Fixture setup panics plainly on its own I/O failures; there is no caller to report errors to.")]

use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

/// A shell script for the `vpc` module: writes a fixed `output.json` for
/// `create`/`update`, an empty one for `destroy`/`no_change`. `CACHE_DIR`
/// is the channel the script engine uses to tell the script where to write,
/// since the script's working directory is the module source tree.
const VPC_SCRIPT: &str = "#!/bin/sh\nset -eu\ncase \"$1\" in\n  create|update)\n    printf '{\"vpc_id\":\"vpc-001\"}' > \"$CACHE_DIR/output.json\"\n    ;;\n  *)\n    printf '{}' > \"$CACHE_DIR/output.json\"\n    ;;\nesac\n";

/// Minimal inventory with one active account, one enabled region.
pub const ONE_ACCOUNT_INVENTORY: &str = r#"{
  "accounts": {
    "111111111111": {
      "id": "111111111111",
      "name": "prod",
      "parent_ous": [],
      "tags": {},
      "enabled_regions": ["eu-west-1"],
      "active": true
    }
  },
  "organizational_units": {},
  "generated_at": "2026-01-01T00:00:00Z"
}"#;

/// Paths into one assembled fixture.
pub struct Fixture {
    /// Fixture root; holds `package.yaml`, `inventory.json`, `modules/`, and
    /// `state/`.
    pub root: PathBuf,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    /// Assembles a fixture with a single `vpc` module on the `script`
    /// engine, deploying everywhere the inventory allows by default.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create fixture tempdir").into_path();

        let module_dir = root.join("modules").join("vpc");
        std::fs::create_dir_all(&module_dir).expect("create module dir");
        let script_path = module_dir.join("run");
        std::fs::write(&script_path, VPC_SCRIPT).expect("write module script");
        set_executable(&script_path);

        std::fs::write(root.join("inventory.json"), ONE_ACCOUNT_INVENTORY).expect("write inventory.json");

        let state_uri = format!("file://{}", root.join("state").display());
        std::fs::write(
            root.join("package.yaml"),
            format!(
                "package:\n  object_store_location: \"{state_uri}\"\nmodules:\n  vpc:\n    engine: script\n    path: modules/vpc\n    deployments:\n      - {{}}\n"
            ),
        )
        .expect("write package.yaml");

        Self { root }
    }

    /// Path to the package definition.
    pub fn package_file(&self) -> PathBuf {
        self.root.join("package.yaml")
    }

    /// Rewrites `package.yaml` in place, for scenarios that need a
    /// different module/engine/scope shape than [`Fixture::new`]'s default.
    pub fn write_package(&self, yaml: &str) {
        std::fs::write(self.package_file(), yaml).expect("rewrite package.yaml");
    }

    /// Path to the JSON-encoded inventory snapshot.
    pub fn inventory_file(&self) -> PathBuf {
        self.root.join("inventory.json")
    }

    /// Rewrites `inventory.json` in place, e.g. to drop an account between
    /// two CLI invocations.
    pub fn write_inventory(&self, json: &str) {
        std::fs::write(self.inventory_file(), json).expect("write inventory.json");
    }

    /// Path the persisted `state.json`/`orga.json` blobs land under.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// Runs the compiled `orgaform` binary as `orgaform <subcommand>
    /// --package-file ... --inventory-file ... --temp-dir ... <extra_args>`.
    pub fn run(&self, subcommand: &str, extra_args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_orgaform"))
            .arg(subcommand)
            .arg("--package-file")
            .arg(self.package_file())
            .arg("--inventory-file")
            .arg(self.inventory_file())
            .arg("--temp-dir")
            .arg(self.root.join("engine-cache"))
            .args(extra_args)
            .output()
            .expect("spawn orgaform")
    }
}

/// Marks `path` executable on Unix; a no-op elsewhere since the fixture
/// scripts only ever run on the CI/dev Unix targets this suite assumes.
#[cfg(unix)]
fn set_executable(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt as _;
    let mut perms = std::fs::metadata(path).expect("stat script").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("chmod script");
}

#[cfg(not(unix))]
fn set_executable(_path: &std::path::Path) {}
