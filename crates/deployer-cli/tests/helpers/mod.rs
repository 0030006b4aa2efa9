// crates/deployer-cli/tests/helpers/mod.rs
// ============================================================================
// Module: Test Helpers
// Description: Shared fixture builder and binary-invocation wrapper for the
// CLI's end-to-end scenario tests.
// Purpose: Keep each scenario file focused on the behavior it exercises
// rather than on fixture plumbing.
// ============================================================================

#![allow(dead_code, reason = "Not every scenario file uses every helper.")]

pub mod fixture;
