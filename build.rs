//! Build script for livealloc.
//!
//! Emits a few integration hints based on the selected features.

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_STRICT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_PARKING_LOT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DIAGNOSTICS");

    let strict = env::var("CARGO_FEATURE_STRICT").is_ok();
    let diagnostics = env::var("CARGO_FEATURE_DIAGNOSTICS").is_ok();
    let profile = env::var("PROFILE").unwrap_or_default();

    if strict && profile == "release" {
        println!(
            "cargo:warning=livealloc: 'strict' traps on dictionary overflow; \
             release builds usually want record-dropping instead"
        );
    }

    if diagnostics && profile == "release" {
        println!(
            "cargo:warning=livealloc: 'diagnostics' enables stderr output in \
             release builds"
        );
    }
}
