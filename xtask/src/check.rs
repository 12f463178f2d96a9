// Licensed under the Apache-2.0 license

use anyhow::{Context, Result};
use std::process::Command;

/// Cross target the library must keep building for.
const EMBEDDED_TARGET: &str = "thumbv7em-none-eabihf";

/// Runs the local CI sequence: format, lint, host tests and a no_std build.
pub fn run(fix: bool) -> Result<()> {
    let fmt: &[&str] = if fix {
        &["fmt", "--all"]
    } else {
        &["fmt", "--all", "--check"]
    };
    cargo(fmt)?;
    cargo(&[
        "clippy",
        "--workspace",
        "--all-targets",
        "--features",
        "std,sim",
        "--",
        "-D",
        "warnings",
    ])?;
    cargo(&["test", "--workspace", "--features", "std"])?;
    cargo(&["build", "--lib", "--release", "--target", EMBEDDED_TARGET])?;

    println!("✅ All checks passed");
    Ok(())
}

fn cargo(args: &[&str]) -> Result<()> {
    println!("Running cargo {}...", args.join(" "));

    let status = Command::new("cargo")
        .args(args)
        .status()
        .with_context(|| format!("Failed to run cargo {}", args.join(" ")))?;

    if !status.success() {
        anyhow::bail!("cargo {} failed: {}", args.join(" "), status);
    }
    Ok(())
}
