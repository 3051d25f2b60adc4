// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=CAM_IFACE_VERSION");

    // Packagers may pin the version string explicitly
    let version = match std::env::var("CAM_IFACE_VERSION") {
        Ok(v) => v,
        Err(_) => describe_version(),
    };

    println!("cargo::rustc-env=CAM_IFACE_GIT_VERSION={}", version);
}

/// Version derived from `git describe`.
///
/// - exact tag `v0.1.0` becomes `0.1.0-<hash>`
/// - `v0.1.0-5-gabcdef1` becomes `0.1.0-dirty-abcdef1`
/// - no git at all falls back to the crate version
fn describe_version() -> String {
    let described = Command::new("git")
        .args(["describe", "--tags", "--always", "--match", "v*"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string());

    let Some(described) = described else {
        return env!("CARGO_PKG_VERSION").to_string();
    };

    let described = described.strip_prefix('v').unwrap_or(&described);
    let commit = short_hash().unwrap_or_else(|| "unknown".to_string());

    let parts: Vec<&str> = described.rsplitn(3, '-').collect();
    match parts.as_slice() {
        [hash, _commits, base] => {
            let hash = hash.strip_prefix('g').unwrap_or(hash);
            format!("{}-dirty-{}", base, hash)
        }
        _ if described == commit => format!("{}-{}", env!("CARGO_PKG_VERSION"), commit),
        _ => format!("{}-{}", described, commit),
    }
}

fn short_hash() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}
