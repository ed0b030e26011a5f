use std::env;
use std::process::Command;

// Exposes GMONITOR_GIT_SHA to the crate so experiments can record the exact build.
fn main() {
    println!("cargo:rerun-if-env-changed=GMONITOR_GIT_SHA");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");

    if let Some(sha) = resolve_sha() {
        println!("cargo:rustc-env=GMONITOR_GIT_SHA={}", sha);
    }
}

fn resolve_sha() -> Option<String> {
    let from_env = env::var("GMONITOR_GIT_SHA")
        .ok()
        .map(|s| s.trim().to_string());
    if from_env.is_some() {
        return from_env.filter(|s| !s.is_empty());
    }

    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        None
    } else {
        Some(sha)
    }
}
