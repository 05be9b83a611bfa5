use anyhow::Result;
use chrono::TimeZone;
use std::env;
use std::fs;
use std::process::Command;
use vergen_gitcl::{Emitter, GitclBuilder};

fn main() -> Result<()> {
    // Generate git information
    let gitcl = GitclBuilder::default()
        .describe(true, true, Some("[0-9]*"))
        .build()?;

    let gitcl_res = Emitter::default()
        .idempotent()
        .fail_on_error()
        .add_instructions(&gitcl)
        .and_then(|emitter| emitter.emit());

    if let Err(e) = gitcl_res {
        eprintln!("error occurred while generating instructions: {e:?}");
        Emitter::default().idempotent().fail_on_error().emit()?;
        println!("cargo:rustc-env=VERGEN_GIT_DESCRIBE=unknown");
    }

    // Add build timestamp
    let now = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|val| val.parse::<i64>().ok())
        .and_then(|secs| chrono::Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(chrono::Utc::now);

    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );

    // Get mhas library version using cargo metadata
    let mhas_version = get_mhas_version_from_metadata().unwrap_or_else(|_| {
        read_mhas_version_fallback().unwrap_or_else(|_| "unknown".to_string())
    });
    println!("cargo:rustc-env=MHAS_VERSION={mhas_version}");

    // Tell cargo to rerun this build script if the mhas Cargo.toml changes
    println!("cargo:rerun-if-changed=mhas/Cargo.toml");

    Ok(())
}

/// Get mhas version using cargo metadata (works with published and local dependencies)
fn get_mhas_version_from_metadata() -> Result<String> {
    let output = Command::new("cargo")
        .args(["metadata", "--format-version", "1"])
        .output()?;

    if !output.status.success() {
        anyhow::bail!("cargo metadata failed");
    }

    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout)?;

    // Workspace members first (local development)
    if let Some(packages) = metadata["packages"].as_array() {
        for package in packages {
            if package["name"].as_str() == Some("mhas") {
                if let Some(version) = package["version"].as_str() {
                    return Ok(version.to_string());
                }
            }
        }
    }

    // Published mhas package in the dependency graph, ids look like "mhas 0.1.0 (registry+...)"
    if let Some(nodes) = metadata["resolve"]["nodes"].as_array() {
        for node in nodes {
            let Some(id) = node["id"].as_str() else {
                continue;
            };
            if let Some(rest) = id.strip_prefix("mhas ") {
                if let Some(version) = rest.split(' ').next() {
                    return Ok(version.to_string());
                }
            }
        }
    }

    anyhow::bail!("mhas package not found in metadata");
}

/// Fallback: manually parse mhas/Cargo.toml (for edge cases)
fn read_mhas_version_fallback() -> Result<String> {
    let toml_content = fs::read_to_string("mhas/Cargo.toml")?;

    for line in toml_content.lines() {
        let line = line.trim();
        if line.starts_with("version") {
            if let Some((_, version_part)) = line.split_once('=') {
                let version = version_part.trim().trim_matches('"').trim_matches('\'');
                return Ok(version.to_string());
            }
        }
    }

    anyhow::bail!("Could not find version in mhas/Cargo.toml");
}
