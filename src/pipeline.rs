// CLASSIFICATION: COMMUNITY
// Filename: pipeline.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! End-to-end build: generate code, extract the boot source template, run
//! make, copy the result. An implicit build folder lives in a temp dir that
//! is removed on every exit path; an explicit folder is never deleted.

use rand::rngs::OsRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::Config;
use crate::error::SealError;
use crate::gencode;

/// Boot source files worth extracting into the build folder.
const TEMPLATE_SUFFIXES: &[&str] = &[".h", ".c", ".S", ".in", ".lds", ".sh"];

/// Name of the firmware binary the template's Makefile produces.
const BUILD_PRODUCT: &str = "bootx64.efi";

/// Default location of the boot source template, relative to the working
/// directory.
pub fn default_template_folder() -> PathBuf {
    PathBuf::from("bootcode")
}

/// Run a full build as described by `config`.
pub fn build(config: &Config, template_folder: &Path) -> Result<(), SealError> {
    config.validate()?;
    if !config.input_file.is_file() {
        return Err(SealError::Config(format!(
            "input file does not exist: {}",
            config.input_file.display()
        )));
    }

    // The TempDir guard removes an implicit folder when it drops, also on
    // the error paths below.
    let _temp_guard;
    let build_folder = match &config.build_folder {
        Some(folder) => {
            fs::create_dir_all(folder)?;
            folder.clone()
        }
        None => {
            _temp_guard = tempfile::Builder::new().prefix("efiseal-").tempdir()?;
            _temp_guard.path().to_path_buf()
        }
    };
    log::info!("building in {}", build_folder.display());

    if !config.skip_gen_code {
        gencode::generate(config, &build_folder, &mut OsRng)?;
    }
    if !config.skip_extract {
        extract_template(template_folder, &build_folder)?;
    }
    if !config.skip_make {
        run_make(&build_folder)?;
        if let Some(output) = &config.output_file {
            if let Some(parent) = output.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(build_folder.join(BUILD_PRODUCT), output)?;
            log::info!("wrote {}", output.display());
        }
    }
    Ok(())
}

fn is_template_file(name: &str) -> bool {
    if name == "gen-code.c" {
        return false;
    }
    name == "Makefile"
        || name.starts_with("Make.")
        || TEMPLATE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Copy the static boot source tree into the build folder, skipping
/// anything that is not a source or build file.
fn extract_template(template: &Path, build_folder: &Path) -> Result<(), SealError> {
    if !template.is_dir() {
        return Err(SealError::Config(format!(
            "boot source template not found: {}",
            template.display()
        )));
    }
    copy_template_dir(template, build_folder)
}

fn copy_template_dir(from: &Path, to: &Path) -> Result<(), SealError> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if path.is_dir() {
            copy_template_dir(&path, &to.join(&name))?;
        } else if name.to_str().map(is_template_file).unwrap_or(false) {
            fs::create_dir_all(to)?;
            fs::copy(&path, to.join(&name))?;
        }
    }
    Ok(())
}

fn run_make(build_folder: &Path) -> Result<(), SealError> {
    log::info!("running make");
    let status = Command::new("make")
        .current_dir(build_folder)
        .status()
        .map_err(|e| SealError::Toolchain(format!("failed to spawn make: {e}")))?;
    if !status.success() {
        return Err(SealError::Toolchain(format!(
            "make exited with {status}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_filter_keeps_build_sources_only() {
        assert!(is_template_file("Makefile"));
        assert!(is_template_file("Make.defaults"));
        assert!(is_template_file("sha.c"));
        assert!(is_template_file("elf_x86_64_efi.lds"));
        assert!(!is_template_file("gen-code.c"));
        assert!(!is_template_file("README.md"));
        assert!(!is_template_file("notes.txt"));
    }
}
