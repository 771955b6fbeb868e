// CLASSIFICATION: COMMUNITY
// Filename: pipeline.rs v0.1
// Date Modified: 2026-08-29
// Author: Lukas Bower

use efiseal::config::Config;
use efiseal::error::SealError;
use efiseal::pipeline;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn base_config(input_file: PathBuf) -> Config {
    Config {
        input_file,
        output_file: None,
        build_folder: None,
        skip_gen_code: false,
        skip_extract: false,
        skip_make: false,
        hash_components: None,
        smbios: None,
        enroll_secure_boot: None,
    }
}

#[test]
fn skip_make_build_populates_an_explicit_folder() {
    let dir = tempdir().expect("tempdir");
    let payload = dir.path().join("payload.efi");
    fs::write(&payload, vec![1u8; 48]).expect("payload");

    let template = dir.path().join("bootcode");
    fs::create_dir_all(&template).expect("mkdir");
    fs::write(template.join("Makefile"), "all:\n").expect("write");
    fs::write(template.join("main.c"), "int main(void){return 0;}\n").expect("write");
    fs::write(template.join("gen-code.h"), "#pragma once\n").expect("write");
    fs::write(template.join("README.md"), "docs\n").expect("write");

    let build_folder = dir.path().join("build");
    let mut config = base_config(payload);
    config.build_folder = Some(build_folder.clone());
    config.skip_make = true;
    pipeline::build(&config, &template).expect("build");

    assert!(build_folder.join("gen-code.c").is_file());
    assert!(build_folder.join("Makefile").is_file());
    assert!(build_folder.join("main.c").is_file());
    assert!(build_folder.join("gen-code.h").is_file());
    assert!(!build_folder.join("README.md").exists());
    // An explicit folder survives the build.
    assert!(build_folder.is_dir());
}

#[test]
fn missing_input_file_is_a_config_error() {
    let dir = tempdir().expect("tempdir");
    let config = base_config(dir.path().join("no-such.efi"));
    let err = pipeline::build(&config, &dir.path().join("bootcode")).unwrap_err();
    assert!(matches!(err, SealError::Config(_)));
}

#[test]
fn missing_template_folder_is_a_config_error() {
    let dir = tempdir().expect("tempdir");
    let payload = dir.path().join("payload.efi");
    fs::write(&payload, b"payload").expect("payload");

    let mut config = base_config(payload);
    config.build_folder = Some(dir.path().join("build"));
    config.skip_make = true;
    let err = pipeline::build(&config, &dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, SealError::Config(_)));
}

#[test]
fn skip_gen_code_leaves_the_generated_file_alone() {
    let dir = tempdir().expect("tempdir");
    let payload = dir.path().join("payload.efi");
    fs::write(&payload, b"payload").expect("payload");

    let template = dir.path().join("bootcode");
    fs::create_dir_all(&template).expect("mkdir");
    fs::write(template.join("Makefile"), "all:\n").expect("write");

    let build_folder = dir.path().join("build");
    fs::create_dir_all(&build_folder).expect("mkdir");
    fs::write(build_folder.join("gen-code.c"), "/* handwritten */\n").expect("write");

    let mut config = base_config(payload);
    config.build_folder = Some(build_folder.clone());
    config.skip_gen_code = true;
    config.skip_make = true;
    pipeline::build(&config, &template).expect("build");

    let text = fs::read_to_string(build_folder.join("gen-code.c")).expect("read");
    assert_eq!(text, "/* handwritten */\n");
}
