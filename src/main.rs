// CLASSIFICATION: COMMUNITY
// Filename: main.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! CLI entry point. Options mirror the configuration file; anything given
//! on the command line overrides the file.

use anyhow::{bail, Result};
use clap::Parser;
use efiseal::{pipeline, Config};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Encrypts an EFI binary using a hash derived from user-defined data (smbios, disk, ...)"
)]
struct Args {
    /// Configuration file (TOML or JSON).
    #[arg(short, long)]
    config_file: Option<PathBuf>,
    /// Path to the input EFI file to embed.
    #[arg(short, long)]
    input_file: Option<PathBuf>,
    /// Path to the output EFI file to write.
    #[arg(short, long)]
    output_file: Option<PathBuf>,
    /// Path to the input SMBIOS dump file.
    #[arg(short, long)]
    smbios: Option<PathBuf>,
    /// Folder where to build the code.
    #[arg(short, long)]
    build_folder: Option<PathBuf>,
    /// Folder holding the boot source template.
    #[arg(long, default_value_os_t = pipeline::default_template_folder())]
    template_folder: PathBuf,
    /// Skip generating code.
    #[arg(long)]
    skip_gen_code: bool,
    /// Skip extracting the boot source template.
    #[arg(long)]
    skip_extract: bool,
    /// Skip calling make.
    #[arg(long)]
    skip_make: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config_file {
        Some(path) => Config::load(path)?,
        None => Config {
            input_file: PathBuf::new(),
            output_file: None,
            build_folder: None,
            skip_gen_code: false,
            skip_extract: false,
            skip_make: false,
            hash_components: None,
            smbios: None,
            enroll_secure_boot: None,
        },
    };
    if let Some(input) = args.input_file {
        config.input_file = input;
    }
    if let Some(output) = args.output_file {
        config.output_file = Some(output);
    }
    if let Some(smbios) = args.smbios {
        config.smbios = Some(smbios);
    }
    if let Some(folder) = args.build_folder {
        config.build_folder = Some(folder);
    }
    config.skip_gen_code |= args.skip_gen_code;
    config.skip_extract |= args.skip_extract;
    config.skip_make |= args.skip_make;

    if config.input_file.as_os_str().is_empty() {
        bail!("an input file is required, via --input-file or the configuration file");
    }

    pipeline::build(&config, &args.template_folder)?;
    Ok(())
}
