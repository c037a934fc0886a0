//! `aic`: plan and package AIC compute programs.
//!
//! ```text
//! USAGE:
//!   aic plan <config> (--elf <file> | --entry <addr>) -o <dir>   Write the artifacts
//!   aic package <config> <elf> -o <file>                        Build a container
//!   aic validate <container>                                    Check a container
//!   aic dump <metadata|container>                               Print a metadata document
//!   aic inspect <container>                                     List images and descriptors
//! ```

use std::path::{Path, PathBuf};

use aic_format::container::segment;
use aic_format::{read_metadata, ConstantsDesc, Container, ProgramDesc};
use aic_program::{
    package_files, resolve_entry_point_file, ComputeProgram, NetworkDescriptor, Program,
    ProgramConfig,
};
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aic", about = "AIC compute program planner", version)]
struct Cli {
    /// Log more (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct EntrySource {
    /// Linked binary to read the start symbol from.
    #[arg(long)]
    elf: Option<PathBuf>,
    /// Thread entry address (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_addr)]
    entry: Option<u64>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Plan a program and write its artifacts to a directory.
    Plan {
        /// Program configuration (JSON).
        config: PathBuf,
        #[command(flatten)]
        entry: EntrySource,
        /// Output directory.
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Plan a program and package it with its binary.
    Package {
        /// Program configuration (JSON).
        config: PathBuf,
        /// Linked device binary.
        elf: PathBuf,
        /// Container to write.
        #[arg(short, long, default_value = "program.qpc")]
        output: PathBuf,
    },
    /// Check a container holds every mandatory image.
    Validate {
        /// Container file.
        container: PathBuf,
    },
    /// Print a metadata document, standalone or from a container.
    Dump {
        /// Metadata or container file.
        path: PathBuf,
    },
    /// List the images of a container and decode its descriptors.
    Inspect {
        /// Container file.
        container: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();

    match cli.command {
        Cmd::Plan {
            config,
            entry,
            out_dir,
        } => cmd_plan(&config, &entry, &out_dir)?,
        Cmd::Package {
            config,
            elf,
            output,
        } => cmd_package(&config, &elf, &output)?,
        Cmd::Validate { container } => cmd_validate(&container)?,
        Cmd::Dump { path } => cmd_dump(&path)?,
        Cmd::Inspect { container } => cmd_inspect(&container)?,
    }

    Ok(())
}

fn parse_addr(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
}

fn cmd_plan(config: &Path, entry: &EntrySource, out_dir: &Path) -> Result<()> {
    let entry_point = match (&entry.elf, entry.entry) {
        (Some(elf), _) => resolve_entry_point_file(elf)
            .with_context(|| format!("reading entry point from {}", elf.display()))?,
        (None, Some(addr)) => addr,
        (None, None) => bail!("either --elf or --entry is required"),
    };
    let config = ProgramConfig::from_file(config)
        .with_context(|| format!("loading {}", config.display()))?;

    let program = ComputeProgram::new(config, entry_point);
    let artifacts = program.generate()?;
    artifacts.write_to_dir(out_dir)?;

    let md = artifacts.metadata.metadata();
    println!("Planned {} for {} cores", program.name(), md.num_nsps);
    println!("  entry point   0x{entry_point:x}");
    println!("  L2TCM         {} bytes", md.l2tcm_size);
    println!("  VTCM          {} bytes", md.vtcm_size);
    println!("  shared DDR    {} bytes", md.static_shared_ddr_size);
    println!("  DMA requests  {}", md.dma_requests.len());
    println!("Artifacts written to {}", out_dir.display());
    Ok(())
}

fn cmd_package(config: &Path, elf: &Path, output: &Path) -> Result<()> {
    let container = package_files(config, elf, output)?;
    println!(
        "Packaged {} images into {}",
        container.len(),
        output.display()
    );
    Ok(())
}

fn load_container(path: &Path) -> Result<Container> {
    Container::from_file(path).with_context(|| format!("reading container {}", path.display()))
}

fn cmd_validate(path: &Path) -> Result<()> {
    let container = load_container(path)?;
    container.validate()?;
    if let Some(image) = container.image(segment::METADATA) {
        read_metadata(&image.data).context("metadata image")?;
    }
    if let Some(image) = container.image(segment::NETWORK_DESC) {
        NetworkDescriptor::from_bytes(&image.data).context("network descriptor image")?;
    }
    println!("{}: OK ({} images)", path.display(), container.len());
    Ok(())
}

fn cmd_dump(path: &Path) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let md = if data.starts_with(&aic_format::container::MAGIC) {
        let container = Container::from_bytes(data.into())?;
        let image = container
            .image(segment::METADATA)
            .with_context(|| format!("{} has no {}", path.display(), segment::METADATA))?;
        read_metadata(&image.data)?
    } else {
        read_metadata(&data)?
    };
    info!(path = %path.display(), "metadata verified");
    print!("{md}");
    Ok(())
}

fn cmd_inspect(path: &Path) -> Result<()> {
    let container = load_container(path)?;

    println!("Images: {}", container.len());
    for image in container.images() {
        println!(
            "  {:<20} {:>12} bytes  offset {}",
            image.name,
            image.data.len(),
            image.offset
        );
    }

    if let Some(image) = container.image(segment::CONSTANTS) {
        let desc = ProgramDesc::from_bytes(&image.data).context("program descriptor")?;
        println!();
        println!(
            "Program: {} threads, exit doorbell {}, semaphores in={} out={}",
            desc.num_threads, desc.exit_db, desc.input_sem, desc.output_sem
        );
        println!(
            "  UDMA ring buffer {} (dummy descriptor at 0x{:x})",
            desc.udma_desc_buff_num, desc.udma_dummy_start_desc_offset
        );
        for (i, b) in desc.buffers.iter().enumerate() {
            println!(
                "  [{i}] {:?} {:?} offset 0x{:x} size {} mask 0x{:x} mc {} doorbell {}",
                b.usage, b.location, b.offset, b.size, b.nsp_mask, b.buff_mc_id, b.wait_db_num
            );
        }
    }

    if let Some(image) = container.image(segment::CONSTANTS_DESC) {
        let desc = ConstantsDesc::from_bytes(&image.data).context("constants descriptor")?;
        println!();
        println!(
            "Constants: static {} dynamic {}",
            desc.static_size, desc.dynamic_size
        );
    }

    if let Some(image) = container.image(segment::NETWORK_DESC) {
        let nd = NetworkDescriptor::from_bytes(&image.data).context("network descriptor")?;
        println!();
        println!(
            "Network {} v{}.{}: {} cores, {} threads ({} HVX)",
            nd.network_name,
            nd.major_version,
            nd.minor_version,
            nd.num_cores,
            nd.num_threads,
            nd.num_hvx_threads
        );
        for t in nd.inputs.iter().chain(&nd.outputs) {
            println!(
                "  {:<16} {:?} {:?}",
                t.name, t.io_initial.data_type, t.io_initial.dims
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_parse_in_both_bases() {
        assert_eq!(parse_addr("4096"), Ok(4096));
        assert_eq!(parse_addr("0x1000"), Ok(4096));
        assert_eq!(parse_addr("0XfF"), Ok(255));
        assert!(parse_addr("0xzz").is_err());
        assert!(parse_addr("").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn plan_needs_one_entry_source() {
        assert!(Cli::try_parse_from(["aic", "plan", "p.json"]).is_err());
        assert!(
            Cli::try_parse_from(["aic", "plan", "p.json", "--elf", "a", "--entry", "1"]).is_err()
        );
        assert!(Cli::try_parse_from(["aic", "-vv", "plan", "p.json", "--entry", "0x10"]).is_ok());
    }
}
