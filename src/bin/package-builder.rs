use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use package_builder::{pipeline, LockMode, PackagerConfig};

#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    descriptor: Option<PathBuf>,
    source: Option<PathBuf>,
    output: Option<PathBuf>,
    wait: bool,
    verbose: bool,
}

fn usage() -> &'static str {
    "Usage:\n  package-builder [--config <path>] [--descriptor <path>] [--source <dir>]\n                  \
     [--output <dir>] [--wait] [--verbose]\n\n\
     With no flags, archives the current directory and packages rust-dnf into ./pkgbuild."
}

fn main() -> Result<()> {
    let args = match parse_args(std::env::args().skip(1))? {
        Some(args) => args,
        None => {
            println!("{}", usage());
            return Ok(());
        }
    };
    init_logging(args.verbose);

    let config = resolve_config(&args)?;
    let descriptor = config
        .load_descriptor()
        .context("loading package descriptor")?;

    println!(
        "[package-builder] packaging {} from '{}'",
        descriptor.nvr(),
        config.source_root.display()
    );
    println!("[package-builder] output: {}", config.output_dir.display());

    let artifact = pipeline::run(&config, &descriptor)?;

    println!(
        "[package-builder] {} ({} files) -> {}",
        artifact.nvr(),
        artifact.metadata.files.len(),
        artifact.path.display()
    );
    Ok(())
}

/// `Ok(None)` when help was requested.
fn parse_args(mut raw: impl Iterator<Item = String>) -> Result<Option<Args>> {
    let mut args = Args::default();

    while let Some(flag) = raw.next() {
        let mut value = |name: &str| -> Result<PathBuf> {
            match raw.next() {
                Some(v) if !v.starts_with("--") => Ok(PathBuf::from(v)),
                _ => bail!("{name} requires a value\n\n{}", usage()),
            }
        };
        match flag.as_str() {
            "--config" => args.config = Some(value("--config")?),
            "--descriptor" => args.descriptor = Some(value("--descriptor")?),
            "--source" => args.source = Some(value("--source")?),
            "--output" => args.output = Some(value("--output")?),
            "--wait" => args.wait = true,
            "--verbose" | "-v" => args.verbose = true,
            "--help" | "-h" => return Ok(None),
            other => bail!("unknown argument '{other}'\n\n{}", usage()),
        }
    }
    Ok(Some(args))
}

fn init_logging(verbose: bool) {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

fn resolve_config(args: &Args) -> Result<PackagerConfig> {
    let mut config = PackagerConfig::load(args.config.as_deref())?;

    if let Some(source) = &args.source {
        if !source.is_dir() {
            bail!("source root '{}' is not a directory", source.display());
        }
        let default_output = config.source_root.join("pkgbuild");
        if config.output_dir == default_output {
            config.output_dir = source.join("pkgbuild");
        }
        config.source_root = source.clone();
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(descriptor) = &args.descriptor {
        config.descriptor = Some(descriptor.clone());
    }
    if args.wait {
        config.lock = LockMode::Wait;
    }
    Ok(config)
}
