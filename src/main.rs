use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use brain_region_extractor::{
    AffineResampler, Atlas, DataType, Extractor, ExtractorConfig, Interpolation, ScanMeta, SortBy,
    Volume, VolumeLoader, align,
    nifti_io::save_nifti_to_file,
    persistence::{ScanStore, SqlScriptStore},
    report::into_serializable,
};
use clap::{Parser, Subcommand};
use log::{debug, info};

/// Extract per-region statistics and surfaces from atlas-labelled brain scans
#[derive(Parser, Debug)]
#[command(name = "brain-region-extractor", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file (defaults to $BRAIN_REGION_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Slice order of DICOM series: position, table, instance or none
    #[arg(long, global = true, default_value_t = SortBy::ImagePositionPatient)]
    sort_by: SortBy,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract region statistics of a scan using a brain atlas
    Extract(ExtractArgs),
    /// Resample a scan onto a reference grid and/or change its data type
    Patch(PatchArgs),
}

#[derive(clap::Args, Debug)]
struct ExtractArgs {
    /// The brain atlas CSV dictionary
    #[arg(long)]
    atlas_dictionary: PathBuf,

    /// The brain atlas image (NIfTI file or DICOM directory)
    #[arg(long)]
    atlas_image: PathBuf,

    /// The brain scan (NIfTI file or DICOM directory)
    #[arg(long)]
    scan: PathBuf,

    /// Extract region surfaces as POLYHEDRALSURFACE Z
    #[arg(long, default_value_t = false)]
    surfaces: bool,

    /// Decimate large surfaces
    #[arg(long, default_value_t = false)]
    simplify: bool,

    /// Fraction of faces kept when decimating, in (0, 1]
    #[arg(long)]
    decimate_factor: Option<f64>,

    /// Worker threads for the region loop
    #[arg(long)]
    threads: Option<usize>,

    /// Write the region JSON here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write an SQL insertion script for the scan here
    #[arg(long)]
    sql: Option<PathBuf>,

    /// Spatial reference id of the SQL geometry columns
    #[arg(long)]
    srid: Option<i32>,
}

#[derive(clap::Args, Debug)]
struct PatchArgs {
    /// The scan to resample
    scan: PathBuf,

    /// The reference image whose grid the scan is resampled onto
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Change the output NIfTI data type
    #[arg(long = "type")]
    data_type: Option<DataType>,

    /// Interpolation used in resampling
    #[arg(long, default_value_t = Interpolation::Continuous)]
    interpolation: Interpolation,

    /// The file or directory name for the output NIfTI image
    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return fail(e),
    };

    let result = match cli.command {
        Command::Extract(args) => extract(config, args, cli.sort_by),
        Command::Patch(args) => patch(config, args, cli.sort_by),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn fail(e: anyhow::Error) -> ExitCode {
    eprintln!("ERROR: {e:#}");
    ExitCode::FAILURE
}

fn load_config(path: Option<&Path>) -> Result<ExtractorConfig> {
    ExtractorConfig::load(path).context("Failed to load configuration")
}

fn load_volume(path: &Path, sort_by: SortBy, what: &str) -> Result<Volume> {
    VolumeLoader::load_from_path_sorted(path, sort_by)
        .with_context(|| format!("Failed to load {what} '{}'", path.display()))
}

fn extract(mut config: ExtractorConfig, args: ExtractArgs, sort_by: SortBy) -> Result<()> {
    // CLI flags take precedence over file and environment.
    config.surface.enabled |= args.surfaces;
    config.surface.simplify |= args.simplify;
    if let Some(factor) = args.decimate_factor {
        config.surface.decimate_factor = factor;
    }
    if let Some(threads) = args.threads {
        config.threads = Some(threads);
    }
    if let Some(srid) = args.srid {
        config.persistence.srid = srid;
    }
    let extractor = Extractor::new(config)?;
    let config = extractor.config();

    let atlas = Atlas::load(&args.atlas_dictionary, &config.atlas_columns())?;
    debug!("Atlas regions:");
    for region in &atlas.regions {
        debug!("- {} ({})", region.name, region.value);
    }

    let atlas_volume = load_volume(&args.atlas_image, sort_by, "atlas image")?;
    let scan = load_volume(&args.scan, sort_by, "scan")?;
    let meta = ScanMeta::from_path(&args.scan)
        .with_context(|| format!("Failed to read scan size '{}'", args.scan.display()))?;

    let extraction = extractor.run(&atlas, atlas_volume, &scan, &meta)?;

    let json = serde_json::to_string_pretty(&into_serializable(&extraction.report)?)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json + "\n")
                .with_context(|| format!("Failed to write '{}'", path.display()))?;
            info!("Wrote region statistics to '{}'", path.display());
        }
        None => println!("{json}"),
    }

    if let Some(path) = &args.sql {
        let file = File::create(path)
            .with_context(|| format!("Failed to create SQL script '{}'", path.display()))?;
        let mut store = SqlScriptStore::new(BufWriter::new(file), config.persistence.srid);
        store.insert(&extraction.to_record())?;
        store.into_inner().flush()?;
    }

    Ok(())
}

fn patch(config: ExtractorConfig, args: PatchArgs, sort_by: SortBy) -> Result<()> {
    config.validate()?;
    let output = resolve_output(&args.output, &args.scan)?;

    let mut patched = load_volume(&args.scan, sort_by, "scan")?;
    if let Some(reference) = &args.reference {
        let reference = load_volume(reference, sort_by, "reference")?;
        patched = align(
            patched,
            &reference,
            args.interpolation,
            config.tolerance(),
            &AffineResampler,
        )?;
    }
    if let Some(data_type) = args.data_type {
        patched = convert(patched, data_type);
    }

    save_nifti_to_file(&output, &patched)
        .with_context(|| format!("Failed to write '{}'", output.display()))?;
    info!("Saved patched scan to '{}'", output.display());
    Ok(())
}

fn convert(volume: Volume, data_type: DataType) -> Volume {
    match volume.data_type() {
        Some(current) if current == data_type => {
            info!("Image already uses the '{data_type}' data type, no conversion needed");
            volume
        }
        current => {
            let current = current.unwrap_or(DataType::Float64);
            info!("Converting image from {current} to {data_type}");
            volume.cast(data_type)
        }
    }
}

/// A directory output gets the scan's file name appended. The result must
/// not exist yet and its parent directory must.
fn resolve_output(output: &Path, scan: &Path) -> Result<PathBuf> {
    let output = if output.is_dir() {
        let mut name = scan
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scan".to_string());
        if !(name.ends_with(".nii") || name.ends_with(".nii.gz")) {
            name.push_str(".nii.gz");
        }
        output.join(name)
    } else {
        output.to_path_buf()
    };

    if output.exists() {
        bail!("Output file '{}' already exists", output.display());
    }
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            bail!("Output directory '{}' does not exist", parent.display())
        }
        _ => Ok(output),
    }
}
