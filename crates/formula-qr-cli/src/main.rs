//! Command-line surface for `formula-qr`.
//!
//! Fragment texts are exchanged one per line; rendering them as optical codes
//! (and scanning them back) is left to whatever tool sits on either side.

mod files;

use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use formula_qr::{
    Artifact, CancellationToken, Fragment, Restored, TransportCodec, TransportConfig,
    TransportError,
};

#[derive(Debug, Parser)]
#[command(name = "formula-qr")]
#[command(about = "Move files and spreadsheet regions through sequences of QR codes.")]
struct Cli {
    /// JSON configuration file (created by `config reset`).
    #[arg(long, global = true, default_value = "formula-qr.json")]
    config: PathBuf,

    /// Override the configured characters-per-code capacity.
    #[arg(long, global = true)]
    capacity: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encode a whole file into fragment texts.
    EncodeFile {
        #[arg(long)]
        input: PathBuf,
        /// Write fragment texts here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Encode a region of a workbook (JSON) into fragment texts.
    EncodeRegion {
        #[arg(long)]
        workbook: PathBuf,
        /// Region such as `A1:D10`; defaults to the last region used.
        #[arg(long)]
        region: Option<String>,
        /// Sheet name; defaults to the last sheet used, then the active sheet.
        #[arg(long)]
        sheet: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Rebuild a file or region from scanned fragment texts.
    Decode {
        /// Files holding one fragment text per line (`-` for stdin). May repeat.
        #[arg(long = "input", required = true)]
        inputs: Vec<PathBuf>,
        /// Restored file, or workbook JSON for regions.
        #[arg(long)]
        output: PathBuf,
        /// Where to dump the raw combined bytes if restoring fails.
        #[arg(long, default_value = ".")]
        diagnostics_dir: PathBuf,
    },
    /// List the sheets of a workbook (JSON).
    Sheets {
        #[arg(long)]
        workbook: PathBuf,
    },
    /// Show or reset the configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
    Reset,
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries fragment texts.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = TransportConfig::load(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    if let Some(capacity) = cli.capacity {
        config.capacity = capacity;
    }

    match cli.command {
        Command::EncodeFile { input, output } => {
            let codec = TransportCodec::new(config);
            let fragments = codec
                .encode_file_at(&input, &progress, &CancellationToken::new())
                .with_context(|| format!("encode {}", input.display()))?;
            write_fragments(&fragments, output.as_deref())
        }
        Command::EncodeRegion {
            workbook,
            region,
            sheet,
            output,
        } => encode_region(cli.config.as_path(), config, &workbook, region, sheet, output),
        Command::Decode {
            inputs,
            output,
            diagnostics_dir,
        } => decode(config, &inputs, &output, &diagnostics_dir),
        Command::Sheets { workbook } => {
            let workbook = files::read_workbook(&workbook)?;
            for name in workbook.sheet_names() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Reset => {
                TransportConfig::default()
                    .save(&cli.config)
                    .with_context(|| format!("write config {}", cli.config.display()))?;
                tracing::info!("reset {}", cli.config.display());
                Ok(())
            }
        },
    }
}

fn progress(percent: f32, message: &str) {
    tracing::debug!("{percent:>5.1}% {message}");
}

fn encode_region(
    config_path: &Path,
    mut config: TransportConfig,
    workbook_path: &Path,
    region: Option<String>,
    sheet: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let region = region.unwrap_or_else(|| config.region.last_region.clone());
    let sheet = sheet.unwrap_or_else(|| config.region.last_sheet.clone());

    let workbook = files::read_workbook(workbook_path)?;
    let source_name = workbook_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let codec = TransportCodec::new(config.clone());
    let snapshot = codec
        .capture_region(&workbook, &source_name, &region, Some(sheet.as_str()), &progress)
        .with_context(|| format!("capture {region}"))?;
    let fragments = codec.encode(
        &Artifact::Region(snapshot),
        &progress,
        &CancellationToken::new(),
    )?;
    write_fragments(&fragments, output.as_deref())?;

    config.region.last_region = region;
    config.region.last_sheet = sheet;
    if let Err(err) = config.save(config_path) {
        tracing::warn!("could not remember region selection: {err}");
    }
    Ok(())
}

fn write_fragments(fragments: &[Fragment], output: Option<&Path>) -> Result<()> {
    let mut text = String::new();
    for fragment in fragments {
        text.push_str(fragment.text());
        text.push('\n');
    }
    tracing::info!("{} fragment(s)", fragments.len());
    match output {
        Some(path) => files::write_atomic(path, text.as_bytes()),
        None => files::write_stdout(text.as_bytes()),
    }
}

fn decode(
    config: TransportConfig,
    inputs: &[PathBuf],
    output: &Path,
    diagnostics_dir: &Path,
) -> Result<()> {
    let mut texts = Vec::new();
    for input in inputs {
        let content = if input.as_os_str() == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin")?;
            buf
        } else {
            std::fs::read_to_string(input)
                .with_context(|| format!("read {}", input.display()))?
        };
        texts.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }

    let codec = TransportCodec::new(config);
    match codec.decode(&texts, &progress, &CancellationToken::new()) {
        Ok(Restored::File { bytes }) => {
            files::write_atomic(output, &bytes)?;
            tracing::info!("restored {} bytes to {}", bytes.len(), output.display());
            Ok(())
        }
        Ok(Restored::Region { snapshot, workbook }) => {
            files::write_workbook(output, &workbook)?;
            tracing::info!(
                "restored region {} of {:?} to {}",
                snapshot.meta.region,
                snapshot.meta.sheet_name,
                output.display()
            );
            Ok(())
        }
        Err(failure) => {
            if let TransportError::MissingFragments(missing) = &failure.error {
                let list: Vec<String> = missing.iter().map(u32::to_string).collect();
                bail!("incomplete data; rescan fragments {}", list.join(", "));
            }
            match failure.write_diagnostics(diagnostics_dir) {
                Ok(Some(path)) => tracing::warn!("raw data saved to {}", path.display()),
                Ok(None) => {}
                Err(err) => tracing::warn!("could not save raw data: {err}"),
            }
            Err(failure.into())
        }
    }
}
