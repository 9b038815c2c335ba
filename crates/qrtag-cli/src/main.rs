//! qrtag CLI - Command line tool for printing QR code sticker sheets.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use qrtag_core::{AppConfig, DocumentAssembler, PageSize, StickerRecord};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, ValueEnum)]
enum PageSizeOption {
    A4,
    Letter,
}

impl From<PageSizeOption> for PageSize {
    fn from(opt: PageSizeOption) -> Self {
        match opt {
            PageSizeOption::A4 => Self::A4,
            PageSizeOption::Letter => Self::Letter,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "qrtag")]
#[command(author, version, about = "Print QR code stickers onto a PDF background", long_about = None)]
#[command(after_help = "Each sticker must fit on one page. At the default 60 pt caption size, \
an A4 page holds up to three wrapped caption lines and a Letter page two; longer captions \
fail the build instead of spilling onto another page.")]
struct Args {
    /// Records file: a JSON array of {"payload", "caption"} objects, or
    /// tab-separated `payload<TAB>caption` lines
    #[arg(required = true)]
    records: PathBuf,

    /// Output PDF file
    #[arg(short, long, default_value = "stickers.pdf")]
    output: PathBuf,

    /// Background PDF (first page is used)
    #[arg(short, long, env = "QRTAG_BACKGROUND")]
    background: Option<PathBuf>,

    /// TrueType font for captions
    #[arg(long, env = "QRTAG_FONT")]
    font: Option<PathBuf>,

    /// Name the caption font is registered under
    #[arg(long)]
    font_name: Option<String>,

    /// Lower bound for the barcode image side, in pixels
    #[arg(long)]
    min_module_size: Option<u32>,

    /// Page size
    #[arg(long, value_enum)]
    page_size: Option<PageSizeOption>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Parse records from JSON or tab-separated text.
///
/// Content starting with `[` is read as JSON. Otherwise every non-blank line
/// not starting with `#` must be `payload<TAB>caption`.
fn parse_records(content: &str) -> Result<Vec<StickerRecord>> {
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(content).context("Invalid JSON records");
    }

    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let (payload, caption) = line
            .split_once('\t')
            .with_context(|| format!("Line {}: expected payload<TAB>caption", index + 1))?;
        records.push(StickerRecord::new(payload, caption));
    }
    Ok(records)
}

fn load_records(path: &Path) -> Result<Vec<StickerRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records: {}", path.display()))?;
    parse_records(&content).with_context(|| format!("Failed to parse records: {}", path.display()))
}

fn main() -> Result<()> {
    // Load .env file if present (before parsing args so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Setup logging
    let log_level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    // Load or create config
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path).context("Failed to load config file")?
    } else {
        AppConfig::load()
    };

    // Override config with CLI arguments
    if let Some(background) = args.background {
        config.background = background;
    }
    if let Some(font) = args.font {
        config.font_path = Some(font);
    }
    if let Some(name) = args.font_name {
        config.layout.caption_font_name = name;
    }
    if let Some(min) = args.min_module_size {
        config.barcode.min_module_size = min;
    }
    if let Some(page_size) = args.page_size {
        config.layout.page_size = page_size.into();
    }

    let records = load_records(&args.records)?;
    info!("Loaded {} record(s) from {}", records.len(), args.records.display());

    let background = config.background.clone();
    let assembler = DocumentAssembler::new(config).context("Failed to initialize sticker builder")?;

    // Setup progress bar
    #[allow(clippy::cast_possible_truncation)]
    let pb = ProgressBar::new(records.len() as u64);
    // Template is hardcoded and valid, unwrap is safe
    #[allow(clippy::unwrap_used)]
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let progress = |done: usize, _total: usize| {
        #[allow(clippy::cast_possible_truncation)]
        pb.set_position(done as u64);
    };

    let report = assembler
        .build_with_progress(&args.output, &records, &background, Some(&progress))
        .context(format!("Failed to build {}", args.output.display()));
    pb.finish_and_clear();
    let report = report?;

    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        println!(
            "Wrote {} sticker(s) to: {}",
            report.pages,
            report.output.display()
        );
    }

    Ok(())
}
