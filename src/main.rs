use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use tracing_subscriber::EnvFilter;

use mrzscan::ocr::OcrError;
use mrzscan::scan::{build_graph, extract_rois, read_mrz, ScanConfig};
use mrzscan::MrzRecord;

#[derive(Parser, Debug)]
#[command(name = "mrzscan")]
#[command(version, about = "Machine-readable zone detection in scanned identity documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read the MRZ from an image or PDF file
    Read {
        /// Input image or PDF file path
        input: PathBuf,

        /// Print the parsed record as JSON
        #[arg(short, long)]
        json: bool,

        /// Save the extracted MRZ region to this PNG file
        #[arg(long, value_name = "FILE")]
        save_roi: Option<PathBuf>,

        /// Use the legacy (non-LSTM) recognizer
        #[arg(long)]
        legacy: bool,

        /// Kill the recognizer if it runs longer than this many seconds
        #[arg(long, value_name = "SECONDS")]
        ocr_timeout: Option<u64>,
    },

    /// Extract the candidate MRZ regions without running OCR
    Rois {
        /// Input image or PDF file path
        input: PathBuf,

        /// Directory the region images are written to
        #[arg(short = 'd', long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Scan every image in a directory and report aggregate accuracy
    Eval {
        /// Directory with test images
        data_dir: PathBuf,

        /// Copy inputs that produced a valid record here
        #[arg(long)]
        success_dir: Option<PathBuf>,

        /// Copy inputs that did not here
        #[arg(long)]
        fail_dir: Option<PathBuf>,

        /// Stop after this many files
        #[arg(long)]
        limit: Option<usize>,

        /// Worker threads (default: one per core)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Use the legacy (non-LSTM) recognizer
        #[arg(long)]
        legacy: bool,

        /// Kill the recognizer if it runs longer than this many seconds
        #[arg(long, value_name = "SECONDS")]
        ocr_timeout: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Read {
            input,
            json,
            save_roi,
            legacy,
            ocr_timeout,
        } => read_single(&input, json, save_roi, legacy, ocr_timeout),
        Commands::Rois { input, output_dir } => dump_rois(&input, &output_dir),
        Commands::Eval {
            data_dir,
            success_dir,
            fail_dir,
            limit,
            jobs,
            legacy,
            ocr_timeout,
        } => evaluate(
            &data_dir,
            success_dir.as_deref(),
            fail_dir.as_deref(),
            limit,
            jobs,
            legacy,
            ocr_timeout,
        ),
    }
}

fn scan_config(legacy: bool, ocr_timeout: Option<u64>) -> ScanConfig {
    ScanConfig {
        legacy_ocr: legacy,
        ocr_timeout: ocr_timeout.map(Duration::from_secs),
        ..ScanConfig::default()
    }
}

/// Recognizer failures get their own message and exit code so scripts can
/// tell a missing tesseract install apart from a bad scan.
fn report_ocr_error(err: &anyhow::Error) -> Option<i32> {
    match err.downcast_ref::<OcrError>()? {
        OcrError::NotInstalled => {
            eprintln!("[!] tesseract was not found; install it and make sure it is on PATH");
            Some(2)
        }
        other => {
            eprintln!("[!] ocr failed: {other}");
            Some(3)
        }
    }
}

fn read_single(
    input: &Path,
    json: bool,
    save_roi: Option<PathBuf>,
    legacy: bool,
    ocr_timeout: Option<u64>,
) -> Result<()> {
    if !input.is_file() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }

    let config = scan_config(legacy, ocr_timeout);
    let started = Instant::now();
    let record = match read_mrz(input, &config) {
        Ok(record) => record,
        Err(err) => {
            if let Some(code) = report_ocr_error(&err) {
                std::process::exit(code);
            }
            return Err(err);
        }
    };
    let walltime = started.elapsed().as_secs_f64();

    if let Some(path) = save_roi {
        match &record.roi {
            Some(roi) => roi
                .save(&path)
                .with_context(|| format!("Failed to save ROI to: {}", path.display()))?,
            None => eprintln!("[!] No region was extracted; nothing to save"),
        }
    }

    if json {
        print_json(&record, input, walltime)?;
    } else {
        for (key, value) in record.to_field_map() {
            println!("{key}\t{value}");
        }
        println!("walltime\t{walltime:.2}");
    }
    Ok(())
}

fn print_json(record: &MrzRecord, input: &Path, walltime: f64) -> Result<()> {
    let mut value = serde_json::to_value(record)?;
    if let Some(fields) = value.as_object_mut() {
        fields.insert(
            "filename".to_string(),
            serde_json::Value::from(input.display().to_string()),
        );
        fields.insert("walltime".to_string(), serde_json::Value::from(walltime));
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn dump_rois(input: &Path, output_dir: &Path) -> Result<()> {
    if !input.is_file() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create: {}", output_dir.display()))?;

    let config = ScanConfig::default();
    let mut graph = build_graph(input, &config)?;
    let rois = extract_rois(&mut graph)?;
    if rois.is_empty() {
        println!("[!] No candidate regions found");
        return Ok(());
    }

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "roi".to_string());
    for (i, roi) in rois.iter().enumerate() {
        let path = output_dir.join(format!("{stem}_roi_{i}.png"));
        roi.save(&path)
            .with_context(|| format!("Failed to save: {}", path.display()))?;
        println!("[+] {}", path.display());
    }
    Ok(())
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp", "pdf"];

fn evaluate(
    data_dir: &Path,
    success_dir: Option<&Path>,
    fail_dir: Option<&Path>,
    limit: Option<usize>,
    jobs: Option<usize>,
    legacy: bool,
    ocr_timeout: Option<u64>,
) -> Result<()> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(data_dir)
        .with_context(|| format!("Cannot read directory: {}", data_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        })
        .collect();
    files.sort();
    if let Some(limit) = limit {
        files.truncate(limit);
    }
    if files.is_empty() {
        anyhow::bail!("No images found in: {}", data_dir.display());
    }
    for dir in [success_dir, fail_dir].into_iter().flatten() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create: {}", dir.display()))?;
    }
    if let Some(jobs) = jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .context("Failed to configure worker threads")?;
    }

    println!("[*] Evaluating {} file(s)", files.len());
    let config = scan_config(legacy, ocr_timeout);
    let started = Instant::now();

    let results: Vec<(PathBuf, Result<MrzRecord>)> = files
        .par_iter()
        .map(|path| (path.clone(), read_mrz(path, &config)))
        .collect();

    let mut valid = 0usize;
    let mut score_sum = 0u64;
    let mut methods: std::collections::BTreeMap<String, usize> = Default::default();
    for (path, result) in &results {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let name = name.as_deref().unwrap_or("?");
        match result {
            Ok(record) => {
                score_sum += record.valid_score as u64;
                if let Some(method) = record.aux.get("method") {
                    *methods.entry(method.clone()).or_default() += 1;
                }
                let ok = record.valid;
                if ok {
                    valid += 1;
                }
                println!(
                    "[{}] {:3} {}",
                    if ok { "✓" } else { "✗" },
                    record.valid_score,
                    name
                );
                let target = if ok { success_dir } else { fail_dir };
                if let Some(dir) = target {
                    std::fs::copy(path, dir.join(name))
                        .with_context(|| format!("Failed to copy: {}", path.display()))?;
                }
            }
            Err(err) => {
                if let Some(code) = report_ocr_error(err) {
                    std::process::exit(code);
                }
                eprintln!("[✗] err {name}: {err}");
            }
        }
    }

    if !methods.is_empty() {
        println!("\n[*] Methods:");
        for (method, count) in &methods {
            println!("    {count:4}  {method}");
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    println!(
        "\n[*] Summary: {}/{} valid, mean score {:.1}, {:.1}s total",
        valid,
        results.len(),
        score_sum as f64 / results.len() as f64,
        elapsed
    );
    Ok(())
}
