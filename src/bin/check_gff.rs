use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use arbor::builder::{parse_gff3, parse_gff3_gz};
use arbor::cli;
use arbor::config::Config;
use arbor::diagnostics::Diagnostics;
use arbor::emit::structured_output;
use arbor::expect::validate;

#[derive(Parser)]
#[command(
    name = "check_gff",
    about = "Parse a GFF3 file into a feature forest and validate it against a rule set"
)]
struct Cli {
    /// Input GFF3 file (gzip input is detected by the .gz extension)
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// JSON rule file declaring parser knobs and expectations
    #[arg(short = 'c', long = "rules")]
    rules: Option<PathBuf>,

    /// Write the validated forest back out as GFF3 (stdout with "-")
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Suppress duplicate siblings created by plural Parent attributes
    #[arg(long = "skip-duplicates")]
    skip_duplicates: bool,
}

fn main() -> Result<()> {
    let start = Instant::now();
    let cli_args = Cli::parse();

    cli::banner("Check GFF3");

    // ── Configuration ────────────────────────────────────
    cli::section("Configuration");

    let config = match &cli_args.rules {
        Some(path) => {
            let config = Config::from_file(path)?;
            cli::kv("Rules", &path.display().to_string());
            config
        }
        None => {
            cli::kv("Rules", "(defaults)");
            Config::new()
        }
    };
    cli::kv("Expectations", &config.rule_count().to_string());
    eprintln!();

    // ── Parsing ──────────────────────────────────────────
    cli::section("Parsing");

    let file = File::open(&cli_args.input)
        .with_context(|| format!("failed to open input: {}", cli_args.input.display()))?;
    let mut diag = Diagnostics::new();
    let is_gz = cli_args
        .input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    let mut forest = if is_gz {
        parse_gff3_gz(file, &config, &mut diag)?
    } else {
        parse_gff3(BufReader::new(file), &config, &mut diag)?
    };

    cli::kv("Input", &cli_args.input.display().to_string());
    cli::kv("Features", &(forest.len() - 1).to_string());
    eprintln!();

    // ── Validation ───────────────────────────────────────
    cli::section("Validation");

    validate(&mut forest, &config, &mut diag)?;
    if diag.is_empty() {
        cli::success("no warnings");
    } else {
        for warning in diag.warnings() {
            cli::warning(warning);
        }
        cli::kv("Warnings", &diag.len().to_string());
    }
    eprintln!();

    // ── Output ───────────────────────────────────────────
    if let Some(out_path) = &cli_args.out {
        cli::section("Output");
        let text = structured_output(&forest, forest.root(), cli_args.skip_duplicates)?;
        if out_path.as_os_str() == "-" {
            std::io::stdout()
                .write_all(text.as_bytes())
                .context("failed to write to stdout")?;
            cli::kv("Output", "stdout");
        } else {
            fs::write(out_path, &text)
                .with_context(|| format!("failed to write output: {}", out_path.display()))?;
            cli::kv("Output", &out_path.display().to_string());
            cli::kv("Lines", &text.lines().count().to_string());
        }
    }

    // ── Summary ──────────────────────────────────────────
    cli::print_summary(start);
    Ok(())
}
