use clap::{Parser, Subcommand};
use newsprint::{Measure, Newsprint, NewsprintError, TextMetricsMeasure};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lay out an RSS feed as a print edition
    Render {
        /// RSS 2.0 document
        feed: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON-lines trace of fitting decisions
        #[arg(long)]
        trace: Option<PathBuf>,

        /// TrueType/OpenType font used for text measurement
        #[arg(long)]
        font: Option<PathBuf>,

        /// Print the layout audit report to stderr
        #[arg(long)]
        audit: bool,

        /// Audit gate profile (default, strict or draft)
        #[arg(long, default_value = "default")]
        profile: String,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            log::error!("{err}");
            eprintln!("newsprint: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the audit gate passed (always true without `--audit`).
fn run(command: Command) -> Result<bool, NewsprintError> {
    let Command::Render {
        feed,
        output,
        trace,
        font,
        audit,
        profile,
    } = command;

    let xml = fs::read_to_string(&feed)?;
    let measure = match font {
        Some(path) => TextMetricsMeasure::from_font_file(path)?,
        None => TextMetricsMeasure::new(),
    };
    let measure: &dyn Measure = &measure;

    let mut builder = Newsprint::builder();
    if let Some(path) = trace {
        builder = builder.debug_log(path);
    }
    let engine = builder.build()?;
    let (layout, report) = engine.layout_feed(&xml, measure)?;
    if !report.metrics.fallbacks.is_empty() {
        log::warn!("fitting fell back for: {}", report.metrics.fallbacks.join(", "));
    }

    let html = layout.to_html();
    match output {
        Some(path) => fs::write(path, html)?,
        None => println!("{html}"),
    }

    if !audit {
        return Ok(true);
    }
    let audit = engine.audit(&layout, measure);
    let json = audit.to_json(&profile);
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
    );
    Ok(audit.score(&profile).gate_passed)
}
