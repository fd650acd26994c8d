use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use zarrs_dechunk::{
    metadata::ArrayMetadata,
    progress::{ProgressCallback, ProgressStats},
    DechunkOptions, Dechunker, ZARRS_DECHUNK_VERSION,
};

/// Convert a chunked Zarr V2 array into a single chunk array.
#[derive(Parser, Debug)]
#[command(author, version = ZARRS_DECHUNK_VERSION)]
struct Cli {
    /// Path to the Zarr V2 array (the directory containing .zarray).
    path: PathBuf,

    #[command(flatten)]
    options: DechunkOptions,

    /// Print the input and output array metadata and a summary.
    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    /// Hide the progress bar.
    #[arg(long, default_value_t = false)]
    hide_progress: bool,
}

fn bar_style_run() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}/{duration_precise}] {bar:40.black/bold} {pos}/{len} ({percent}%) {prefix} {msg}",
    )
    .unwrap_or(ProgressStyle::default_bar())
}

fn bar_style_finish() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}/{elapsed_precise}] {prefix} {msg}")
        .unwrap_or(ProgressStyle::default_bar())
}

fn progress_callback(stats: ProgressStats, bar: &ProgressBar) {
    bar.set_length(stats.num_steps as u64);
    bar.set_position(stats.step as u64);
    bar.set_message(format!(
        "r:{:.2} p:{:.2} w:{:.2}",
        stats.read.as_secs_f32(),
        stats.process.as_secs_f32(),
        stats.write.as_secs_f32(),
    ));
}

fn print_metadata(label: &str, metadata: &ArrayMetadata) -> anyhow::Result<()> {
    let json = metadata.to_json_pretty()?;
    println!("{label}:\n{}", String::from_utf8_lossy(&json));
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::init();

    let start = std::time::Instant::now();
    let dechunker = Dechunker::open(&cli.path)?;
    if cli.verbose {
        print_metadata("input", dechunker.metadata())?;
    }

    let bar = if cli.hide_progress {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    bar.set_style(bar_style_run());
    bar.set_prefix(format!("{}", cli.path.display()));
    let callback = |stats: ProgressStats| progress_callback(stats, &bar);
    let callback = ProgressCallback::new(&callback);

    let summary = match dechunker.dechunk(&cli.options, &callback) {
        Ok(summary) => summary,
        Err(err) => {
            bar.abandon();
            return Err(err.into());
        }
    };
    bar.set_style(bar_style_finish());
    bar.finish_with_message(format!("-> {}", summary.output_path.display()));

    if cli.verbose {
        print_metadata("output", &dechunker.metadata().with_single_chunk())?;
        println!(
            "Dechunked {} chunks ({:.2}MB) to {:?} ({:.2}MB encoded, {:.2}MB decoded) in {:.2}ms",
            summary.num_chunks,
            summary.bytes_read as f32 / 1e6,
            summary.output_path,
            summary.bytes_written as f32 / 1e6,
            summary.bytes_decoded as f32 / 1e6,
            start.elapsed().as_secs_f32() * 1e3,
        );
    }
    Ok(())
}

fn main() -> std::process::ExitCode {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::ExitCode::FAILURE
    } else {
        std::process::ExitCode::SUCCESS
    }
}
