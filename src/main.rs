mod app;

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fetchq::{
    utils::{filename_from_url, parse_download_url},
    DownloadManager, HttpTransfer, TransferConfig, DEFAULT_MAX_CONCURRENT_DOWNLOADS,
};
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::app::ConsoleReporter;

/// Download files over HTTP, a few at a time
#[derive(Parser, Debug)]
#[command(name = "fetchq", version, about)]
struct Args {
    /// URLs to download, started in the order given
    #[arg(required = true)]
    urls: Vec<String>,

    /// Destination file name for the URL at the same position (repeatable)
    #[arg(short, long = "output", value_name = "NAME")]
    output: Vec<String>,

    /// Directory to store downloads in
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Maximum number of simultaneous downloads
    #[arg(short = 'j', long, default_value_t = DEFAULT_MAX_CONCURRENT_DOWNLOADS)]
    max_concurrent: usize,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    connect_timeout: u64,

    /// Overall timeout per download in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Print progress as JSON lines
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,

    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let transfer = HttpTransfer::new(TransferConfig {
        download_dir: args.dir.clone(),
        connect_timeout: Duration::from_secs(args.connect_timeout),
        timeout: args.timeout.map(Duration::from_secs),
        ..Default::default()
    })
    .context("Failed to build HTTP client")?;

    if args.output.len() > args.urls.len() {
        warn!(
            "{} output names given for {} URLs, extra names are ignored",
            args.output.len(),
            args.urls.len()
        );
    }

    let total = args.urls.len();
    let reporter = Arc::new(ConsoleReporter::new(args.json, total));
    let listener: Weak<ConsoleReporter> = Arc::downgrade(&reporter);
    let manager = DownloadManager::with_options(
        listener,
        Arc::new(transfer),
        args.max_concurrent,
    )?;

    for (index, url) in args.urls.iter().enumerate() {
        let filename = args
            .output
            .get(index)
            .cloned()
            .or_else(|| {
                parse_download_url(url)
                    .ok()
                    .and_then(|url| filename_from_url(&url))
            })
            .unwrap_or_else(|| format!("download-{}", index + 1));

        if let Err(e) = manager.add_download(filename.clone(), url) {
            error!(%url, %filename, "Skipping download: {}", e);
            reporter.skip();
        }
    }

    tokio::select! {
        _ = reporter.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            manager.cancel_all();
            bail!("Interrupted, canceled running downloads");
        }
    }

    let failed = reporter.failed();
    if failed > 0 {
        bail!("{} of {} downloads failed", failed, total);
    }

    info!("All {} downloads finished", total);
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    tracing_subscriber::registry()
        .with(log_filter(verbose, quiet))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

/// `--quiet` and `--verbose` win over `RUST_LOG`; without either, `RUST_LOG`
/// is used as given and `info` is the fallback.
fn log_filter(verbose: bool, quiet: bool) -> EnvFilter {
    if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter(false, true).to_string(), "error");
        assert_eq!(log_filter(true, false).to_string(), "debug");

        std::env::set_var("RUST_LOG", "warn");
        assert_eq!(log_filter(false, false).to_string(), "warn");
        std::env::remove_var("RUST_LOG");
        assert_eq!(log_filter(false, false).to_string(), "info");
    }

    #[test]
    fn test_parses_repeated_outputs() {
        let args = Args::try_parse_from([
            "fetchq",
            "-j",
            "3",
            "-o",
            "a.bin",
            "-o",
            "b.bin",
            "https://example.com/1",
            "https://example.com/2",
        ])
        .unwrap();

        assert_eq!(args.max_concurrent, 3);
        assert_eq!(args.output, vec!["a.bin", "b.bin"]);
        assert_eq!(args.urls.len(), 2);
        assert!(Args::try_parse_from(["fetchq"]).is_err());
    }
}
