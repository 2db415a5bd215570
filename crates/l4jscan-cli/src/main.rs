//! l4jscan - a simple local log4j vulnerability scanner
//!
//! Walks directory trees for Java archives, including archives nested in
//! other archives and archives behind launcher prefixes, and reports classes
//! that match a known vulnerable log4j build.

mod progress;
mod walker;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use walker::{ScanOptions, Walker};

/// Modules whose debug output `-v` enables
const DEBUG_TARGETS: &[&str] = &["l4jscan::walker", "l4jscan::progress"];

/// Scan local paths for vulnerable log4j components
#[derive(Parser, Debug)]
#[command(name = "l4jscan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Paths to search for Java code
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to exclude; can be given multiple times
    #[arg(long, value_name = "PATH")]
    exclude: Vec<PathBuf>,

    /// Report files and archive members that cannot be read
    #[arg(long)]
    report_inaccessible: bool,

    /// Log every archive considered (-v), or everything (-vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write findings and log output to FILE
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// No output unless vulnerable
    #[arg(short, long)]
    quiet: bool,

    /// Ignore log4j 1.x versions
    #[arg(long)]
    ignore_v1: bool,

    /// Log progress every N scanned items
    #[arg(long, value_name = "N", default_value_t = 100_000, value_parser = clap::value_parser!(u64).range(1..))]
    progress_interval: u64,

    /// Maximum nesting depth of archives within archives
    #[arg(long, value_name = "N", default_value_t = 8)]
    max_depth: usize,

    /// Archive members larger than this are not read
    #[arg(long, value_name = "BYTES", default_value_t = 512 * 1024 * 1024)]
    max_entry_size: u64,
}

impl Cli {
    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            excludes: self.exclude.clone(),
            report_inaccessible: self.report_inaccessible,
            check_legacy: !self.ignore_v1,
            progress_interval: self.progress_interval,
            max_depth: self.max_depth,
            max_entry_size: self.max_entry_size,
        }
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let level = if self.quiet {
            Level::ERROR
        } else {
            match self.verbose {
                0 | 1 => Level::INFO,
                _ => Level::TRACE,
            }
        };
        let mut filter = EnvFilter::from_default_env().add_directive(level.into());
        // -v opens up the scanner's own debug output, not the library's.
        // Targets match by prefix, so `l4jscan` alone would include `l4jscan_core`.
        if !self.quiet && self.verbose == 1 {
            for target in DEBUG_TARGETS {
                filter = filter.add_directive(format!("{target}=debug").parse()?);
            }
        }
        Ok(filter)
    }
}

/// Findings share the log file with the tracing subscriber
struct LogFile(Arc<File>);

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self.0).flush()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        println!("{} - a simple local log4j vulnerability scanner\n", env!("CARGO_BIN_NAME"));
    }

    let log_file = cli
        .log
        .as_ref()
        .map(|path| {
            File::create(path).with_context(|| format!("Could not create log file: {}", path.display()))
        })
        .transpose()?
        .map(Arc::new);

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(cli.env_filter()?)
        .with_target(false);
    let out: Box<dyn Write> = match &log_file {
        Some(file) => {
            subscriber.with_writer(Arc::clone(file)).with_ansi(false).init();
            Box::new(LogFile(Arc::clone(file)))
        }
        None => {
            subscriber.init();
            Box::new(io::stdout())
        }
    };

    let start = Instant::now();
    let mut walker = Walker::new(cli.scan_options(), out);
    for root in &cli.paths {
        let root_start = Instant::now();
        walker.scan_root(root)?;
        info!("Scanned {} in {} ms", root.display(), root_start.elapsed().as_millis());
    }
    info!(
        "{} items scanned, {} vulnerable components found",
        walker.scanned(),
        walker.matched()
    );
    walker.into_output().flush().context("Failed to flush findings")?;

    if !cli.quiet {
        println!("\nScan finished in {} ms", start.elapsed().as_millis());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["l4jscan", "/srv"]).unwrap();
        let options = cli.scan_options();
        assert!(options.check_legacy);
        assert!(!options.report_inaccessible);
        assert_eq!(options.progress_interval, 100_000);
        assert_eq!(options.max_depth, 8);
        assert_eq!(options.max_entry_size, 512 * 1024 * 1024);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "l4jscan",
            "--exclude",
            "/srv/cache",
            "--exclude",
            "/srv/tmp",
            "--ignore-v1",
            "--report-inaccessible",
            "-vv",
            "/srv",
            "/opt",
        ])
        .unwrap();
        assert_eq!(cli.paths, vec![PathBuf::from("/srv"), PathBuf::from("/opt")]);
        assert_eq!(cli.exclude.len(), 2);
        assert_eq!(cli.verbose, 2);
        let options = cli.scan_options();
        assert!(!options.check_legacy);
        assert!(options.report_inaccessible);
    }

    #[test]
    fn test_verbose_debug_stays_in_the_scanner() {
        let cli = Cli::try_parse_from(["l4jscan", "-v", "/srv"]).unwrap();
        let filter = cli.env_filter().unwrap().to_string();
        assert!(filter.contains("l4jscan::walker=debug"), "{filter}");
        assert!(filter.contains("l4jscan::progress=debug"), "{filter}");
        assert!(!filter.contains("l4jscan=debug"), "{filter}");

        let cli = Cli::try_parse_from(["l4jscan", "/srv"]).unwrap();
        let filter = cli.env_filter().unwrap().to_string();
        assert!(!filter.contains("l4jscan::walker"), "{filter}");
    }

    #[test]
    fn test_paths_are_required() {
        assert!(Cli::try_parse_from(["l4jscan"]).is_err());
        assert!(Cli::try_parse_from(["l4jscan", "--progress-interval", "0", "/srv"]).is_err());
    }
}
