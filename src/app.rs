use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing_subscriber::EnvFilter;

use crate::{
    crawl::{CheckOptions, CheckResult, LinkChecker, LinkState, DEFAULT_CONCURRENCY},
    events::CrawlEvent,
};

#[derive(Debug, Parser)]
#[command(
    name = "linkscout",
    version,
    about = "Check a site or a local directory for broken links."
)]
struct Args {
    /// Starting URLs, or local paths / globs.
    paths: Vec<String>,

    /// Follow links into pages under the starting URL.
    #[arg(short, long)]
    recurse: bool,

    /// Maximum number of link checks in flight at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-request timeout in milliseconds (0 disables the deadline).
    #[arg(long)]
    timeout: Option<u64>,

    /// Regex for URLs to report as skipped instead of checking; repeatable.
    #[arg(long = "skip", value_name = "PATTERN")]
    skip: Vec<String>,

    /// Serve .md files as rendered HTML in local mode.
    #[arg(long)]
    markdown: bool,

    /// Directory to serve local paths from.
    #[arg(long, value_name = "DIR")]
    server_root: Option<PathBuf>,

    /// Let the local server render directory listings.
    #[arg(long)]
    directory_listing: bool,

    /// Fixed port for the local server.
    #[arg(long)]
    port: Option<u16>,

    /// JSON config file; command-line flags win over it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value = "text")]
    format: Format,

    /// Print every checked link, not only the broken ones.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// On-disk counterpart of the command-line flags.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    paths: Vec<String>,
    concurrency: Option<usize>,
    recurse: Option<bool>,
    timeout: Option<u64>,
    #[serde(default)]
    skip: Vec<String>,
    markdown: Option<bool>,
    server_root: Option<PathBuf>,
    directory_listing: Option<bool>,
    port: Option<u16>,
}

pub async fn run() -> Result<i32> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let options = build_options(&args)?;
    let checker = LinkChecker::new();

    let printer =
        (args.format == Format::Text).then(|| spawn_printer(checker.subscribe(), args.verbose));

    let result = checker.check(options).await?;
    drop(checker);
    if let Some(printer) = printer {
        printer.await.ok();
    }

    match args.format {
        Format::Json => {
            let json =
                serde_json::to_string_pretty(&result).context("failed to serialize results")?;
            println!("{json}");
        }
        Format::Text => print_summary(&result),
    }

    Ok(if result.passed { 0 } else { 1 })
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "linkscout=debug"
    } else {
        "linkscout=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_options(args: &Args) -> Result<CheckOptions> {
    let file = match &args.config {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_json::from_slice::<ConfigFile>(&bytes)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        }
        None => ConfigFile::default(),
    };

    Ok(CheckOptions {
        paths: if args.paths.is_empty() {
            file.paths
        } else {
            args.paths.clone()
        },
        concurrency: args
            .concurrency
            .or(file.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY),
        recurse: args.recurse || file.recurse.unwrap_or(false),
        timeout: args
            .timeout
            .or(file.timeout)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis),
        links_to_skip: if args.skip.is_empty() {
            file.skip
        } else {
            args.skip.clone()
        },
        skip_predicate: None,
        markdown: if args.markdown { Some(true) } else { file.markdown },
        server_root: args.server_root.clone().or(file.server_root),
        directory_listing: args.directory_listing || file.directory_listing.unwrap_or(false),
        port: args.port.or(file.port),
    })
}

fn spawn_printer(mut rx: broadcast::Receiver<CrawlEvent>, verbose: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(CrawlEvent::Link(link)) => match link.state {
                    LinkState::Ok => {
                        if verbose {
                            println!("[{}] {}", link.status, link.url);
                        }
                    }
                    LinkState::Skipped => {
                        if verbose {
                            println!("[skipped] {}", link.url);
                        }
                    }
                    LinkState::Broken => match &link.parent {
                        Some(parent) => {
                            println!("[{}] {} (found on {})", link.status, link.url, parent)
                        }
                        None => println!("[{}] {}", link.status, link.url),
                    },
                },
                Ok(CrawlEvent::PageStart(url)) => {
                    if verbose {
                        println!("scanning {url}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_summary(result: &CheckResult) {
    let broken = result
        .links
        .iter()
        .filter(|l| l.state == LinkState::Broken)
        .count();
    let skipped = result
        .links
        .iter()
        .filter(|l| l.state == LinkState::Skipped)
        .count();
    println!(
        "{} links checked, {} skipped, {} broken",
        result.links.len(),
        skipped,
        broken
    );
}
