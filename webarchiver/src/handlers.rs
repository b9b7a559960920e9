use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use url::Url;
use webarchiver_core::{
    ArchiveOptions, CdxSnapshotIndex, Config, SnapshotMode, execute_archive,
    generate_archive_report, summarize,
};

/// Load URLs from the positional arguments and, when given, a hosts file
pub fn load_urls_from_source(targets: &[String], hosts_file: Option<&PathBuf>) -> Result<Vec<String>> {
    let mut urls = Vec::new();
    if let Some(hosts_file_path) = hosts_file {
        urls.extend(load_urls_from_file(hosts_file_path)?);
    }
    urls.extend(targets.iter().filter_map(|t| parse_url_line(t.trim())));

    if urls.is_empty() {
        bail!("Provide at least one URL or a --hosts-file");
    }
    Ok(urls)
}

/// Load and parse URLs from a file. Blank lines and `#` comments are skipped.
pub fn load_urls_from_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read hosts file {}", path.display()))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        bail!("No valid URLs found in {}", path.display());
    }
    Ok(urls)
}

/// Parse a single line as an http(s) URL, adding `http://` if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line)
        && matches!(url.scheme(), "http" | "https")
        && url.has_host()
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if let Ok(url) = Url::parse(&with_scheme)
        && url.host_str().is_some_and(|h| !h.is_empty())
        && !line.contains(char::is_whitespace)
    {
        return Some(with_scheme);
    }

    eprintln!("{} Skipping invalid URL '{}'", "[!]".yellow(), line);
    None
}

/// Split a trailing integer off the positional arguments; it is the link depth.
pub fn split_trailing_depth(args: &[String]) -> (Vec<String>, Option<u32>) {
    match args.split_last() {
        Some((last, rest)) => match last.trim().parse::<u32>() {
            Ok(depth) => (rest.to_vec(), Some(depth)),
            Err(_) => (args.to_vec(), None),
        },
        None => (Vec::new(), None),
    }
}

/// Pick the depth from `--depth` or the trailing argument.
pub fn resolve_depth(flag: Option<u32>, trailing: Option<u32>) -> Result<u32> {
    match (flag, trailing) {
        (Some(a), Some(b)) if a != b => {
            bail!("Depth given twice ({} via --depth, {} as trailing argument)", a, b)
        }
        (Some(depth), _) | (None, Some(depth)) => Ok(depth),
        (None, None) => Ok(0),
    }
}

pub fn snapshot_mode(matches: &ArgMatches) -> SnapshotMode {
    if let Some(timestamp) = matches.get_one::<String>("snapshot") {
        SnapshotMode::Specific(timestamp.trim().to_string())
    } else if matches.get_flag("all-snapshots") {
        SnapshotMode::AllSnapshots
    } else {
        SnapshotMode::Live
    }
}

/// Apply command-line overrides on top of the environment config
pub fn apply_overrides(mut config: Config, matches: &ArgMatches) -> Config {
    if let Some(output) = matches.get_one::<String>("output") {
        config.output_dir = PathBuf::from(shellexpand::tilde(output).as_ref());
    }
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.http_timeout = Duration::from_secs(*timeout);
    }
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config.workers = (*workers).max(1);
    }
    config
}

/// Install the global fmt subscriber. `--quiet` caps output at warnings.
pub fn init_tracing(level: Level, quiet: bool) {
    let level = if quiet { level.min(Level::WARN) } else { level };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn print_banner() {
    println!("{}", "═".repeat(60).bright_blue().bold());
    println!(
        "{} {}",
        "  WEBARCHIVER".bright_white().bold(),
        env!("CARGO_PKG_VERSION").bright_black()
    );
    println!("{}", "═".repeat(60).bright_blue().bold());
}

/// Run an archive from parsed arguments. Returns whether every URL succeeded.
pub async fn handle_archive(matches: &ArgMatches) -> Result<bool> {
    let quiet = matches.get_flag("quiet");
    let config = apply_overrides(Config::from_env(), matches);
    init_tracing(config.log_level, quiet);

    let raw: Vec<String> = matches
        .get_many::<String>("targets")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let (targets, trailing_depth) = split_trailing_depth(&raw);
    let depth = resolve_depth(matches.get_one::<u32>("depth").copied(), trailing_depth)?;
    let urls = load_urls_from_source(&targets, matches.get_one::<PathBuf>("hosts-file"))?;
    let mode = snapshot_mode(matches);

    if !quiet {
        println!("\nArchiving {} URL(s)", urls.len());
        println!("Depth: {}", depth);
        println!("Workers: {}", config.workers);
        println!("Output: {}", config.output_dir.display());
        let mode_str = match &mode {
            SnapshotMode::Live => "live (latest snapshot on failure)".to_string(),
            SnapshotMode::AllSnapshots => "live (all snapshots on failure)".to_string(),
            SnapshotMode::Specific(ts) => format!("snapshot {}", ts),
        };
        println!("Source: {}\n", mode_str);
    }

    let index = Arc::new(
        CdxSnapshotIndex::new(config.wayback_api_url.clone(), config.http_timeout)
            .context("Failed to set up the snapshot index client")?,
    );

    let mut options = ArchiveOptions::new(urls, depth, mode, config).with_progress_bars(!quiet);
    if matches.get_flag("manifest") {
        options = options.with_manifest();
    }

    let progress_callback: Option<webarchiver_core::ArchiveProgressCallback> = if quiet {
        None
    } else {
        Some(Arc::new(|msg: String| {
            println!("{}", msg);
        }))
    };

    let outcomes = execute_archive(options, index, progress_callback).await?;

    if !quiet {
        println!("\n{} Archive complete!\n", "✓".green().bold());
        print!("{}", generate_archive_report(&outcomes));
    }

    let summary = summarize(&outcomes);
    Ok(summary.failed == 0)
}
