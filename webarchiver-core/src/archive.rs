use crate::config::Config;
use crate::error::{ArchiveError, Result};
use crate::hooks::{HookContext, ManifestHook, MirroredRoot, PostMirrorHook, SelectionPageHook};
use crate::snapshot::{SnapshotIndex, validate_timestamp, wayback_url};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::instrument::WithSubscriber;
use tracing::{Instrument, error, info, info_span, warn};
use url::Url;
use webarchiver_mirror::{INDEX_HTML, Mirror, MirrorReport, MirrorRequest, SavedResource, create_dir};

/// Label of a mirror taken from the live site.
pub const LIVE_LABEL: &str = "Current";

/// Where each seed's content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SnapshotMode {
    /// The live site, falling back to its most recent capture.
    #[default]
    Live,
    /// The live site, falling back to every capture.
    AllSnapshots,
    /// One capture, identified by its `YYYYMMDDHHMMSS` timestamp.
    Specific(String),
}

/// Options for configuring an archive run
pub struct ArchiveOptions {
    pub urls: Vec<String>,
    pub depth: u32,
    pub mode: SnapshotMode,
    pub config: Config,
    pub show_progress_bars: bool,
    pub hooks: Vec<Arc<dyn PostMirrorHook>>,
}

impl ArchiveOptions {
    pub fn new(urls: Vec<String>, depth: u32, mode: SnapshotMode, config: Config) -> Self {
        Self {
            urls,
            depth,
            mode,
            config,
            show_progress_bars: false,
            hooks: vec![Arc::new(SelectionPageHook)],
        }
    }

    pub fn with_progress_bars(mut self, show: bool) -> Self {
        self.show_progress_bars = show;
        self
    }

    pub fn with_manifest(self) -> Self {
        self.with_hook(Arc::new(ManifestHook))
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostMirrorHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

/// Callback for reporting per-seed progress messages
pub type ArchiveProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// What was archived for one seed.
#[derive(Debug)]
pub struct ArchivedSeed {
    pub roots: Vec<MirroredRoot>,
    pub reports: Vec<MirrorReport>,
}

impl ArchivedSeed {
    pub fn files_saved(&self) -> usize {
        self.reports.iter().map(|r| r.saved.len()).sum()
    }

    pub fn bytes_saved(&self) -> u64 {
        self.reports.iter().map(MirrorReport::total_bytes).sum()
    }
}

#[derive(Debug)]
pub struct SeedOutcome {
    pub url: String,
    pub output_dir: PathBuf,
    pub result: Result<ArchivedSeed>,
}

impl SeedOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub files_saved: usize,
    pub bytes_saved: u64,
}

pub fn summarize(outcomes: &[SeedOutcome]) -> ArchiveSummary {
    let mut summary = ArchiveSummary {
        total: outcomes.len(),
        ..ArchiveSummary::default()
    };
    for outcome in outcomes {
        match &outcome.result {
            Ok(seed) => {
                summary.succeeded += 1;
                summary.files_saved += seed.files_saved();
                summary.bytes_saved += seed.bytes_saved();
            }
            Err(_) => summary.failed += 1,
        }
    }
    summary
}

/// State shared by every seed task of one run.
struct SeedJob<I> {
    mirror: Mirror,
    index: Arc<I>,
    hooks: Vec<Arc<dyn PostMirrorHook>>,
    mode: SnapshotMode,
    depth: u32,
    wayback_web_url: String,
    file_mode: u32,
}

impl<I: SnapshotIndex> SeedJob<I> {
    async fn archive_seed(&self, seed: &Url, dir: &Path) -> Result<ArchivedSeed> {
        let url = seed.as_str();
        let mirrored = match &self.mode {
            SnapshotMode::Specific(timestamp) => {
                info!(url = %url, timestamp = %timestamp, "Downloading specific snapshot");
                vec![self.mirror_snapshot(url, timestamp, dir, false).await?]
            }
            SnapshotMode::Live | SnapshotMode::AllSnapshots => {
                info!(url = %url, "Attempting direct download");
                match self.mirror_live(url, dir).await {
                    Ok(live) => vec![live],
                    Err(e) if e.is_validation() => return Err(e),
                    Err(e) => {
                        warn!(url = %url, error = %e, "Direct download failed, attempting archived versions");
                        self.mirror_archived(url, dir).await?
                    }
                }
            }
        };

        let (roots, reports): (Vec<_>, Vec<_>) = mirrored.into_iter().unzip();
        let ctx = HookContext {
            url,
            output_dir: dir,
            roots: &roots,
            file_mode: Some(self.file_mode),
        };
        for hook in &self.hooks {
            if let Err(e) = hook.run(&ctx) {
                warn!(url = %url, hook = hook.name(), error = %e, "Post-mirror hook failed");
            }
        }

        Ok(ArchivedSeed { roots, reports })
    }

    async fn mirror_live(&self, url: &str, dir: &Path) -> Result<(MirroredRoot, MirrorReport)> {
        let report = self.mirror.mirror(url, self.depth, dir).await?;
        let root = MirroredRoot {
            path: String::new(),
            label: LIVE_LABEL.to_string(),
            entry: entry_page(&report),
            source: url.to_string(),
        };
        Ok((root, report))
    }

    /// Mirror one capture, either into `dir` itself or into `dir/<timestamp>`.
    async fn mirror_snapshot(
        &self,
        url: &str,
        timestamp: &str,
        dir: &Path,
        own_directory: bool,
    ) -> Result<(MirroredRoot, MirrorReport)> {
        let source = wayback_url(&self.wayback_web_url, timestamp, url);
        let (path, target) = if own_directory {
            (timestamp.to_string(), dir.join(timestamp))
        } else {
            (String::new(), dir.to_path_buf())
        };

        let report = self.mirror.mirror(&source, self.depth, &target).await?;
        let root = MirroredRoot {
            path,
            label: timestamp.to_string(),
            entry: entry_page(&report),
            source,
        };
        Ok((root, report))
    }

    async fn mirror_archived(&self, url: &str, dir: &Path) -> Result<Vec<(MirroredRoot, MirrorReport)>> {
        let records = self.index.snapshots(url).await?;
        let mut seen = HashSet::new();
        let timestamps: Vec<&str> = records
            .iter()
            .map(|r| r.timestamp.as_str())
            .filter(|ts| match validate_timestamp(ts) {
                Ok(_) => seen.insert(*ts),
                Err(_) => {
                    warn!(url = %url, timestamp = %ts, "Ignoring malformed capture timestamp");
                    false
                }
            })
            .collect();

        if self.mode != SnapshotMode::AllSnapshots {
            // captures are listed oldest first
            let latest = timestamps
                .last()
                .ok_or_else(|| ArchiveError::NoSnapshots(url.to_string()))?;
            info!(url = %url, timestamp = %latest, "Downloading most recent archived version");
            return Ok(vec![self.mirror_snapshot(url, latest, dir, false).await?]);
        }

        info!(url = %url, count = timestamps.len(), "Downloading all archived versions");
        let mut mirrored = Vec::new();
        for timestamp in &timestamps {
            match self.mirror_snapshot(url, timestamp, dir, true).await {
                Ok(pair) => mirrored.push(pair),
                Err(e) => {
                    warn!(url = %url, timestamp = %timestamp, error = %e, "Failed to download snapshot")
                }
            }
        }
        if mirrored.is_empty() {
            return Err(ArchiveError::Snapshot(format!(
                "none of the {} captures of {} could be mirrored",
                timestamps.len(),
                url
            )));
        }
        Ok(mirrored)
    }
}

/// Local path of the start page of a finished mirror.
fn entry_page(report: &MirrorReport) -> String {
    report
        .find(&report.seed)
        .map(|saved| saved.local_path.clone())
        .unwrap_or_else(|| INDEX_HTML.to_string())
}

/// Execute an archive run with the given options.
///
/// Seeds are mirrored concurrently and the whole run is bounded by the HTTP
/// timeout multiplied by the number of seeds. A seed that fails, or is still
/// running at the deadline, has its output directory removed.
pub async fn execute_archive<I>(
    options: ArchiveOptions,
    index: Arc<I>,
    progress_callback: Option<ArchiveProgressCallback>,
) -> Result<Vec<SeedOutcome>>
where
    I: SnapshotIndex + 'static,
{
    let ArchiveOptions {
        urls,
        depth,
        mode,
        config,
        show_progress_bars,
        hooks,
    } = options;

    if let SnapshotMode::Specific(timestamp) = &mode {
        validate_timestamp(timestamp)?;
    }
    let seeds = urls
        .iter()
        .map(|url| {
            MirrorRequest::new(url, depth, config.output_dir.clone(), config.max_depth)
                .map(|request| request.seed)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if seeds.is_empty() {
        return Ok(Vec::new());
    }

    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Starting archive...");
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    } else {
        None
    };
    let saved_count = Arc::new(AtomicUsize::new(0));

    let mut mirror = Mirror::new(config.mirror_options())?;
    if let Some(pb) = progress_bar.clone() {
        let count = saved_count.clone();
        mirror = mirror.with_progress_callback(Arc::new(move |saved: &SavedResource| {
            let n = count.fetch_add(1, Ordering::Relaxed) + 1;
            pb.set_message(format!("Archiving... {} files saved ({})", n, saved.local_path));
        }));
    }

    create_dir(&config.output_dir, true, Some(config.dir_perms)).await?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut planned = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let dir = create_seed_dir(&config.output_dir, &seed, &stamp, config.dir_perms).await?;
        planned.push((seed, dir));
    }

    let job = Arc::new(SeedJob {
        mirror,
        index,
        hooks,
        mode,
        depth,
        wayback_web_url: config.wayback_web_url.clone(),
        file_mode: config.file_perms,
    });

    let budget = config
        .http_timeout
        .saturating_mul(u32::try_from(planned.len()).unwrap_or(u32::MAX));
    let now = tokio::time::Instant::now();
    let deadline = now
        .checked_add(budget)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365));

    let mut tasks = JoinSet::new();
    let mut task_seeds = HashMap::with_capacity(planned.len());
    for (idx, (seed, dir)) in planned.iter().enumerate() {
        let job = job.clone();
        let seed = seed.clone();
        let dir = dir.clone();
        let span = info_span!("seed", url = %seed);
        let handle = tasks.spawn(
            async move { job.archive_seed(&seed, &dir).await }
                .instrument(span)
                .with_current_subscriber(),
        );
        task_seeds.insert(handle.id(), idx);
    }

    let mut results: Vec<Option<Result<ArchivedSeed>>> = planned.iter().map(|_| None).collect();
    loop {
        let next = tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await;
        match next {
            Ok(Some(joined)) => {
                // a panicking seed fails on its own
                let (id, result) = match joined {
                    Ok((id, result)) => (id, result),
                    Err(e) => (e.id(), Err(ArchiveError::Join(e))),
                };
                let Some(&idx) = task_seeds.get(&id) else {
                    continue;
                };
                if let Some(ref callback) = progress_callback {
                    let url = planned[idx].0.as_str();
                    match &result {
                        Ok(_) => callback(format!("[+] Archived {}", url)),
                        Err(e) => callback(format!("[!]  Failed to archive {}: {}", url, e)),
                    }
                }
                results[idx] = Some(result);
            }
            Ok(None) => break,
            Err(_) => {
                warn!(budget_ms = budget.as_millis() as u64, "Archive deadline reached, cancelling remaining seeds");
                tasks.abort_all();
                while let Some(joined) = tasks.join_next_with_id().await {
                    if let Ok((id, result)) = joined {
                        if let Some(&idx) = task_seeds.get(&id) {
                            results[idx] = Some(result);
                        }
                    }
                }
                break;
            }
        }
    }

    let mut outcomes = Vec::with_capacity(planned.len());
    for ((seed, dir), result) in planned.into_iter().zip(results) {
        let result = result.unwrap_or(Err(ArchiveError::Deadline(budget)));
        match &result {
            Ok(archived) => info!(
                url = %seed,
                output = %dir.display(),
                files = archived.files_saved(),
                "Successfully downloaded"
            ),
            Err(e) => {
                error!(url = %seed, error = %e, "Failed to download");
                if let Err(remove_err) = tokio::fs::remove_dir_all(&dir).await {
                    warn!(dir = %dir.display(), error = %remove_err, "Failed to remove directory after error");
                }
            }
        }
        outcomes.push(SeedOutcome {
            url: seed.to_string(),
            output_dir: dir,
            result,
        });
    }

    if let Some(ref pb) = progress_bar {
        let total = saved_count.load(Ordering::Relaxed);
        pb.finish_with_message(format!("Archive complete! {} files saved", total));
    }

    let summary = summarize(&outcomes);
    info!(
        total = summary.total,
        successful = summary.succeeded,
        failed = summary.failed,
        "Download summary"
    );
    Ok(outcomes)
}

/// Directory-safe form of the seed's host.
fn host_component(seed: &Url) -> String {
    seed.host_str()
        .unwrap_or("unknown")
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Create `<output_dir>/<host>_<stamp>`, adding `_2`, `_3`, ... when that
/// name is already taken.
pub async fn create_seed_dir(output_dir: &Path, seed: &Url, stamp: &str, mode: u32) -> Result<PathBuf> {
    let base = format!("{}_{}", host_component(seed), stamp);
    let mut attempt = 1u32;
    loop {
        let name = if attempt == 1 {
            base.clone()
        } else {
            format!("{}_{}", base, attempt)
        };
        let candidate = output_dir.join(name);
        match create_dir(&candidate, false, Some(mode)).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Generate a human-readable report of an archive run
pub fn generate_archive_report(outcomes: &[SeedOutcome]) -> String {
    let summary = summarize(outcomes);

    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Seeds: {}\n", summary.total));
    report.push_str(&format!(
        "  Successful: {}\n",
        summary.succeeded.to_string().green()
    ));
    report.push_str(&format!("  Failed: {}\n", summary.failed.to_string().red()));
    report.push_str(&format!("  Files saved: {}\n", summary.files_saved));
    report.push_str(&format!("  Data saved: {}\n", format_bytes(summary.bytes_saved)));
    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    for outcome in outcomes {
        report.push_str(&format!("## {}\n", outcome.url.bold()));
        match &outcome.result {
            Ok(archived) => {
                report.push_str(&format!(
                    "  {} {}\n",
                    "[+]".green(),
                    outcome.output_dir.display()
                ));
                for root in &archived.roots {
                    report.push_str(&format!(
                        "  {} {}\n",
                        root.label.cyan(),
                        root.href().bright_black()
                    ));
                }
                let failed: usize = archived.reports.iter().map(|r| r.failed.len()).sum();
                report.push_str(&format!(
                    "  {} files, {} failed\n",
                    archived.files_saved(),
                    failed
                ));
            }
            Err(e) => {
                report.push_str(&format!("  {} {}\n", "[!]".red(), e));
            }
        }
        report.push('\n');
    }

    report
}
