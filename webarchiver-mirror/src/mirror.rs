use crate::error::{MirrorError, Result};
use crate::fs::{create_dir, write_file};
use crate::links::{LinkCandidate, PageContext, rewrite_page};
use crate::paths::{ResourceKind, local_path};
use crate::result::{FailedTarget, MirrorReport, SavedResource};
use reqwest::Client;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument, debug, info, info_span, warn};
use url::Url;

pub const DEFAULT_MAX_DEPTH: u32 = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_WORKERS: usize = 8;

pub type ProgressCallback = Arc<dyn Fn(&SavedResource) + Send + Sync>;

/// One top-level mirror invocation. Validated on construction.
#[derive(Debug, Clone)]
pub struct MirrorRequest {
    pub seed: Url,
    pub depth: u32,
    pub output_root: PathBuf,
    /// Where the seed is stored, relative to `output_root`.
    pub local_path: String,
}

impl MirrorRequest {
    pub fn new(seed: &str, depth: u32, output_root: impl Into<PathBuf>, max_depth: u32) -> Result<Self> {
        let seed = Url::parse(seed).map_err(|e| MirrorError::InvalidUrl(format!("{}: {}", seed, e)))?;
        if seed.scheme() != "http" && seed.scheme() != "https" {
            return Err(MirrorError::InvalidUrl(format!(
                "{}: URL must use http or https scheme",
                seed
            )));
        }
        let Some(host) = seed.host_str().filter(|h| !h.is_empty()) else {
            return Err(MirrorError::InvalidUrl(format!("{}: URL has no host", seed)));
        };
        let seed_path = local_path(&seed, host, ResourceKind::infer(&seed)).ok_or_else(|| {
            MirrorError::InvalidUrl(format!("{}: path cannot be stored under the output directory", seed))
        })?;
        if depth > max_depth {
            return Err(MirrorError::DepthOutOfRange {
                depth,
                max: max_depth,
            });
        }
        Ok(Self {
            seed,
            depth,
            output_root: output_root.into(),
            local_path: seed_path,
        })
    }

    /// Hostname of the seed; links elsewhere are saved but not followed.
    pub fn anchor(&self) -> &str {
        self.seed.host_str().unwrap_or_default()
    }
}

/// A URL queued for exactly one fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchTarget {
    pub url: Url,
    pub remaining_depth: u32,
    pub anchor: Arc<str>,
    pub output_root: Arc<Path>,
    /// Mapped location relative to `output_root`.
    pub local_path: String,
    /// The seed takes the host it redirects to as the anchor.
    pub is_seed: bool,
}

impl FetchTarget {
    pub fn is_on_anchor(&self) -> bool {
        self.url
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(&self.anchor))
    }

    pub fn destination(&self) -> PathBuf {
        self.output_root.join(&self.local_path)
    }
}

#[derive(Clone)]
pub struct MirrorOptions {
    pub timeout: Duration,
    pub max_depth: u32,
    pub workers: usize,
    pub user_agent: String,
    /// Unix permission bits for created directories.
    pub dir_mode: Option<u32>,
    /// Unix permission bits for created files.
    pub file_mode: Option<u32>,
    /// Subscriber for everything the operation logs. Falls back to the
    /// caller's current default when unset.
    pub dispatch: Option<Dispatch>,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_depth: DEFAULT_MAX_DEPTH,
            workers: DEFAULT_WORKERS,
            user_agent: concat!("webarchiver/", env!("CARGO_PKG_VERSION")).to_string(),
            dir_mode: None,
            file_mode: None,
            dispatch: None,
        }
    }
}

impl MirrorOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_permissions(mut self, dir_mode: u32, file_mode: u32) -> Self {
        self.dir_mode = Some(dir_mode);
        self.file_mode = Some(file_mode);
        self
    }

    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }
}

/// Shared, read-only state handed to every fetch step.
struct StepContext {
    client: Client,
    dir_mode: Option<u32>,
    file_mode: Option<u32>,
}

/// What one fetch step hands back to the coordinator.
struct StepOutcome {
    saved: SavedResource,
    /// Links of an anchor-domain HTML page, at any remaining depth.
    links: Vec<LinkCandidate>,
    /// Anchor the page was rewritten against.
    anchor: Arc<str>,
}

enum Claim {
    New,
    /// Already dispatched, but reached again with more depth left.
    Raised,
    Duplicate,
}

struct Visit {
    /// Largest remaining depth any path has reached the URL with.
    depth: u32,
    /// Set once the page has been fetched.
    links: Option<Vec<LinkCandidate>>,
    /// Depth the links were last scheduled from.
    expanded_at: Option<u32>,
}

/// Per-operation dedup state. Owned by the coordinating task only.
#[derive(Default)]
struct VisitedSet {
    visits: HashMap<String, Visit>,
    paths: HashSet<String>,
}

impl VisitedSet {
    /// The first target to reach a URL or a local path gets the fetch. A URL
    /// reached again with a larger budget keeps that budget.
    fn claim(&mut self, url: &Url, local_path: &str, depth: u32) -> Claim {
        if let Some(visit) = self.visits.get_mut(url.as_str()) {
            if depth > visit.depth {
                visit.depth = depth;
                return Claim::Raised;
            }
            return Claim::Duplicate;
        }
        if !self.paths.insert(local_path.to_string()) {
            return Claim::Duplicate;
        }
        self.visits.insert(
            url.to_string(),
            Visit {
                depth,
                links: None,
                expanded_at: None,
            },
        );
        Claim::New
    }

    fn depth(&self, url: &str) -> Option<u32> {
        self.visits.get(url).map(|visit| visit.depth)
    }

    fn record_links(&mut self, url: &str, links: Vec<LinkCandidate>) {
        if let Some(visit) = self.visits.get_mut(url) {
            visit.links = Some(links);
        }
    }

    /// Links of a fetched page not yet scheduled at its current budget, with
    /// the budget their targets get.
    fn unexpanded_links(&mut self, url: &str) -> Option<(u32, Vec<LinkCandidate>)> {
        let visit = self.visits.get_mut(url)?;
        let child_depth = visit.depth.checked_sub(1)?;
        if visit.expanded_at.is_some_and(|at| at >= visit.depth) {
            return None;
        }
        let links = visit.links.clone()?;
        visit.expanded_at = Some(visit.depth);
        Some((child_depth, links))
    }
}

/// Scheduling state of one mirror operation.
struct Frontier {
    visited: VisitedSet,
    pending: VecDeque<FetchTarget>,
    anchor: Arc<str>,
    output_root: Arc<Path>,
    duplicates: usize,
}

impl Frontier {
    fn new(seed: FetchTarget) -> Self {
        let mut visited = VisitedSet::default();
        visited.claim(&seed.url, &seed.local_path, seed.remaining_depth);
        Self {
            visited,
            anchor: seed.anchor.clone(),
            output_root: seed.output_root.clone(),
            pending: VecDeque::from([seed]),
            duplicates: 0,
        }
    }

    fn next_target(&mut self) -> Option<FetchTarget> {
        let mut target = self.pending.pop_front()?;
        // a shorter path may have turned up while it waited
        if let Some(depth) = self.visited.depth(target.url.as_str()) {
            target.remaining_depth = depth;
        }
        Some(target)
    }

    /// Store a fetched page's links and schedule them. Fetched pages whose
    /// budget goes up are expanded again from their stored links.
    ///
    /// Returns how many of the page's own links were scheduled or raised.
    fn finish(&mut self, url: &Url, links: Vec<LinkCandidate>) -> usize {
        self.visited.record_links(url.as_str(), links);

        let mut followed = 0;
        let mut direct = true;
        let mut raised = vec![url.to_string()];
        while let Some(page) = raised.pop() {
            if let Some((depth, links)) = self.visited.unexpanded_links(&page) {
                for link in links {
                    match self.visited.claim(&link.url, &link.local_path, depth) {
                        Claim::New => self.pending.push_back(FetchTarget {
                            url: link.url,
                            remaining_depth: depth,
                            anchor: self.anchor.clone(),
                            output_root: self.output_root.clone(),
                            local_path: link.local_path,
                            is_seed: false,
                        }),
                        Claim::Raised => raised.push(link.url.to_string()),
                        Claim::Duplicate => {
                            self.duplicates += 1;
                            continue;
                        }
                    }
                    if direct {
                        followed += 1;
                    }
                }
            }
            direct = false;
        }
        followed
    }
}

/// Pair a finished task with the target it was dispatched for. A task that
/// panicked becomes that target's error.
fn settle<T>(
    dispatched: &mut HashMap<Id, FetchTarget>,
    joined: std::result::Result<(Id, Result<T>), JoinError>,
) -> Option<(FetchTarget, Result<T>)> {
    match joined {
        Ok((id, outcome)) => dispatched.remove(&id).map(|target| (target, outcome)),
        Err(e) => dispatched
            .remove(&e.id())
            .map(|target| (target, Err(MirrorError::Join(e)))),
    }
}

pub struct Mirror {
    client: Client,
    options: MirrorOptions,
    progress_callback: Option<ProgressCallback>,
}

impl Mirror {
    pub fn new(options: MirrorOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(options.user_agent.as_str())
            .timeout(options.timeout)
            .connect_timeout(options.timeout / 2)
            .pool_max_idle_per_host(options.workers)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            options,
            progress_callback: None,
        })
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn options(&self) -> &MirrorOptions {
        &self.options
    }

    /// Mirror `seed` into `output_dir`, following links for `depth` hops.
    ///
    /// Returns once every fetch dispatched for this seed has finished.
    /// Dropping the returned future aborts all in-flight fetches; files
    /// already written stay on disk.
    pub async fn mirror(&self, seed: &str, depth: u32, output_dir: &Path) -> Result<MirrorReport> {
        let request = MirrorRequest::new(seed, depth, output_dir, self.options.max_depth)?;
        let dispatch = self
            .options
            .dispatch
            .clone()
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone));
        async move {
            let span = info_span!("mirror", seed = %request.seed);
            self.run(request).instrument(span).await
        }
        .with_subscriber(dispatch)
        .await
    }

    async fn run(&self, request: MirrorRequest) -> Result<MirrorReport> {
        info!(
            depth = request.depth,
            output = %request.output_root.display(),
            "Starting mirror"
        );
        let started = Instant::now();

        create_dir(&request.output_root, true, self.options.dir_mode).await?;

        let mut frontier = Frontier::new(FetchTarget {
            url: request.seed.clone(),
            remaining_depth: request.depth,
            anchor: Arc::from(request.anchor()),
            output_root: Arc::from(request.output_root.as_path()),
            local_path: request.local_path.clone(),
            is_seed: true,
        });

        let ctx = Arc::new(StepContext {
            client: self.client.clone(),
            dir_mode: self.options.dir_mode,
            file_mode: self.options.file_mode,
        });

        let mut report = MirrorReport::new(request.seed.to_string(), request.output_root.clone());
        let mut in_flight: JoinSet<Result<StepOutcome>> = JoinSet::new();
        let mut dispatched: HashMap<Id, FetchTarget> = HashMap::new();

        loop {
            while in_flight.len() < self.options.workers {
                let Some(target) = frontier.next_target() else {
                    break;
                };
                let ctx = ctx.clone();
                let step_target = target.clone();
                let handle = in_flight.spawn(
                    async move { fetch_step(&ctx, &step_target).await }
                        .in_current_span()
                        .with_current_subscriber(),
                );
                dispatched.insert(handle.id(), target);
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                break;
            };
            let Some((target, outcome)) = settle(&mut dispatched, joined) else {
                continue;
            };

            match outcome {
                Ok(mut step) => {
                    if target.is_seed {
                        frontier.anchor = step.anchor;
                    }
                    step.saved.links_followed = frontier.finish(&target.url, step.links);
                    if let Some(ref callback) = self.progress_callback {
                        callback(&step.saved);
                    }
                    report.saved.push(step.saved);
                }
                Err(e) if target.is_seed => {
                    warn!(url = %target.url, error = %e, "Seed failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(url = %target.url, error = %e, "Fetch failed");
                    report.failed.push(FailedTarget {
                        url: target.url.to_string(),
                        depth: target.remaining_depth,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.duplicates_skipped = frontier.duplicates;
        report.elapsed = started.elapsed();
        info!(
            saved = report.saved.len(),
            failed = report.failed.len(),
            duplicates = report.duplicates_skipped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Mirror complete"
        );
        Ok(report)
    }
}

/// Fetch one target, rewrite it if it is an anchor-domain HTML page, and
/// persist it. Returns the links found on the page.
async fn fetch_step(ctx: &StepContext, target: &FetchTarget) -> Result<StepOutcome> {
    debug!(url = %target.url, depth = target.remaining_depth, "Fetching");

    let start = Instant::now();
    let response = ctx.client.get(target.url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(MirrorError::Status {
            url: target.url.to_string(),
            status: status.as_u16(),
        });
    }

    let final_url = response.url().clone();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let body = response.bytes().await?;
    let response_time = start.elapsed();

    let anchor: Arc<str> = match final_url.host_str() {
        Some(host) if target.is_seed && !host.eq_ignore_ascii_case(&target.anchor) => {
            info!(from = %target.anchor, to = host, "Seed redirected to another host, mirroring that host");
            Arc::from(host)
        }
        _ => target.anchor.clone(),
    };

    let kind = ResourceKind::from_content_type(content_type.as_deref());
    let follow = kind == ResourceKind::Html && target.is_on_anchor();

    let (bytes, links) = if follow {
        let page = PageContext {
            url: &final_url,
            local_path: &target.local_path,
            anchor: &anchor,
        };
        let rewritten = rewrite_page(&body, &page)?;
        (rewritten.html, rewritten.candidates)
    } else {
        (body.to_vec(), Vec::new())
    };

    let destination = target.destination();
    let bytes_written = write_file(&destination, &bytes, ctx.dir_mode, ctx.file_mode).await?;
    debug!(url = %target.url, path = %destination.display(), bytes = bytes_written, "Saved");

    Ok(StepOutcome {
        saved: SavedResource {
            url: target.url.to_string(),
            local_path: target.local_path.clone(),
            kind,
            status_code: status.as_u16(),
            content_type,
            bytes_written,
            response_time,
            links_rewritten: links.len(),
            links_followed: 0,
            depth: target.remaining_depth,
        },
        links,
        anchor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/html; charset=utf-8")
            .set_body_bytes(body.as_bytes())
    }

    fn bytes(content_type: &str, body: &[u8]) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", content_type)
            .set_body_bytes(body)
    }

    async fn mount(server: &MockServer, at: &str, response: ResponseTemplate, expected: u64) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(response)
            .expect(expected)
            .mount(server)
            .await;
    }

    fn mirror() -> Mirror {
        Mirror::new(MirrorOptions::default().with_timeout(Duration::from_secs(5))).unwrap()
    }

    fn attr_values(file: &Path, selector: &str, attr: &str) -> Vec<String> {
        let content = std::fs::read_to_string(file).unwrap();
        let doc = Html::parse_document(&content);
        let sel = Selector::parse(selector).unwrap();
        doc.select(&sel)
            .filter_map(|e| e.value().attr(attr).map(str::to_string))
            .collect()
    }

    /// Seed with an internal page, an external page and an image.
    #[tokio::test]
    async fn test_mirror_site_with_external_link() {
        let site = MockServer::start().await;
        let other = MockServer::start().await;
        // Same IP, different hostname: the second server counts as a foreign domain.
        let other_base = other.uri().replace("127.0.0.1", "localhost");

        mount(
            &site,
            "/",
            html(&format!(
                r#"<html><body>
                    <a href="/about">About</a>
                    <a href="{}/x">Other</a>
                    <img src="logo.png">
                </body></html>"#,
                other_base
            )),
            1,
        )
        .await;
        mount(
            &site,
            "/about",
            html(r#"<html><body><a href="/deeper">Deeper</a><img src="/logo.png"></body></html>"#),
            1,
        )
        .await;
        mount(&site, "/deeper", html("<html></html>"), 0).await;
        mount(&site, "/logo.png", bytes("image/png", b"\x89PNG"), 1).await;
        mount(
            &other,
            "/x",
            html(r#"<html><body><a href="/y">Y</a></body></html>"#),
            1,
        )
        .await;
        mount(&other, "/y", html("<html></html>"), 0).await;

        let dir = TempDir::new().unwrap();
        let report = mirror()
            .mirror(&format!("{}/", site.uri()), 1, dir.path())
            .await
            .unwrap();

        assert_eq!(report.saved.len(), 4, "{:?}", report.saved);
        assert!(report.failed.is_empty());

        let root = dir.path();
        assert!(root.join("index.html").is_file());
        assert!(root.join("about/index.html").is_file());
        assert_eq!(std::fs::read(root.join("logo.png")).unwrap(), b"\x89PNG");
        let external = root.join("localhost/x/index.html");
        assert!(external.is_file());

        // foreign page is stored verbatim
        assert_eq!(attr_values(&external, "a", "href"), vec!["/y"]);

        let index = root.join("index.html");
        assert_eq!(
            attr_values(&index, "a", "href"),
            vec!["about/index.html", "localhost/x/index.html"]
        );
        assert_eq!(attr_values(&index, "img", "src"), vec!["logo.png"]);

        // depth 0 page still has its links rewritten
        let about = root.join("about/index.html");
        assert_eq!(attr_values(&about, "a", "href"), vec!["../deeper/index.html"]);
        assert_eq!(attr_values(&about, "img", "src"), vec!["../logo.png"]);
    }

    #[tokio::test]
    async fn test_depth_zero_fetches_only_seed() {
        let site = MockServer::start().await;
        mount(
            &site,
            "/",
            html(r#"<a href="/a">A</a><img src="/b.png">"#),
            1,
        )
        .await;
        mount(&site, "/a", html("<p>a</p>"), 0).await;
        mount(&site, "/b.png", bytes("image/png", b"b"), 0).await;

        let dir = TempDir::new().unwrap();
        let report = mirror().mirror(&site.uri(), 0, dir.path()).await.unwrap();

        assert_eq!(report.fetch_count(), 1);
        assert_eq!(site.received_requests().await.unwrap().len(), 1);
        assert_eq!(
            attr_values(&dir.path().join("index.html"), "a", "href"),
            vec!["a/index.html"]
        );
    }

    #[tokio::test]
    async fn test_depth_budget_bounds_hops() {
        let site = MockServer::start().await;
        mount(&site, "/", html(r#"<a href="/1">1</a>"#), 1).await;
        mount(&site, "/1", html(r#"<a href="/2">2</a>"#), 1).await;
        mount(&site, "/2", html(r#"<a href="/3">3</a>"#), 1).await;
        mount(&site, "/3", html("end"), 0).await;

        let dir = TempDir::new().unwrap();
        let report = mirror().mirror(&site.uri(), 2, dir.path()).await.unwrap();

        assert_eq!(report.saved.len(), 3);
        assert!(dir.path().join("2/index.html").is_file());
        assert!(!dir.path().join("3").exists());
    }

    #[tokio::test]
    async fn test_cycles_fetch_each_page_once() {
        let site = MockServer::start().await;
        mount(&site, "/", html(r#"<a href="/a">A</a><a href="/">self</a>"#), 1).await;
        mount(&site, "/a", html(r#"<a href="/b">B</a><a href="/">home</a>"#), 1).await;
        mount(&site, "/b", html(r#"<a href="/a">A</a><a href="/">home</a>"#), 1).await;

        let dir = TempDir::new().unwrap();
        let report = mirror().mirror(&site.uri(), 5, dir.path()).await.unwrap();

        assert_eq!(report.saved.len(), 3);
        assert!(report.duplicates_skipped >= 3);
    }

    #[tokio::test]
    async fn test_same_local_path_first_dispatch_wins() {
        let site = MockServer::start().await;
        mount(
            &site,
            "/",
            html(r#"<link href="/a.css?v=1"><link href="/a.css?v=2">"#),
            1,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/a.css"))
            .and(query_param("v", "1"))
            .respond_with(bytes("text/css", b"one"))
            .expect(1)
            .mount(&site)
            .await;
        Mock::given(method("GET"))
            .and(path("/a.css"))
            .and(query_param("v", "2"))
            .respond_with(bytes("text/css", b"two"))
            .expect(0)
            .mount(&site)
            .await;

        let dir = TempDir::new().unwrap();
        let report = mirror().mirror(&site.uri(), 1, dir.path()).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("a.css")).unwrap(), b"one");
        assert_eq!(report.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn test_child_failure_does_not_fail_page() {
        let site = MockServer::start().await;
        mount(
            &site,
            "/",
            html(r#"<a href="/missing">M</a><a href="/ok.txt">OK</a>"#),
            1,
        )
        .await;
        mount(&site, "/missing", ResponseTemplate::new(404), 1).await;
        mount(&site, "/ok.txt", bytes("text/plain", b"ok"), 1).await;

        let dir = TempDir::new().unwrap();
        let report = mirror().mirror(&site.uri(), 1, dir.path()).await.unwrap();

        assert_eq!(report.saved.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].url.ends_with("/missing"));
        assert!(report.failed[0].error.contains("404"));
    }

    #[tokio::test]
    async fn test_seed_failure_is_returned() {
        let site = MockServer::start().await;
        mount(&site, "/", ResponseTemplate::new(500), 1).await;

        let dir = TempDir::new().unwrap();
        let err = mirror().mirror(&site.uri(), 1, dir.path()).await.unwrap_err();
        assert!(matches!(err, MirrorError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_validation_happens_before_io() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("never-created");
        let m = mirror();

        let err = m.mirror("not a url", 1, &out).await.unwrap_err();
        assert!(matches!(err, MirrorError::InvalidUrl(_)));
        let err = m.mirror("ftp://example.com/", 1, &out).await.unwrap_err();
        assert!(matches!(err, MirrorError::InvalidUrl(_)));
        let err = m.mirror("https://example.com/", 6, &out).await.unwrap_err();
        assert!(matches!(err, MirrorError::DepthOutOfRange { depth: 6, max: 5 }));
        assert!(err.is_validation());
        let err = m.mirror("https://example.com/..%2F..%2Fetc", 1, &out).await.unwrap_err();
        assert!(matches!(err, MirrorError::InvalidUrl(_)));
        assert!(err.is_validation());

        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_non_html_is_saved_verbatim() {
        let site = MockServer::start().await;
        let body = br#"<a href="/x">not parsed</a>"#;
        mount(&site, "/data.txt", bytes("text/plain", body), 1).await;

        let dir = TempDir::new().unwrap();
        let report = mirror()
            .mirror(&format!("{}/data.txt", site.uri()), 3, dir.path())
            .await
            .unwrap();

        assert_eq!(report.saved[0].kind, ResourceKind::Other);
        assert_eq!(std::fs::read(dir.path().join("data.txt")).unwrap(), body);
    }

    #[tokio::test]
    async fn test_progress_callback_sees_every_saved_file() {
        let site = MockServer::start().await;
        mount(&site, "/", html(r#"<img src="/a.png"><img src="/b.png">"#), 1).await;
        mount(&site, "/a.png", bytes("image/png", b"a"), 1).await;
        mount(&site, "/b.png", bytes("image/png", b"b"), 1).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let m = mirror().with_progress_callback(Arc::new(move |saved: &SavedResource| {
            seen_clone.lock().unwrap().push(saved.local_path.clone());
        }));

        let dir = TempDir::new().unwrap();
        m.mirror(&site.uri(), 1, dir.path()).await.unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a.png", "b.png", "index.html"]);
    }

    /// `/target` is first reached through the long branch with no depth left.
    /// The slow branch reaches it later with one hop to spare.
    #[tokio::test]
    async fn test_shorter_path_found_later_raises_depth() {
        let site = MockServer::start().await;
        mount(&site, "/", html(r#"<a href="/slow">S</a><a href="/fast">F</a>"#), 1).await;
        mount(
            &site,
            "/slow",
            html(r#"<a href="/target">T</a>"#).set_delay(Duration::from_millis(800)),
            1,
        )
        .await;
        mount(&site, "/fast", html(r#"<a href="/mid">M</a>"#), 1).await;
        mount(&site, "/mid", html(r#"<a href="/target">T</a>"#), 1).await;
        mount(&site, "/target", html(r#"<a href="/leaf">L</a>"#), 1).await;
        mount(&site, "/leaf", html("leaf"), 1).await;

        let dir = TempDir::new().unwrap();
        let report = mirror().mirror(&site.uri(), 3, dir.path()).await.unwrap();

        assert!(report.failed.is_empty());
        assert_eq!(report.saved.len(), 6, "{:?}", report.saved);
        assert!(dir.path().join("leaf/index.html").is_file());
    }

    fn target(url: &str, local_path: &str, depth: u32, is_seed: bool) -> FetchTarget {
        FetchTarget {
            url: Url::parse(url).unwrap(),
            remaining_depth: depth,
            anchor: Arc::from("h"),
            output_root: Arc::from(Path::new("/out")),
            local_path: local_path.to_string(),
            is_seed,
        }
    }

    fn link(url: &str, local_path: &str) -> LinkCandidate {
        LinkCandidate {
            url: Url::parse(url).unwrap(),
            kind: ResourceKind::Html,
            local_path: local_path.to_string(),
        }
    }

    #[test]
    fn test_frontier_expands_fetched_page_again_when_budget_grows() {
        let mut frontier = Frontier::new(target("http://h/", "index.html", 3, true));
        let seed = frontier.next_target().unwrap();
        frontier.finish(
            &seed.url,
            vec![link("http://h/a", "a/index.html"), link("http://h/b", "b/index.html")],
        );
        let a = frontier.next_target().unwrap();
        let b = frontier.next_target().unwrap();

        frontier.finish(&a.url, vec![link("http://h/m", "m/index.html")]);
        let m = frontier.next_target().unwrap();
        frontier.finish(&m.url, vec![link("http://h/t", "t/index.html")]);
        let t = frontier.next_target().unwrap();
        assert_eq!(t.remaining_depth, 0);
        assert_eq!(frontier.finish(&t.url, vec![link("http://h/leaf", "leaf/index.html")]), 0);
        assert!(frontier.next_target().is_none());

        // b reaches t with one hop left, so t's stored links get scheduled
        assert_eq!(frontier.finish(&b.url, vec![link("http://h/t", "t/index.html")]), 1);
        let leaf = frontier.next_target().unwrap();
        assert_eq!(leaf.url.path(), "/leaf");
        assert_eq!(leaf.remaining_depth, 0);
        assert!(frontier.next_target().is_none());
        assert_eq!(frontier.duplicates, 0);
    }

    #[test]
    fn test_pending_target_takes_raised_budget() {
        let mut frontier = Frontier::new(target("http://h/", "index.html", 3, true));
        let seed = frontier.next_target().unwrap();
        frontier.finish(&seed.url, vec![link("http://h/a", "a/index.html")]);
        let a = frontier.next_target().unwrap();
        frontier.finish(&a.url, vec![link("http://h/x", "x/index.html")]);

        // x waits at depth 1 until the seed's own link to it shows up
        assert!(matches!(
            frontier.visited.claim(&Url::parse("http://h/x").unwrap(), "x/index.html", 2),
            Claim::Raised
        ));
        assert_eq!(frontier.next_target().unwrap().remaining_depth, 2);
    }

    #[tokio::test]
    async fn test_panicked_step_is_reported_for_its_target() {
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut dispatched = HashMap::new();
        let handle = tasks.spawn(async {
            if true {
                panic!("step panicked");
            }
            Ok(())
        });
        dispatched.insert(handle.id(), target("http://h/boom", "boom/index.html", 1, false));

        let joined = tasks.join_next_with_id().await.unwrap();
        let (failed, outcome) = settle(&mut dispatched, joined).unwrap();
        assert_eq!(failed.url.path(), "/boom");
        assert!(matches!(outcome, Err(MirrorError::Join(_))));
        assert!(dispatched.is_empty());
    }

    /// The seed redirects to another host and into a subdirectory. Links
    /// resolve against the redirect target, and that host is mirrored.
    #[tokio::test]
    async fn test_seed_redirect_to_other_host_is_followed() {
        let site = MockServer::start().await;
        let seed = site.uri().replace("127.0.0.1", "localhost");
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", format!("{}/docs/", site.uri())),
            )
            .expect(1)
            .mount(&site)
            .await;
        mount(&site, "/docs/", html(r#"<a href="intro">Intro</a>"#), 1).await;
        mount(&site, "/docs/intro", html(r#"<a href="/about">About</a>"#), 1).await;
        mount(&site, "/about", html("about"), 1).await;

        let dir = TempDir::new().unwrap();
        let report = mirror()
            .mirror(&format!("{}/", seed), 2, dir.path())
            .await
            .unwrap();

        assert!(report.failed.is_empty());
        assert_eq!(report.saved.len(), 3, "{:?}", report.saved);
        let root = dir.path();
        assert_eq!(
            attr_values(&root.join("index.html"), "a", "href"),
            vec!["docs/intro/index.html"]
        );
        assert_eq!(
            attr_values(&root.join("docs/intro/index.html"), "a", "href"),
            vec!["../../about/index.html"]
        );
        assert!(root.join("about/index.html").is_file());
        assert!(!root.join("127.0.0.1").exists());
    }

    #[tokio::test]
    async fn test_file_and_directory_clash_keeps_first_write() {
        let site = MockServer::start().await;
        mount(
            &site,
            "/",
            html(r#"<script src="/a.js"></script><a href="/a.js/b">B</a>"#),
            1,
        )
        .await;
        mount(&site, "/a.js", bytes("application/javascript", b"js"), 1).await;
        mount(&site, "/a.js/b", html("b"), 1).await;

        let options = MirrorOptions::default()
            .with_timeout(Duration::from_secs(5))
            .with_workers(1);
        let dir = TempDir::new().unwrap();
        let report = Mirror::new(options)
            .unwrap()
            .mirror(&site.uri(), 1, dir.path())
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("a.js")).unwrap(), b"js");
        assert_eq!(report.saved.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].url.ends_with("/a.js/b"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_logs_go_to_the_configured_dispatch() {
        let site = MockServer::start().await;
        mount(&site, "/", html(r#"<a href="/gone">x</a>"#), 1).await;
        mount(&site, "/gone", ResponseTemplate::new(410), 1).await;

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let options = MirrorOptions::default()
            .with_timeout(Duration::from_secs(5))
            .with_dispatch(Dispatch::new(subscriber));
        let dir = TempDir::new().unwrap();
        Mirror::new(options)
            .unwrap()
            .mirror(&site.uri(), 1, dir.path())
            .await
            .unwrap();

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Starting mirror"), "{}", logs);
        assert!(logs.contains("Fetch failed"), "{}", logs);
        assert!(logs.contains("Mirror complete"), "{}", logs);
    }
}
