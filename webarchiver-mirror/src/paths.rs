use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use url::Url;

/// Default file name for directory-like HTML URLs.
pub const INDEX_HTML: &str = "index.html";
/// Default file name for directory-like URLs of any other type.
pub const INDEX_OTHER: &str = "index";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Html,
    Other,
}

impl ResourceKind {
    /// Classification of a fetched response.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.to_ascii_lowercase().contains("text/html") => ResourceKind::Html,
            _ => ResourceKind::Other,
        }
    }

    /// Classification guessed from the URL alone.
    ///
    /// Extensionless and directory-like paths count as HTML, as do `.html`
    /// and `.htm` files. Everything else is `Other`.
    pub fn infer(url: &Url) -> Self {
        let path = url.path();
        if path.is_empty() || path.ends_with('/') {
            return ResourceKind::Html;
        }
        match extension(last_segment(path)) {
            None => ResourceKind::Html,
            Some(ext) if ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm") => {
                ResourceKind::Html
            }
            Some(_) => ResourceKind::Other,
        }
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

fn extension(segment: &str) -> Option<&str> {
    match segment.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 == segment.len() => None,
        Some(idx) => Some(&segment[idx + 1..]),
    }
}

/// Map a resolved URL to a `/`-separated path relative to the output root.
///
/// Returns `None` when the URL has no host or when its path cannot be placed
/// under the root (it climbs above it, or contains a segment that is not a
/// plain file name). URLs whose host is not `anchor` are placed under a
/// directory named after their host. Query strings are ignored.
///
/// `/a.js` and `/a.js/b` map to `a.js` and `a.js/b/index.html`, which cannot
/// both exist on disk. Whichever is written first is kept; the other fetch
/// fails with an I/O error and is reported as a failed target.
pub fn local_path(url: &Url, anchor: &str, kind: ResourceKind) -> Option<String> {
    let host = url.host_str()?;

    let mut path = percent_decode_str(url.path())
        .decode_utf8_lossy()
        .into_owned();
    if path.is_empty() || path.ends_with('/') {
        path.push_str(match kind {
            ResourceKind::Html => INDEX_HTML,
            ResourceKind::Other => INDEX_OTHER,
        });
    } else if kind == ResourceKind::Html && extension(last_segment(&path)).is_none() {
        path.push('/');
        path.push_str(INDEX_HTML);
    }

    let mut segments = Vec::new();
    if !host.eq_ignore_ascii_case(anchor) {
        segments.push(host.to_ascii_lowercase());
    }
    segments.extend(clean_segments(&path)?);

    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// Lexically clean a URL path into safe segments.
fn clean_segments(path: &str) -> Option<Vec<String>> {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                // climbing above the root
                out.pop()?;
            }
            s if !is_plain_segment(s) => return None,
            s => out.push(s),
        }
    }
    Some(out.into_iter().map(str::to_string).collect())
}

fn is_plain_segment(segment: &str) -> bool {
    if segment.contains(['\0', '\\']) {
        return false;
    }
    // Reject anything the platform would read as more than one normal component
    // (drive prefixes like `C:` on Windows).
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !looks_like_drive(segment)
}

fn looks_like_drive(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Link text that reaches `target` from a page stored at `from_page`.
///
/// Both arguments are paths relative to the output root as produced by
/// [`local_path`].
pub fn relative_link(from_page: &str, target: &str) -> String {
    let from_dir = Path::new(from_page).parent().unwrap_or_else(|| Path::new(""));
    let relative = match pathdiff::diff_paths(Path::new(target), from_dir) {
        Some(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
        None => target.to_string(),
    };
    if relative.is_empty() {
        ".".to_string()
    } else {
        relative
    }
}
