// Tasks that run once a seed has been mirrored

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

pub const SELECTION_PAGE: &str = "index.html";
pub const MANIFEST_FILE: &str = "manifest.json";

/// One complete mirror inside a seed's output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirroredRoot {
    /// Directory of the mirror relative to the seed directory; empty when the
    /// mirror was written straight into it.
    pub path: String,
    /// `Current` for the live site, otherwise the capture timestamp.
    pub label: String,
    /// Local path of the mirrored start page, relative to `path`.
    pub entry: String,
    /// URL the mirror was started from.
    pub source: String,
}

impl MirroredRoot {
    /// Link to the start page from the seed directory.
    pub fn href(&self) -> String {
        if self.path.is_empty() {
            self.entry.clone()
        } else {
            format!("{}/{}", self.path, self.entry)
        }
    }
}

pub struct HookContext<'a> {
    pub url: &'a str,
    pub output_dir: &'a Path,
    pub roots: &'a [MirroredRoot],
    pub file_mode: Option<u32>,
}

pub trait PostMirrorHook: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &HookContext<'_>) -> Result<()>;
}

/// Writes an `index.html` linking every mirrored root when there is more
/// than one of them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectionPageHook;

impl PostMirrorHook for SelectionPageHook {
    fn name(&self) -> &'static str {
        "selection-page"
    }

    fn run(&self, ctx: &HookContext<'_>) -> Result<()> {
        if ctx.roots.len() < 2 {
            debug!(url = %ctx.url, roots = ctx.roots.len(), "Skipping selection page");
            return Ok(());
        }
        let page = render_selection_page(ctx.url, ctx.roots);
        let path = ctx.output_dir.join(SELECTION_PAGE);
        write_file(&path, page.as_bytes(), ctx.file_mode).map_err(|e| ArchiveError::Hook {
            hook: self.name(),
            message: e.to_string(),
        })?;
        info!(path = %path.display(), roots = ctx.roots.len(), "Wrote snapshot selection page");
        Ok(())
    }
}

pub fn render_selection_page(url: &str, roots: &[MirroredRoot]) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("    <meta charset=\"UTF-8\">\n");
    html.push_str(
        "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    html.push_str(&format!(
        "    <title>Available Snapshots - {}</title>\n",
        escape_html(url)
    ));
    html.push_str(
        r#"    <style>
        body { font-family: Arial, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; line-height: 1.6; }
        .snapshot { border: 1px solid #ddd; margin: 10px 0; padding: 15px; border-radius: 5px; }
        .snapshot:hover { background-color: #f5f5f5; }
        .timestamp { color: #666; font-size: 0.9em; }
        a { color: #0066cc; text-decoration: none; }
        h1 { color: #333; border-bottom: 2px solid #eee; padding-bottom: 10px; }
    </style>
"#,
    );
    html.push_str("</head>\n<body>\n    <h1>Available Snapshots</h1>\n");
    html.push_str("    <div class=\"snapshots\">\n");
    for root in roots {
        html.push_str(&format!(
            "        <div class=\"snapshot\">\n            <a href=\"{}\">\n                <strong>Snapshot from {}</strong>\n                <div class=\"timestamp\">{}</div>\n            </a>\n        </div>\n",
            escape_html(&root.href()),
            escape_html(&root.label),
            escape_html(&root.source),
        ));
    }
    html.push_str("    </div>\n</body>\n</html>\n");
    html
}

/// Writes `manifest.json` describing the seed and its roots.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestHook;

#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub url: String,
    pub created: String,
    pub roots: Vec<MirroredRoot>,
}

impl PostMirrorHook for ManifestHook {
    fn name(&self) -> &'static str {
        "manifest"
    }

    fn run(&self, ctx: &HookContext<'_>) -> Result<()> {
        let manifest = Manifest {
            url: ctx.url.to_string(),
            created: chrono::Utc::now().to_rfc3339(),
            roots: ctx.roots.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&manifest)?;
        let path = ctx.output_dir.join(MANIFEST_FILE);
        write_file(&path, &json, ctx.file_mode).map_err(|e| ArchiveError::Hook {
            hook: self.name(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), "Wrote manifest");
        Ok(())
    }
}

fn write_file(path: &Path, bytes: &[u8], mode: Option<u32>) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if let Some(mode) = mode {
            options.mode(mode);
        }
    }
    #[cfg(not(unix))]
    let _ = mode;
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.flush()
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
