use crate::error::{MirrorError, Result};
use crate::paths::{ResourceKind, local_path, relative_link};
use lol_html::html_content::Element;
use lol_html::{HtmlRewriter, Settings, element};
use std::cell::{Cell, RefCell};
use tracing::debug;
use url::Url;

type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// The page being rewritten.
pub struct PageContext<'a> {
    /// URL the document was fetched from; relative links resolve against it.
    pub url: &'a Url,
    /// Where the document itself is stored, relative to the output root.
    pub local_path: &'a str,
    /// Hostname whose pages are followed.
    pub anchor: &'a str,
}

/// A link found in a page that survived filtering and was rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    /// Absolute URL without fragment.
    pub url: Url,
    pub kind: ResourceKind,
    pub local_path: String,
}

#[derive(Debug)]
pub struct RewrittenPage {
    pub html: Vec<u8>,
    pub candidates: Vec<LinkCandidate>,
}

impl RewrittenPage {
    pub fn links_rewritten(&self) -> usize {
        self.candidates.len()
    }
}

/// Resolve a raw attribute value against the page URL.
///
/// Empty values, same-page fragments and anything that does not resolve to
/// an `http`/`https` URL (mailto:, tel:, javascript:, data:) yield `None`.
pub fn resolve_candidate(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let resolved = base.join(raw).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}

/// Rewrite every link attribute of `html` to its mirrored location.
///
/// Candidates are `href` on any element, `src` on any element and `poster`
/// on `<video>`. `<base>` elements are dropped since they would re-anchor
/// the rewritten relative links to the live site.
pub fn rewrite_page(html: &[u8], page: &PageContext<'_>) -> Result<RewrittenPage> {
    let candidates = RefCell::new(Vec::new());
    let skipped = Cell::new(0usize);
    let mut output = Vec::with_capacity(html.len());

    {
        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    element!("base", |el| {
                        el.remove();
                        Ok(())
                    }),
                    element!("*[href]", |el| {
                        if el.tag_name() == "base" {
                            return Ok(());
                        }
                        rewrite_attribute(el, "href", page, &candidates, &skipped)
                    }),
                    element!("*[src]", |el| {
                        rewrite_attribute(el, "src", page, &candidates, &skipped)
                    }),
                    element!("video[poster]", |el| {
                        rewrite_attribute(el, "poster", page, &candidates, &skipped)
                    }),
                ],
                ..Settings::default()
            },
            |chunk: &[u8]| output.extend_from_slice(chunk),
        );

        rewriter.write(html).map_err(|e| MirrorError::Parse {
            url: page.url.to_string(),
            message: e.to_string(),
        })?;
        rewriter.end().map_err(|e| MirrorError::Parse {
            url: page.url.to_string(),
            message: e.to_string(),
        })?;
    }

    if skipped.get() > 0 {
        debug!(url = %page.url, skipped = skipped.get(), "Links left untouched");
    }

    Ok(RewrittenPage {
        html: output,
        candidates: candidates.into_inner(),
    })
}

fn rewrite_attribute(
    el: &mut Element<'_, '_>,
    attribute: &str,
    page: &PageContext<'_>,
    candidates: &RefCell<Vec<LinkCandidate>>,
    skipped: &Cell<usize>,
) -> HandlerResult {
    let Some(raw) = el.get_attribute(attribute) else {
        return Ok(());
    };
    let Some(mut resolved) = resolve_candidate(page.url, &raw) else {
        return Ok(());
    };

    let fragment = resolved.fragment().map(str::to_string);
    resolved.set_fragment(None);

    let kind = ResourceKind::infer(&resolved);
    let Some(target) = local_path(&resolved, page.anchor, kind) else {
        debug!(url = %resolved, "Link has no safe local path, dropping");
        skipped.set(skipped.get() + 1);
        return Ok(());
    };

    let mut value = relative_link(page.local_path, &target);
    if let Some(fragment) = fragment {
        value.push('#');
        value.push_str(&fragment);
    }
    el.set_attribute(attribute, &value)?;

    candidates.borrow_mut().push(LinkCandidate {
        url: resolved,
        kind,
        local_path: target,
    });
    Ok(())
}
