//! Element callbacks for HTML responses (§4.6, §9 "Dynamic dispatch on
//! element kind"). A fixed tagged set {href, form, upload, script} keeps the
//! handler table closed and exhaustively testable, in place of the
//! teacher's live-DOM `page.evaluate()` extraction
//! (`src/page_extractor/extractors.rs::extract_links`).

use scraper::{Html, Selector};

use crate::imurl::ImUrl;

/// One discovery from scanning a page's elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementFinding {
    /// `a[href]` or `link[href]`: a candidate page to enqueue.
    Href(ImUrl),
    /// `a[href]`/`link[href]` whose target matched the static-asset
    /// disallow pattern — dropped before parsing, kept only for visibility.
    DisallowedHref,
    /// `form[action]` present on the page (emitted once per page).
    Form,
    /// `input[type=file]` present on the page (emitted once per page).
    UploadForm,
    /// `script[src]` pointing at a script-like asset.
    Script(ImUrl),
}

struct Selectors {
    href: Selector,
    link_href: Selector,
    form: Selector,
    file_input: Selector,
    script: Selector,
}

fn selectors() -> Selectors {
    Selectors {
        href: Selector::parse("a[href]").expect("valid selector"),
        link_href: Selector::parse("link[href]").expect("valid selector"),
        form: Selector::parse("form[action]").expect("valid selector"),
        file_input: Selector::parse("input[type='file']").expect("valid selector"),
        script: Selector::parse("script[src]").expect("valid selector"),
    }
}

/// Scan `html` (already parsed or raw text) relative to `page_url`,
/// returning every element-level finding. `html` is parsed fresh per call;
/// callers should not re-parse the same body elsewhere.
#[must_use]
pub fn scan(body: &str, page_url: &ImUrl) -> Vec<ElementFinding> {
    let doc = Html::parse_document(body);
    let selectors = selectors();
    let mut out = Vec::new();

    for el in doc
        .select(&selectors.href)
        .chain(doc.select(&selectors.link_href))
    {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Some(resolved) = page_url.resolve(href) else {
            continue;
        };
        if resolved.is_disallowed_extension() {
            out.push(ElementFinding::DisallowedHref);
            continue;
        }
        out.push(ElementFinding::Href(resolved));
    }

    if doc.select(&selectors.form).next().is_some() {
        out.push(ElementFinding::Form);
    }
    if doc.select(&selectors.file_input).next().is_some() {
        out.push(ElementFinding::UploadForm);
    }

    for el in doc.select(&selectors.script) {
        let Some(src) = el.value().attr("src") else {
            continue;
        };
        let Some(resolved) = page_url.resolve(src) else {
            continue;
        };
        out.push(ElementFinding::Script(resolved));
    }

    out
}

/// For a `.min.js` URL, the un-minified counterpart to additionally attempt
/// (§4.6 script callback: "if the URL ends in `.min.js`, also attempt the
/// un-minified counterpart").
#[must_use]
pub fn unminified_counterpart(url: &ImUrl) -> Option<ImUrl> {
    let path = url.path();
    let stripped = path.strip_suffix(".min.js")?;
    url.with_path(&format!("{stripped}.js")).ok()
}
