//! Regex-based link discovery over raw text bodies (§4.4).
//!
//! Runs over HTML and script/JSON/XML/MAP bodies alike; the crawl engine
//! decides which responses to feed it. One shared regex extracts candidate
//! tokens, a noise filter drops MIME types, dates, template placeholders and
//! route templates, and the survivors are resolved against the response's
//! own URL.

use std::sync::LazyLock;

use regex::Regex;

use crate::imurl::ImUrl;

/// The single link-finder regex (§4.4): quoted tokens matching an absolute
/// or scheme-relative URL, a relative path, an extension-suffixed segment
/// pair, or a bare filename with a recognized extension.
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        ['"]
        (
            (?:[a-zA-Z]{1,10}://|//)[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}[^'"<>\s]*   # absolute / scheme-relative
            |
            (?:\.{0,2}/)[^'"<>\s]+                                           # relative path
            |
            [^'"<>\s]+/[^'"<>\s]*\.(?:php|asp|aspx|jsp|json|action|html|js|txt|xml)(?:\?[^'"<>\s]*)?
            |
            [a-zA-Z0-9_\-]{1,}\.(?:php|asp|aspx|jsp|json|action|html|js|txt|xml)
        )
        ['"]
        "#,
    )
    .expect("linkfinder regex is valid")
});

static MIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9.+-]*/[a-zA-Z0-9.+-]+$").expect("mime regex is valid")
});
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}/\d{1,2}/\d{2,4}$").expect("date regex is valid"));

/// Bodies larger than this get line breaks inserted after `;`/`,` so the
/// regex engine backtracks less (§4.4 pre-step).
const LINEBREAK_THRESHOLD: usize = 1024 * 1024;

/// What a surviving token resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// Resolved URL to feed the JS sub-crawler (script-like extension).
    ScriptAsset(ImUrl),
    /// Resolved URL to emit with kind `linkfinder` and enqueue.
    Link(ImUrl),
}

/// Run the link-finder over `body`, resolving relative tokens against
/// `document_url`. Returns the unique, noise-filtered, classified findings.
#[must_use]
pub fn find(body: &str, document_url: &ImUrl) -> Vec<Finding> {
    let prepped;
    let body = if body.len() > LINEBREAK_THRESHOLD {
        prepped = body.replace(';', ";\n").replace(',', ",\n");
        prepped.as_str()
    } else {
        body
    };

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for cap in TOKEN_RE.captures_iter(body) {
        let Some(token) = cap.get(1) else { continue };
        let token = token.as_str();

        if is_noise(token) {
            continue;
        }
        if !seen.insert(token.to_string()) {
            continue;
        }

        let resolved = if token.contains("://") || token.starts_with("//") {
            ImUrl::parse(&normalize_scheme_relative(token, document_url)).ok()
        } else {
            document_url.resolve(token)
        };

        let Some(resolved) = resolved else { continue };

        if resolved.is_script_like() {
            out.push(Finding::ScriptAsset(resolved));
        } else {
            out.push(Finding::Link(resolved));
        }
    }

    out
}

fn normalize_scheme_relative(token: &str, document_url: &ImUrl) -> String {
    if let Some(rest) = token.strip_prefix("//") {
        format!("{}://{rest}", document_url.scheme())
    } else {
        token.to_string()
    }
}

fn is_noise(token: &str) -> bool {
    MIME_RE.is_match(token)
        || DATE_RE.is_match(token)
        || token.contains("{{")
        || token.contains("}}")
        || token.contains("/:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(s: &str) -> ImUrl {
        ImUrl::parse(s).unwrap()
    }

    #[test]
    fn extracts_api_path_and_skips_mime_type() {
        let body = r#"fetch("/api/v1/users"); const t = "application/json";"#;
        let findings = find(body, &doc("https://a.test/app.js"));
        assert!(findings
            .iter()
            .any(|f| matches!(f, Finding::Link(u) if u.as_str() == "https://a.test/api/v1/users")));
        assert!(!findings.iter().any(
            |f| matches!(f, Finding::Link(u) | Finding::ScriptAsset(u) if u.as_str().contains("application"))
        ));
    }

    #[test]
    fn classifies_script_assets_separately() {
        let body = r#"import("/static/bundle.js")"#;
        let findings = find(body, &doc("https://a.test/"));
        assert!(findings
            .iter()
            .any(|f| matches!(f, Finding::ScriptAsset(u) if u.as_str().ends_with("bundle.js"))));
    }

    #[test]
    fn rejects_date_and_template_tokens() {
        let body = r#"var d = "12/31/2024"; var t = "{{user.name}}"; var r = "/users/:id";"#;
        let findings = find(body, &doc("https://a.test/"));
        assert!(findings.is_empty());
    }
}
