//! Emit filter and output sink (§3 "Emit record", §4.3).
//!
//! An [`EmitRecord`] is produced for every discovery of interest. The
//! [`EmitFilter`] decides whether a kind is allowed through; the [`Sink`]
//! renders allowed records to stdout and an optional per-target file,
//! serializing concurrent writes under a single lock.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// The kind tag of an emitted record (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Url,
    Href,
    Javascript,
    Linkfinder,
    Form,
    UploadForm,
    Robots,
    Sitemap,
    Subdomains,
    Aws,
    Render,
    Network,
    Raw,
}

impl Kind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Href => "href",
            Self::Javascript => "javascript",
            Self::Linkfinder => "linkfinder",
            Self::Form => "form",
            Self::UploadForm => "upload-form",
            Self::Robots => "robots",
            Self::Sitemap => "sitemap",
            Self::Subdomains => "subdomains",
            Self::Aws => "aws",
            Self::Render => "render",
            Self::Network => "network",
            Self::Raw => "raw",
        }
    }
}

impl std::str::FromStr for Kind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "url" => Self::Url,
            "href" => Self::Href,
            "javascript" => Self::Javascript,
            "linkfinder" => Self::Linkfinder,
            "form" => Self::Form,
            "upload-form" => Self::UploadForm,
            "robots" => Self::Robots,
            "sitemap" => Self::Sitemap,
            "subdomains" => Self::Subdomains,
            "aws" => Self::Aws,
            "render" => Self::Render,
            "network" => Self::Network,
            "raw" => Self::Raw,
            other => anyhow::bail!("unrecognized emit kind: {other}"),
        })
    }
}

/// `{input, source, kind, output, status, length}` (§3).
#[derive(Debug, Clone, Serialize)]
pub struct EmitRecord {
    pub input: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: Kind,
    pub output: String,
    pub status: Option<u16>,
    pub length: Option<usize>,
}

impl EmitRecord {
    #[must_use]
    pub fn new(input: impl Into<String>, source: impl Into<String>, kind: Kind, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            source: source.into(),
            kind,
            output: output.into(),
            status: None,
            length: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}

/// Include/exclude kind sets (§4.3): if `include` is empty, all kinds pass;
/// otherwise only listed kinds pass. `exclude` is subtracted last.
#[derive(Debug, Clone, Default)]
pub struct EmitFilter {
    include: HashSet<Kind>,
    exclude: HashSet<Kind>,
}

impl EmitFilter {
    #[must_use]
    pub fn new(include: HashSet<Kind>, exclude: HashSet<Kind>) -> Self {
        Self { include, exclude }
    }

    #[must_use]
    pub fn allows(&self, kind: Kind) -> bool {
        let included = self.include.is_empty() || self.include.contains(&kind);
        included && !self.exclude.contains(&kind)
    }
}

/// Active rendering mode for the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Plain,
    Quiet,
    Structured,
}

fn render_line(record: &EmitRecord, mode: OutputMode, show_length: bool) -> Result<String> {
    Ok(match mode {
        OutputMode::Quiet => record.output.clone(),
        OutputMode::Structured => serde_json::to_string(record).context("serializing emit record")?,
        OutputMode::Plain => {
            let length_part = if show_length {
                record
                    .length
                    .map(|l| format!("[len_{l}] - "))
                    .unwrap_or_default()
            } else {
                String::new()
            };
            match (record.kind, record.status) {
                (Kind::Url, Some(status)) => {
                    format!("{length_part}[url] - [code-{status}] - {}", record.output)
                }
                _ => format!("{length_part}[{}] - {}", record.kind.as_str(), record.output),
            }
        }
    })
}

/// Stdout + optional buffered file sink. Writes are serialized under a
/// single async mutex so concurrent producers never interleave lines.
pub struct Sink {
    filter: EmitFilter,
    mode: OutputMode,
    show_length: bool,
    file: Option<Arc<Mutex<tokio::io::BufWriter<tokio::fs::File>>>>,
}

impl Sink {
    /// Opens `output_dir/<hostname-with-dots-as-underscores>` as the
    /// optional per-target file sink, if `output_dir` is given (§6).
    pub async fn open(
        filter: EmitFilter,
        mode: OutputMode,
        show_length: bool,
        output_dir: Option<&Path>,
        hostname: &str,
    ) -> Result<Self> {
        let file = match output_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .context("creating output directory")?;
                let file_name = hostname.replace('.', "_");
                let path = dir.join(file_name);
                let handle = tokio::fs::File::create(&path)
                    .await
                    .with_context(|| format!("creating output file {}", path.display()))?;
                Some(Arc::new(Mutex::new(tokio::io::BufWriter::new(handle))))
            }
            None => None,
        };
        Ok(Self {
            filter,
            mode,
            show_length,
            file,
        })
    }

    #[must_use]
    pub fn stdout_only(filter: EmitFilter, mode: OutputMode, show_length: bool) -> Self {
        Self {
            filter,
            mode,
            show_length,
            file: None,
        }
    }

    /// Render and write `record` if its kind passes the filter. Non-blocking
    /// with respect to the fetch path beyond the buffer fill (§4.3).
    pub async fn emit(&self, record: EmitRecord) -> Result<()> {
        if !self.filter.allows(record.kind) {
            return Ok(());
        }
        let line = render_line(&record, self.mode, self.show_length)?;
        println!("{line}");

        if let Some(file) = &self.file {
            let mut guard = file.lock().await;
            guard.write_all(line.as_bytes()).await?;
            guard.write_all(b"\n").await?;
        }
        Ok(())
    }

    /// Flush and close the file sink, if any (§4.6 quiescence).
    pub async fn close(&self) -> Result<()> {
        if let Some(file) = &self.file {
            let mut guard = file.lock().await;
            guard.flush().await.context("flushing output file")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_include_allows_everything() {
        let filter = EmitFilter::default();
        assert!(filter.allows(Kind::Url));
        assert!(filter.allows(Kind::Robots));
    }

    #[test]
    fn exclude_wins_over_include() {
        let mut include = HashSet::new();
        include.insert(Kind::Url);
        include.insert(Kind::Href);
        let mut exclude = HashSet::new();
        exclude.insert(Kind::Href);
        let filter = EmitFilter::new(include, exclude);
        assert!(filter.allows(Kind::Url));
        assert!(!filter.allows(Kind::Href));
        assert!(!filter.allows(Kind::Robots));
    }

    #[test]
    fn plain_mode_renders_status_for_url_kind() {
        let record = EmitRecord::new("a.test", "crawl", Kind::Url, "https://a.test/").with_status(200);
        let line = render_line(&record, OutputMode::Plain, false).unwrap();
        assert_eq!(line, "[url] - [code-200] - https://a.test/");
    }

    #[test]
    fn quiet_mode_renders_bare_output() {
        let record = EmitRecord::new("a.test", "crawl", Kind::Href, "https://a.test/x");
        let line = render_line(&record, OutputMode::Quiet, false).unwrap();
        assert_eq!(line, "https://a.test/x");
    }

    #[test]
    fn structured_record_serializes_kind_as_type_field() {
        let record = EmitRecord::new("a.test", "crawl", Kind::Href, "https://a.test/x");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "href");
        assert!(value.get("kind").is_none());
    }

    #[tokio::test]
    async fn sink_respects_filter() {
        let mut exclude = HashSet::new();
        exclude.insert(Kind::Form);
        let sink = Sink::stdout_only(EmitFilter::new(HashSet::new(), exclude), OutputMode::Quiet, false);
        sink.emit(EmitRecord::new("a.test", "crawl", Kind::Form, "https://a.test/"))
            .await
            .unwrap();
        sink.close().await.unwrap();
    }
}
