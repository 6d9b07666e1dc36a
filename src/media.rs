//! Search and extraction collaborator.
//!
//! [`MediaSource`] resolves free-text queries to candidate media and
//! materializes a chosen locator into a local directory. [`YtDlpSource`]
//! implements it by shelling out to `yt-dlp`.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Patterns indicating the media itself can never be fetched
const FATAL_ERROR_PATTERNS: &[&str] = &[
    "Video unavailable",
    "Private video",
    "This video is not available",
    "Sign in to confirm your age",
    "age-restricted",
    "members-only",
    "This video is private",
    "removed by the uploader",
    "no longer available",
    "blocked it in your country",
    "geo-restricted",
    "copyright claim",
    "This video has been removed",
    "ERROR: Unsupported URL",
    "is not a valid URL",
    "Premieres in",
    "This live event will begin",
    "Join this channel to get access",
    "HTTP Error 403",
    "HTTP Error 404",
];

/// Longest stderr excerpt kept in an error
const MAX_ERROR_LENGTH: usize = 300;

/// Errors reported by a [`MediaSource`]
#[derive(Error, Debug)]
pub enum MediaError {
    /// The extractor binary could not be started
    #[error("failed to run extractor: {0}")]
    Spawn(#[from] std::io::Error),
    /// The media cannot be fetched (private, removed, region-locked, ...)
    #[error("media unavailable: {0}")]
    Unavailable(String),
    /// The extractor exited with an error
    #[error("extractor failed: {0}")]
    Failed(String),
    /// The extractor reported success but produced no file
    #[error("extractor produced no output")]
    MissingOutput,
}

impl MediaError {
    /// Short human-readable reason for chat replies
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "this media is unavailable (private, removed or region-locked)",
            Self::MissingOutput => "the download produced no audio file",
            Self::Spawn(_) | Self::Failed(_) => "the download failed",
        }
    }
}

/// One candidate returned by a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Opaque locator passed back to [`MediaSource::fetch`]
    pub locator: String,
    /// Display title
    pub title: String,
    /// Duration in seconds, when known
    pub duration_secs: Option<u32>,
    /// Uploader or channel
    pub uploader: String,
    /// Page URL for display
    pub webpage_url: String,
}

/// Search and extraction provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Up to `limit` candidates for `query`, best match first
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, MediaError>;

    /// Download `locator` as audio into `dest`, returning the produced file
    async fn fetch(&self, locator: &str, dest: &Path) -> Result<PathBuf, MediaError>;
}

fn is_fatal_ytdlp_error(error_msg: &str) -> bool {
    FATAL_ERROR_PATTERNS
        .iter()
        .any(|pattern| error_msg.contains(pattern))
}

/// `yt-dlp` backed [`MediaSource`]
pub struct YtDlpSource {
    binary: String,
}

impl YtDlpSource {
    /// Use the executable at `binary` (a bare name is looked up on `PATH`)
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run yt-dlp; the child is killed if the returned future is dropped
    async fn exec_ytdlp(&self, args: &[&str]) -> Result<String, MediaError> {
        debug!(?args, "Executing yt-dlp command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let error_msg = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        let error_msg = crate::utils::truncate_str(&error_msg, MAX_ERROR_LENGTH);

        if is_fatal_ytdlp_error(&error_msg) {
            warn!(error = %error_msg, "Fatal yt-dlp error detected");
            return Err(MediaError::Unavailable(error_msg));
        }
        Err(MediaError::Failed(error_msg))
    }
}

#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
}

impl YtDlpEntry {
    fn into_hit(self) -> Option<SearchHit> {
        let page = self.webpage_url.or(self.url).or_else(|| {
            self.id
                .as_ref()
                .map(|id| format!("https://www.youtube.com/watch?v={id}"))
        })?;
        Some(SearchHit {
            locator: page.clone(),
            title: self.title.unwrap_or_else(|| "Unknown".to_string()),
            duration_secs: self
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(|d| d.round() as u32),
            uploader: self
                .uploader
                .or(self.channel)
                .unwrap_or_else(|| "Unknown".to_string()),
            webpage_url: page,
        })
    }
}

/// Parse yt-dlp's NDJSON output, skipping lines that are not entries
fn parse_search_output(output: &str) -> Vec<SearchHit> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<YtDlpEntry>(line).ok())
        .filter_map(YtDlpEntry::into_hit)
        .collect()
}

/// First regular file in `dir`, preferring mp3
async fn find_output(dir: &Path) -> Result<PathBuf, MediaError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut fallback = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if path.extension().is_some_and(|ext| ext == "mp3") {
            return Ok(path);
        }
        // yt-dlp leaves *.part / *.ytdl files behind on interrupted runs
        let partial = path
            .extension()
            .is_some_and(|ext| ext == "part" || ext == "ytdl");
        if !partial && fallback.is_none() {
            fallback = Some(path);
        }
    }
    fallback.ok_or(MediaError::MissingOutput)
}

#[async_trait]
impl MediaSource for YtDlpSource {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, MediaError> {
        let target = format!("ytsearch{}:{query}", limit.max(1));
        let output = self
            .exec_ytdlp(&["-j", "--flat-playlist", "--no-warnings", &target])
            .await?;
        Ok(parse_search_output(&output))
    }

    async fn fetch(&self, locator: &str, dest: &Path) -> Result<PathBuf, MediaError> {
        let template = dest.join("%(id)s.%(ext)s");
        let template = template.to_string_lossy();
        self.exec_ytdlp(&[
            "-f",
            "bestaudio/best",
            "-x",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "192K",
            "--no-playlist",
            "--no-warnings",
            "-o",
            &template,
            "--",
            locator,
        ])
        .await?;
        find_output(dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_output() {
        let output = concat!(
            r#"{"id":"abc","title":"Song A","duration":201.0,"channel":"Chan","url":"https://www.youtube.com/watch?v=abc"}"#,
            "\n\n",
            "garbage line\n",
            r#"{"id":"def","title":"Song B","uploader":"Up","webpage_url":"https://example.com/def"}"#,
            "\n",
        );

        let hits = parse_search_output(output);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Song A");
        assert_eq!(hits[0].duration_secs, Some(201));
        assert_eq!(hits[0].uploader, "Chan");
        assert_eq!(hits[0].locator, "https://www.youtube.com/watch?v=abc");
        assert_eq!(hits[1].duration_secs, None);
        assert_eq!(hits[1].uploader, "Up");
        assert_eq!(hits[1].locator, "https://example.com/def");
    }

    #[test]
    fn test_entry_without_any_url_uses_id() {
        let hits = parse_search_output(r#"{"id":"xyz","title":"T"}"#);
        assert_eq!(hits[0].locator, "https://www.youtube.com/watch?v=xyz");

        assert!(parse_search_output(r#"{"title":"no id"}"#).is_empty());
    }

    #[test]
    fn test_fatal_error_detection() {
        assert!(is_fatal_ytdlp_error("ERROR: [youtube] abc: Private video"));
        assert!(!is_fatal_ytdlp_error("ERROR: Connection reset by peer"));
    }

    #[tokio::test]
    async fn test_find_output_prefers_mp3_and_skips_partials(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        assert!(matches!(
            find_output(dir.path()).await,
            Err(MediaError::MissingOutput)
        ));

        std::fs::write(dir.path().join("a.webm.part"), b"x")?;
        assert!(matches!(
            find_output(dir.path()).await,
            Err(MediaError::MissingOutput)
        ));

        std::fs::write(dir.path().join("a.webm"), b"x")?;
        std::fs::write(dir.path().join("a.mp3"), b"x")?;
        assert_eq!(find_output(dir.path()).await?, dir.path().join("a.mp3"));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let source = YtDlpSource::new("/nonexistent/yt-dlp-binary");
        let result = source.search("anything", 1).await;
        assert!(matches!(result, Err(MediaError::Spawn(_))));
    }
}
