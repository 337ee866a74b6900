//! Upstream stream acquisition.
//!
//! The extraction protocol itself is delegated to yt-dlp: one invocation
//! resolves the highest-quality audio-only representation to a direct media
//! URL, then the stream is opened with a plain HTTP request carrying the
//! same identity headers. The open resolves at the first response signal
//! (headers), before any body byte is pulled, so the caller's own response
//! is never held open while upstream negotiation is still pending.

use std::io;
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt, TryStreamExt};
use tokio::process::Command;
use tracing::debug;

use crate::config::Config;
use crate::error::OpenError;

/// Identity headers presented to the upstream platform.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_agent: String,
    pub accept_language: String,
    pub cookie: Option<String>,
}

impl Identity {
    pub fn from_config(config: &Config) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            accept_language: config.accept_language.clone(),
            cookie: (!config.cookie.is_empty()).then(|| config.cookie.clone()),
        }
    }
}

/// Owned handle to a live upstream audio byte stream.
///
/// Exactly one exists per request. Ownership moves from the opener to the
/// relay; dropping the handle closes the underlying connection.
pub struct AudioStream {
    inner: BoxStream<'static, io::Result<Bytes>>,
}

impl AudioStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    pub fn into_inner(self) -> BoxStream<'static, io::Result<Bytes>> {
        self.inner
    }
}

/// Source of upstream audio streams.
///
/// The production implementation shells out to yt-dlp; tests substitute
/// doubles that record open calls.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open(&self, url: &str) -> Result<AudioStream, OpenError>;
}

/// yt-dlp backed media source.
pub struct YtDlpSource {
    program: String,
    identity: Identity,
    client: reqwest::Client,
}

impl YtDlpSource {
    pub fn new(program: impl Into<String>, identity: Identity, client: reqwest::Client) -> Self {
        Self {
            program: program.into(),
            identity,
            client,
        }
    }

    /// Resolve a source URL to the direct URL of its best audio-only
    /// representation.
    async fn resolve(&self, url: &str) -> Result<String, OpenError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--no-playlist")
            .args(["-f", "bestaudio"])
            .args(["--user-agent", &self.identity.user_agent])
            .args([
                "--add-header",
                &format!("Accept-Language:{}", self.identity.accept_language),
            ]);
        if let Some(cookie) = &self.identity.cookie {
            cmd.args(["--add-header", &format!("Cookie:{cookie}")]);
        }
        cmd.arg("-g").arg(url).stdin(Stdio::null());

        let output = cmd
            .output()
            .await
            .map_err(|e| OpenError::Network(format!("failed to run extractor: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_extractor_failure(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().find(|line| !line.trim().is_empty()) {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(OpenError::Extractor {
                status: None,
                message: "extractor produced no stream URL".to_string(),
            }),
        }
    }

    /// Open the resolved URL. Success is determined at the response-header
    /// signal; the body has not been pulled when this returns.
    async fn connect(&self, direct_url: &str) -> Result<AudioStream, OpenError> {
        let mut request = self
            .client
            .get(direct_url)
            .header(reqwest::header::USER_AGENT, &self.identity.user_agent)
            .header(
                reqwest::header::ACCEPT_LANGUAGE,
                &self.identity.accept_language,
            );
        if let Some(cookie) = &self.identity.cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OpenError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OpenError::from_status(status.as_u16()));
        }

        Ok(AudioStream::new(
            response
                .bytes_stream()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        ))
    }
}

#[async_trait]
impl MediaSource for YtDlpSource {
    async fn open(&self, url: &str) -> Result<AudioStream, OpenError> {
        let direct_url = self.resolve(url).await?;
        debug!("resolved direct audio stream for {url}");
        self.connect(&direct_url).await
    }
}

/// Map an extractor stderr dump to a classified open failure.
///
/// yt-dlp reports upstream rejections as `HTTP Error NNN`; anything else is
/// surfaced with the last non-empty stderr line as the message.
fn classify_extractor_failure(stderr: &str) -> OpenError {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"HTTP Error (\d{3})").unwrap());

    if let Some(caps) = re.captures(stderr) {
        if let Ok(status) = caps[1].parse::<u16>() {
            return OpenError::from_status(status);
        }
    }

    let message = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("extractor failed with no diagnostics")
        .trim()
        .to_string();
    OpenError::Extractor {
        status: None,
        message,
    }
}
