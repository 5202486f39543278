//! Collaborateur de récupération des médias
//!
//! L'implémentation par défaut délègue à yt-dlp : `probe` lit le dump JSON
//! des métadonnées, `open` streame le média sur stdout.

use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

/// Métadonnées d'un média distant
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub title: String,
    pub thumbnail: Option<String>,
    pub duration: Duration,
}

/// Flux d'octets d'un média en cours de récupération
pub type MediaStream = Pin<Box<dyn AsyncRead + Send>>;

/// Récupération de médias depuis une URL source
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Métadonnées du média (titre, vignette, durée)
    async fn probe(&self, url: &str) -> Result<MediaInfo>;

    /// Ouvre le flux d'octets du média
    async fn open(&self, url: &str) -> Result<MediaStream>;
}

/// Fetcher basé sur le programme externe yt-dlp
pub struct YtDlpFetcher {
    program: String,
    format: String,
}

impl YtDlpFetcher {
    /// # Arguments
    ///
    /// * `program` - Chemin du binaire yt-dlp
    /// * `format` - Filtre de format passé à `-f`
    pub fn new(program: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            format: format.into(),
        }
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn probe(&self, url: &str) -> Result<MediaInfo> {
        debug!(url, "probing media info");

        let output = Command::new(&self.program)
            .arg("-J")
            .arg("--no-playlist")
            .arg(url)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Fetch(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let info: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Fetch(format!("invalid metadata dump: {}", e)))?;

        Ok(MediaInfo {
            title: info
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(url)
                .to_string(),
            thumbnail: info
                .get("thumbnail")
                .and_then(Value::as_str)
                .map(str::to_string),
            duration: info
                .get("duration")
                .and_then(Value::as_f64)
                .map(Duration::from_secs_f64)
                .unwrap_or_default(),
        })
    }

    async fn open(&self, url: &str) -> Result<MediaStream> {
        debug!(url, "opening media stream");

        let mut child = Command::new(&self.program)
            .arg("-f")
            .arg(&self.format)
            .arg("--no-playlist")
            .arg("-o")
            .arg("-")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Fetch("no stdout pipe from fetcher process".to_string()))?;

        Ok(Box::pin(FetchStream {
            _child: child,
            stdout,
        }))
    }
}

/// Flux stdout du processus fetcher
///
/// Le `Child` est conservé pour que `kill_on_drop` abatte le processus dès
/// que le flux est abandonné.
struct FetchStream {
    _child: Child,
    stdout: ChildStdout,
}

impl AsyncRead for FetchStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}
