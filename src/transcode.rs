//! Transcode relay.
//!
//! Couples the upstream audio stream to an external encoder process and the
//! process's stdout to the HTTP response body, forwarding bytes as they are
//! produced. Nothing is buffered beyond the OS pipes; backpressure flows
//! from the client through stdout reads, the encoder, and stdin writes back
//! to the upstream socket.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::error::EncodeError;
use crate::upstream::AudioStream;

/// External encoder invocation.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: String,
    args: Vec<String>,
}

impl Transcoder {
    /// Encoder reading any audio input on stdin and writing Ogg/Opus at the
    /// given bitrate to stdout.
    pub fn opus_ogg(program: impl Into<String>, bitrate_kbps: u32) -> Self {
        Self {
            program: program.into(),
            args: vec![
                "-hide_banner".to_string(),
                "-loglevel".to_string(),
                "error".to_string(),
                "-i".to_string(),
                "pipe:0".to_string(),
                "-vn".to_string(),
                "-c:a".to_string(),
                "libopus".to_string(),
                "-b:a".to_string(),
                format!("{bitrate_kbps}k"),
                "-f".to_string(),
                "ogg".to_string(),
                "pipe:1".to_string(),
            ],
        }
    }
}

#[cfg(test)]
impl Transcoder {
    /// Arbitrary command, for exercising the relay without ffmpeg.
    pub(crate) fn raw(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Pipe `stream` through the encoder and return the response body.
///
/// Resolves only once the encoder has produced its first output chunk, so a
/// failure to start encoding surfaces here while the caller can still send a
/// status code. Errors after that point are reported through the body stream
/// and terminate the connection instead.
pub async fn relay(stream: AudioStream, transcoder: &Transcoder) -> Result<Body, EncodeError> {
    let mut child = Command::new(&transcoder.program)
        .args(&transcoder.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| EncodeError::Startup("encoder stdin unavailable".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EncodeError::Startup("encoder stdout unavailable".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| EncodeError::Startup("encoder stderr unavailable".to_string()))?;

    // Feed the upstream bytes into the encoder. A write error means the
    // encoder is gone; the loop ends and the stream handle is dropped,
    // which closes the upstream connection. The token is cancelled once the
    // encoder side is finished, so a source that stalls without yielding
    // cannot strand the task or its socket.
    let cancel = CancellationToken::new();
    let feed_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut stream = stream.into_inner();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = feed_cancel.cancelled() => {
                    debug!("encoder finished, dropping upstream stream");
                    break;
                }
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    if stdin.write_all(&bytes).await.is_err() {
                        debug!("encoder stdin closed before the source was exhausted");
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("upstream read failed mid-stream: {e}");
                    break;
                }
                None => break,
            }
        }
        // Dropping stdin signals end of input to the encoder.
    });

    // Drain stderr concurrently; it carries the failure message when the
    // encoder dies without output, and draining keeps the encoder from
    // blocking on a full pipe.
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    });

    let mut output = ReaderStream::new(stdout);
    match output.next().await {
        Some(Ok(first)) => {
            debug!("encoder produced first output chunk ({} bytes)", first.len());
            Ok(Body::from_stream(EncodedStream::new(
                first,
                output,
                child,
                cancel.drop_guard(),
            )))
        }
        Some(Err(e)) => {
            cancel.cancel();
            let _ = child.kill().await;
            Err(EncodeError::Startup(format!(
                "failed to read encoder output: {e}"
            )))
        }
        None => {
            cancel.cancel();
            let status = child.wait().await;
            let diagnostics = stderr_task.await.unwrap_or_default();
            let message = diagnostics
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no output")
                .trim()
                .to_string();
            warn!(?status, "encoder exited before producing output: {message}");
            Err(EncodeError::Startup(message))
        }
    }
}

/// Body stream that owns the encoder process.
///
/// Yields the already-read first chunk, then the encoder's stdout. After
/// stdout ends it reaps the process and turns a non-zero exit into a final
/// stream error, so the connection is torn down rather than closed as if
/// the stream were complete. Dropping it mid-stream kills the encoder and,
/// through the guard, cancels the feed task so the upstream handle is
/// released even when the source has stalled.
struct EncodedStream {
    first: Option<Bytes>,
    output: ReaderStream<ChildStdout>,
    state: EncoderState,
    _source_guard: DropGuard,
}

enum EncoderState {
    Streaming(Child),
    Reaping(Pin<Box<dyn Future<Output = io::Result<ExitStatus>> + Send>>),
    Done,
}

impl EncodedStream {
    fn new(
        first: Bytes,
        output: ReaderStream<ChildStdout>,
        child: Child,
        source_guard: DropGuard,
    ) -> Self {
        Self {
            first: Some(first),
            output,
            state: EncoderState::Streaming(child),
            _source_guard: source_guard,
        }
    }
}

impl Stream for EncodedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(first) = this.first.take() {
            return Poll::Ready(Some(Ok(first)));
        }

        loop {
            match &mut this.state {
                EncoderState::Streaming(_) => match Pin::new(&mut this.output).poll_next(cx) {
                    Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                    Poll::Ready(None) => {
                        let EncoderState::Streaming(mut child) =
                            std::mem::replace(&mut this.state, EncoderState::Done)
                        else {
                            unreachable!()
                        };
                        this.state =
                            EncoderState::Reaping(Box::pin(async move { child.wait().await }));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                EncoderState::Reaping(wait) => {
                    let status = match wait.as_mut().poll(cx) {
                        Poll::Ready(status) => status,
                        Poll::Pending => return Poll::Pending,
                    };
                    this.state = EncoderState::Done;
                    return match status {
                        Ok(status) if status.success() => Poll::Ready(None),
                        Ok(status) => {
                            warn!("encoder exited with {status} mid-stream, terminating response");
                            Poll::Ready(Some(Err(io::Error::new(
                                io::ErrorKind::Other,
                                format!("encoder exited with {status}"),
                            ))))
                        }
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
                EncoderState::Done => return Poll::Ready(None),
            }
        }
    }
}
