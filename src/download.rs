//! Streaming download of report artifacts
//!
//! Pipes a byte stream into a file sink under a single absolute deadline.
//! The pipe runs inside `tokio::time::timeout`, so the first terminal event
//! (sink finished, stream error, write error, deadline) settles the
//! operation exactly once: cancelling the pipe future drops both the stream
//! (aborting the connection) and the file handle (closing the sink). There
//! is no timer to leak and no double-settle to guard against.
//!
//! Progress is surfaced at a coarse granularity, one log line per
//! [`PROGRESS_CHUNK_STRIDE`] chunks, plus a final total.

use crate::client::ByteStream;
use crate::error::{Error, Result};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Chunks between progress log lines
const PROGRESS_CHUNK_STRIDE: u32 = 16;

/// Stream `source` into a freshly created file at `destination`, bounded by
/// an absolute `deadline` for the whole transfer.
pub async fn download_to_file(
    source: ByteStream,
    destination: &Path,
    deadline: Duration,
) -> Result<()> {
    let sink = File::create(destination).await?;

    match tokio::time::timeout(deadline, pipe(source, sink, destination)).await {
        Ok(result) => result,
        Err(_) => {
            // Cancelling the pipe dropped both the stream and the sink
            tracing::error!(
                destination = %destination.display(),
                "download time exceeds {}s", deadline.as_secs()
            );
            Err(Error::DownloadTimeout { limit: deadline })
        }
    }
}

async fn pipe(mut source: ByteStream, mut sink: File, destination: &Path) -> Result<()> {
    let mut transferred: u64 = 0;
    let mut chunks: u32 = 0;

    while let Some(chunk) = source.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::error!(error = %e, "downloading failed");
            e.with_operation("downloading failed")
        })?;
        transferred += chunk.len() as u64;
        sink.write_all(&chunk).await.map_err(|e| {
            tracing::error!(error = %e, "failed to write file");
            Error::Io(e)
        })?;

        chunks += 1;
        if chunks % PROGRESS_CHUNK_STRIDE == 0 {
            tracing::info!("downloading report ...... {transferred} (bytes)");
        }
    }

    sink.flush().await?;
    tracing::info!(
        "report saved to {} ({transferred} bytes)",
        destination.display()
    );
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn chunked(parts: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(stream::iter(
            parts.into_iter().map(|p| Ok(Bytes::from_static(p))),
        ))
    }

    #[tokio::test]
    async fn writes_all_chunks_to_the_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("results_run_5.pdf");
        let source = chunked(vec![b"abc", b"def", b"ghi"]);

        download_to_file(source, &dest, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdefghi");
    }

    #[tokio::test]
    async fn empty_stream_produces_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("results_run_5.csv");

        download_to_file(chunked(vec![]), &dest, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn deadline_fails_a_stalled_stream_and_closes_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("results_run_5.docx");

        // One chunk arrives, then the stream stalls forever
        let stalled: ByteStream = Box::pin(
            stream::iter(vec![Ok(Bytes::from_static(b"partial"))]).chain(stream::pending()),
        );

        let start = std::time::Instant::now();
        let err = download_to_file(stalled, &dest, Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DownloadTimeout { .. }));
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "deadline must settle the operation promptly"
        );

        // The sink was dropped (closed); whatever was flushed stays on disk
        let written = std::fs::read(&dest).unwrap();
        assert!(written.is_empty() || written == b"partial");

        // Re-creating the file succeeds, proving no handle is left open
        download_to_file(chunked(vec![b"retry"]), &dest, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"retry");
    }

    #[tokio::test]
    async fn stream_error_propagates_with_download_context() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("results_run_5.pdf");

        let source: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"head")),
            Err(Error::api("connection reset by peer")),
        ]));

        let err = download_to_file(source, &dest, Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            Error::Api { message, .. } => {
                assert!(message.starts_with("downloading failed:"), "was: {message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_failure_surfaces_as_io_error() {
        let dir = tempfile::tempdir().unwrap();
        // Destination is a directory: File::create fails up front
        let err = download_to_file(chunked(vec![b"x"]), dir.path(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
