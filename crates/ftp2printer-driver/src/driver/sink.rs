//! Upload sinks: where the non-persisted copy of every upload goes.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::io::AsyncRead;

/// Consumer for the sink branch of an upload.
///
/// `consume` runs on its own task, once per upload, and may outlive the
/// `put` call that started it. The stream ends when the client's upload
/// ends; a source error is reported by the stream itself.
#[async_trait]
pub trait UploadSink: Send + Sync + 'static {
    /// Drain `stream`, returning the number of bytes taken.
    async fn consume(
        &self,
        path: &Path,
        stream: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<u64>;
}

/// Sink that reads and throws away every byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

#[async_trait]
impl UploadSink for DiscardSink {
    async fn consume(
        &self,
        _path: &Path,
        stream: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<u64> {
        tokio::io::copy(stream, &mut tokio::io::sink()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discard_counts_bytes() {
        let mut stream: &[u8] = b"hello printer";
        let n = DiscardSink
            .consume(Path::new("/doc.ps"), &mut stream)
            .await
            .unwrap();
        assert_eq!(n, 13);
    }
}
