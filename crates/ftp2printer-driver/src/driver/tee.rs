//! Pull-driven tee for upload streams.
//!
//! [`tee`] splits one `AsyncRead` into two [`TeeReader`]s that observe the
//! same bytes. There is no pump task: whichever branch runs dry pulls the next
//! chunk from the source and queues a copy for its sibling. A branch refuses
//! to pull while its sibling already holds `limit` unread bytes, so the
//! slower consumer paces the source and memory stays bounded.
//!
//! Dropping a branch detaches it. Its queue is freed and the remaining branch
//! reads the source on its own from then on.

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, ReadBuf};

/// Default number of bytes a branch may hold for a lagging sibling.
pub const DEFAULT_TEE_BUFFER: usize = 64 * 1024;

/// Largest single read issued against the source.
const READ_CHUNK: usize = 16 * 1024;

type Source = Box<dyn AsyncRead + Send + Unpin>;

/// How the source stream ended, replayed to the branch that did not see it.
#[derive(Debug)]
enum End {
    Eof,
    Failed(io::ErrorKind, String),
}

#[derive(Debug, Default)]
struct Branch {
    queue: VecDeque<Bytes>,
    queued: usize,
    detached: bool,
    waker: Option<Waker>,
}

impl Branch {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

struct Shared {
    source: Source,
    end: Option<End>,
    branches: [Branch; 2],
    limit: usize,
}

impl Shared {
    /// Split borrows: (this side, sibling, source, end, limit).
    fn sides(
        &mut self,
        side: usize,
    ) -> (&mut Branch, &mut Branch, &mut Source, &mut Option<End>, usize) {
        let Shared {
            source,
            end,
            branches,
            limit,
        } = self;
        let [a, b] = branches;
        if side == 0 {
            (a, b, source, end, *limit)
        } else {
            (b, a, source, end, *limit)
        }
    }
}

/// One branch of a tee'd stream.
pub struct TeeReader {
    shared: Arc<Mutex<Shared>>,
    side: usize,
}

impl std::fmt::Debug for TeeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeeReader")
            .field("side", &self.side)
            .finish_non_exhaustive()
    }
}

/// Split `source` into two readers that each yield every byte of it.
///
/// `limit` bounds how far one branch may run ahead of the other. Values
/// below one are treated as one.
pub fn tee<R>(source: R, limit: usize) -> (TeeReader, TeeReader)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let shared = Arc::new(Mutex::new(Shared {
        source: Box::new(source),
        end: None,
        branches: [Branch::default(), Branch::default()],
        limit: limit.max(1),
    }));

    (
        TeeReader {
            shared: Arc::clone(&shared),
            side: 0,
        },
        TeeReader { shared, side: 1 },
    )
}

impl AsyncRead for TeeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let this = self.get_mut();
        let mut shared = this.shared.lock();
        let (own, sibling, source, end, limit) = shared.sides(this.side);

        // Bytes the sibling already pulled for us come first.
        if let Some(chunk) = own.queue.front_mut() {
            let n = chunk.len().min(buf.remaining());
            buf.put_slice(&chunk[..n]);
            chunk.advance(n);
            if chunk.is_empty() {
                own.queue.pop_front();
            }
            own.queued -= n;
            // The sibling may be parked waiting for this queue to shrink.
            sibling.wake();
            return Poll::Ready(Ok(()));
        }

        match end {
            Some(End::Eof) => return Poll::Ready(Ok(())),
            Some(End::Failed(kind, msg)) => {
                return Poll::Ready(Err(io::Error::new(*kind, msg.clone())));
            }
            None => {}
        }

        if !sibling.detached && sibling.queued >= limit {
            own.waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let want = buf.remaining().min(READ_CHUNK);
        let mut chunk = BytesMut::zeroed(want);
        let mut chunk_buf = ReadBuf::new(&mut chunk[..]);

        match Pin::new(source).poll_read(cx, &mut chunk_buf) {
            Poll::Pending => {
                // The source only remembers the latest waker; keep ours so a
                // sibling that later pulls the data can wake us.
                own.waker = Some(cx.waker().clone());
                Poll::Pending
            }
            Poll::Ready(Err(err)) => {
                *end = Some(End::Failed(err.kind(), err.to_string()));
                sibling.wake();
                Poll::Ready(Err(err))
            }
            Poll::Ready(Ok(())) => {
                let n = chunk_buf.filled().len();
                if n == 0 {
                    *end = Some(End::Eof);
                    sibling.wake();
                    return Poll::Ready(Ok(()));
                }

                chunk.truncate(n);
                let chunk = chunk.freeze();
                buf.put_slice(&chunk);
                if !sibling.detached {
                    sibling.queued += n;
                    sibling.queue.push_back(chunk);
                }
                sibling.wake();
                Poll::Ready(Ok(()))
            }
        }
    }
}

impl Drop for TeeReader {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        let (own, sibling, _, _, _) = shared.sides(self.side);
        own.detached = true;
        own.queue.clear();
        own.queued = 0;
        own.waker = None;
        sibling.wake();
    }
}
