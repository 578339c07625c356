//! Bounded per-container output buffer with followers.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    sync::watch,
};
use tracing::debug;

use crate::util::lock;

/// Bytes kept per container when no other limit is configured.
pub const DEFAULT_LOG_LIMIT: usize = 8 * 1024 * 1024;

/// Output captured from one container.
///
/// Only the most recent `limit` bytes are retained. Every [`LogBuffer::follow`] reader replays
/// what is still retained and then receives new output until the buffer is closed; a reader that
/// falls more than `limit` bytes behind skips the discarded part.
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Inner>,
}

struct Inner {
    limit: usize,
    chunk: Mutex<Chunk>,
    notify: watch::Sender<()>,
}

#[derive(Default)]
struct Chunk {
    bytes: VecDeque<u8>,
    /// Total bytes discarded from the front; absolute offset of `bytes[0]`.
    dropped: usize,
    closed: bool,
}

impl Chunk {
    /// Bytes from absolute offset `pos` on, and the offset they actually start at.
    fn tail(&self, pos: usize) -> (usize, Vec<u8>) {
        let start = pos.max(self.dropped);
        (start, self.bytes.range(start - self.dropped..).copied().collect())
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_LIMIT)
    }
}

impl LogBuffer {
    pub fn new(limit: usize) -> Self {
        let (notify, _) = watch::channel(());
        Self {
            inner: Arc::new(Inner {
                limit: limit.max(1),
                chunk: Mutex::new(Chunk::default()),
                notify,
            }),
        }
    }

    /// Append output, discarding the oldest bytes beyond the limit. Ignored once closed.
    pub fn append(&self, buf: &[u8]) {
        {
            let mut chunk = lock(&self.inner.chunk);
            if chunk.closed {
                return;
            }
            chunk.bytes.extend(buf);
            let excess = chunk.bytes.len().saturating_sub(self.inner.limit);
            if excess > 0 {
                chunk.bytes.drain(..excess);
                chunk.dropped += excess;
            }
        }
        self.inner.notify.send_replace(());
    }

    /// Mark the end of output; followers finish after delivering what is buffered.
    pub fn close(&self) {
        lock(&self.inner.chunk).closed = true;
        self.inner.notify.send_replace(());
    }

    /// Open a reader over the retained output, following it until close.
    ///
    /// Bytes are pumped by a background task through a pipe of `capacity` bytes; the task stops
    /// early when the reader is dropped.
    pub fn follow(&self, capacity: usize) -> DuplexStream {
        let (reader, mut writer) = tokio::io::duplex(capacity.max(1));
        let inner = Arc::clone(&self.inner);
        let mut changed = inner.notify.subscribe();

        tokio::spawn(async move {
            let mut pos = 0;
            loop {
                changed.borrow_and_update();
                let ((start, next), closed) = {
                    let chunk = lock(&inner.chunk);
                    (chunk.tail(pos), chunk.closed)
                };
                if start > pos {
                    debug!(target: "kubejob.exec", skipped = start - pos, "log follower fell behind");
                }
                if !next.is_empty() && writer.write_all(&next).await.is_err() {
                    return;
                }
                pos = start + next.len();
                if closed {
                    break;
                }
                if changed.changed().await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        reader
    }
}
