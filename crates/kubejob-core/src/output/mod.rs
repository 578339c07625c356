//! Line-oriented output multiplexing.
//!
//! Every streamer owns one [`PrefixWriter`]; all writers of a pod share one [`SharedOutput`].
//! The shared destination serializes whole lines, so lines of different containers may
//! interleave with each other but never split one another.

use std::{fmt, io, mem, sync::Arc};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

type BoxWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Destination shared by all streamers of a job run.
#[derive(Clone)]
pub struct SharedOutput {
    inner: Arc<Mutex<BoxWrite>>,
}

impl SharedOutput {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Write `label + line + "\n"` as one unit.
    pub async fn write_line(&self, label: &str, line: &[u8]) -> io::Result<()> {
        let mut buf = Vec::with_capacity(label.len() + line.len() + 1);
        buf.extend_from_slice(label.as_bytes());
        buf.extend_from_slice(line);
        buf.push(b'\n');

        let mut w = self.inner.lock().await;
        w.write_all(&buf).await?;
        w.flush().await
    }
}

impl fmt::Debug for SharedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedOutput").finish_non_exhaustive()
    }
}

/// Per-source writer tagging each line with the current label.
///
/// Input may arrive in arbitrary chunks; an incomplete trailing line is held back until its
/// terminator arrives or [`PrefixWriter::finish`] is called.
pub struct PrefixWriter<F> {
    out: SharedOutput,
    label: F,
    pending: Vec<u8>,
}

impl<F> PrefixWriter<F>
where
    F: Fn() -> String,
{
    pub fn new(out: SharedOutput, label: F) -> Self {
        Self {
            out,
            label,
            pending: Vec::new(),
        }
    }

    pub async fn write(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let (line, rest) = buf.split_at(pos);
            if self.pending.is_empty() {
                self.emit(line).await?;
            } else {
                self.pending.extend_from_slice(line);
                let joined = mem::take(&mut self.pending);
                self.emit(&joined).await?;
            }
            buf = &rest[1..];
        }
        self.pending.extend_from_slice(buf);
        Ok(())
    }

    /// Flush a held-back incomplete line, terminating it.
    pub async fn finish(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let tail = mem::take(&mut self.pending);
        self.emit(&tail).await
    }

    async fn emit(&self, line: &[u8]) -> io::Result<()> {
        let label = (self.label)();
        self.out.write_line(&label, line).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Capture;

    #[tokio::test]
    async fn prefixes_every_complete_line() {
        let cap = Capture::default();
        let mut w = PrefixWriter::new(cap.output(), || "a: ".to_string());

        w.write(b"one\ntwo\n").await.unwrap();
        w.finish().await.unwrap();

        assert_eq!(cap.text(), "a: one\na: two\n");
    }

    #[tokio::test]
    async fn joins_lines_split_across_writes() {
        let cap = Capture::default();
        let mut w = PrefixWriter::new(cap.output(), || "b: ".to_string());

        w.write(b"hel").await.unwrap();
        assert_eq!(cap.text(), "");
        w.write(b"lo\nwor").await.unwrap();
        w.write(b"ld").await.unwrap();
        assert_eq!(cap.text(), "b: hello\n");

        w.finish().await.unwrap();
        assert_eq!(cap.text(), "b: hello\nb: world\n");
    }

    #[tokio::test]
    async fn empty_label_passes_lines_through() {
        let cap = Capture::default();
        let mut w = PrefixWriter::new(cap.output(), String::new);

        w.write(b"x\n\ny\n").await.unwrap();
        w.finish().await.unwrap();

        assert_eq!(cap.text(), "x\n\ny\n");
    }

    #[tokio::test]
    async fn concurrent_writers_never_split_lines() {
        let cap = Capture::default();
        let mut handles = Vec::new();
        for name in ["a", "b", "c"] {
            let out = cap.output();
            handles.push(tokio::spawn(async move {
                let label = format!("{name}: ");
                let mut w = PrefixWriter::new(out, move || label.clone());
                for i in 0..50 {
                    // Split each line in two chunks to force buffering.
                    w.write(format!("line-{i}").as_bytes()).await.unwrap();
                    tokio::task::yield_now().await;
                    w.write(b"-end\n").await.unwrap();
                }
                w.finish().await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let text = cap.text();
        assert_eq!(text.lines().count(), 150);
        for line in text.lines() {
            let (label, body) = line.split_once(": ").unwrap();
            assert!(["a", "b", "c"].contains(&label), "bad line {line:?}");
            assert!(body.starts_with("line-") && body.ends_with("-end"), "bad line {line:?}");
        }
        for name in ["a", "b", "c"] {
            let own: Vec<_> = text
                .lines()
                .filter(|l| l.starts_with(&format!("{name}: ")))
                .collect();
            for (i, l) in own.iter().enumerate() {
                assert_eq!(*l, format!("{name}: line-{i}-end"));
            }
        }
    }
}
