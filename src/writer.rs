//! Encoder side: writing frames to the response body.
//!
//! Three ways to produce a stream:
//! - [`encode_frames`] encodes a complete result list into one buffer
//! - [`FrameWriter`] writes frames directly to an `AsyncWrite`, one at a time
//! - [`spawn_writer_task`] runs a dedicated writer task fed through an mpsc
//!   channel, so a job can hand over each result as soon as it completes
//!
//! # Architecture
//!
//! ```text
//! Render step 1 ─┐
//! Render step 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Response body
//! Render step N ─┘
//! ```
//!
//! Frames are batched into vectored writes (header, payload and separator
//! slices per frame), and a pending counter applies backpressure to producers.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{BlobStreamError, Result};
use crate::protocol::{build_frame, validate_frame, validate_separator, Header, DEFAULT_SEPARATOR};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Encode an ordered list of `(media type, payload)` results into one stream.
///
/// Every frame, the last one included, is followed by `separator`.
///
/// # Example
///
/// ```
/// use blobstream::writer::encode_frames;
///
/// let bytes = encode_frames([("text/plain", b"a".as_slice())], b"--SEP--").unwrap();
/// assert_eq!(bytes, b"Content-Type: text/plain\r\n\r\na--SEP--");
/// ```
pub fn encode_frames<I, M, P>(results: I, separator: &[u8]) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (M, P)>,
    M: AsRef<str>,
    P: AsRef<[u8]>,
{
    validate_separator(separator)?;
    let mut out = Vec::new();
    for (media_type, payload) in results {
        out.extend(build_frame(
            &Header::new(media_type.as_ref()),
            payload.as_ref(),
            separator,
        )?);
    }
    Ok(out)
}

/// A validated frame ready to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header block (terminator included).
    pub header: Bytes,
    /// Payload bytes (may be empty).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Validate and pre-encode a frame for the given separator.
    pub fn new(media_type: &str, payload: Bytes, separator: &[u8]) -> Result<Self> {
        let header = Header::new(media_type);
        validate_frame(&header, &payload, separator)?;
        Ok(Self {
            header: Bytes::from(header.encode()),
            payload,
        })
    }

    /// Total size of this frame (header + payload + separator).
    #[inline]
    pub fn size(&self, separator: &[u8]) -> usize {
        self.header.len() + self.payload.len() + separator.len()
    }
}

/// Writes frames straight to an async writer, without a background task.
pub struct FrameWriter<W> {
    writer: W,
    separator: Bytes,
    frames_written: usize,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a frame writer using the default separator.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            separator: Bytes::from_static(DEFAULT_SEPARATOR.as_bytes()),
            frames_written: 0,
        }
    }

    /// Create a frame writer with a custom separator.
    pub fn with_separator(writer: W, separator: &[u8]) -> Result<Self> {
        validate_separator(separator)?;
        Ok(Self {
            writer,
            separator: Bytes::copy_from_slice(separator),
            frames_written: 0,
        })
    }

    /// Encode and write one frame, then flush.
    ///
    /// Invalid media types and payloads containing the separator are
    /// rejected before anything reaches the writer.
    pub async fn write_frame(&mut self, media_type: &str, payload: Bytes) -> Result<()> {
        let frame = OutboundFrame::new(media_type, payload, &self.separator)?;
        write_batch(&mut self.writer, std::slice::from_ref(&frame), &self.separator).await?;
        self.frames_written += 1;
        Ok(())
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Consume the frame writer and return the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Separator written after every frame.
    pub separator: Bytes,
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            separator: Bytes::from_static(DEFAULT_SEPARATOR.as_bytes()),
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across producer tasks.
/// The writer task shuts down once every handle is dropped.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::Sender<OutboundFrame>,
    /// Pending frame count (for backpressure).
    pending: Arc<AtomicUsize>,
    /// Maximum pending frames.
    max_pending: usize,
    /// Backpressure timeout.
    timeout: Duration,
    /// Separator used to validate payloads.
    separator: Bytes,
}

impl WriterHandle {
    /// Send a result to the writer task.
    ///
    /// Waits if backpressure is active, timing out after the configured duration.
    pub async fn send(&self, media_type: &str, payload: Bytes) -> Result<()> {
        let frame = OutboundFrame::new(media_type, payload, &self.separator)?;

        // Count before sending so the writer never decrements below zero.
        self.reserve().await?;

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            BlobStreamError::ConnectionClosed
        })
    }

    /// Try to send a result without waiting for backpressure.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, media_type: &str, payload: Bytes) -> Result<()> {
        let frame = OutboundFrame::new(media_type, payload, &self.separator)?;

        if !self.try_reserve() {
            return Err(BlobStreamError::BackpressureTimeout);
        }

        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => BlobStreamError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => BlobStreamError::ConnectionClosed,
            }
        })
    }

    /// Claim one pending slot if the count is below the limit.
    ///
    /// Check and increment happen in one atomic step, so concurrent senders
    /// never push the count past `max_pending`.
    fn try_reserve(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_pending).then_some(n + 1)
            })
            .is_ok()
    }

    /// Claim one pending slot, waiting for backpressure to clear.
    async fn reserve(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.try_reserve() {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(BlobStreamError::BackpressureTimeout);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// Returns a `(WriterHandle, JoinHandle)` pair; the JoinHandle resolves once
/// every handle is dropped and all queued frames are written.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> Result<(WriterHandle, JoinHandle<Result<()>>)>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    validate_separator(&config.separator)?;

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        max_pending: config.max_pending_frames,
        timeout: config.backpressure_timeout,
        separator: config.separator.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, writer, pending, config.separator));

    Ok((handle, task))
}

/// Main writer loop - receives frames and writes them in batches.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    separator: Bytes,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0usize;

    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        write_batch(&mut writer, &batch, &separator).await?;
        written += batch_size;

        pending.fetch_sub(batch_size, Ordering::Release);
    }

    debug!(frames = written, "writer channel closed, shutting down");
    writer.shutdown().await?;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame], separator: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size(separator)).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, separator, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(BlobStreamError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data remaining after `skip_bytes` were written.
fn build_remaining_slices<'a>(
    batch: &'a [OutboundFrame],
    separator: &'a [u8],
    skip_bytes: usize,
) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.payload[..], separator] {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                slices.push(IoSlice::new(&part[skip_bytes.saturating_sub(offset)..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    const SEP: &[u8] = b"--SEP--";

    fn config() -> WriterConfig {
        WriterConfig {
            separator: Bytes::from_static(SEP),
            ..WriterConfig::default()
        }
    }

    #[test]
    fn test_outbound_frame_creation() {
        let frame = OutboundFrame::new("image/png", Bytes::from_static(b"hello"), SEP).unwrap();

        assert_eq!(&frame.header[..], b"Content-Type: image/png\r\n\r\n");
        assert_eq!(frame.size(SEP), 27 + 5 + SEP.len());
    }

    #[test]
    fn test_outbound_frame_rejects_crlf_media_type() {
        let result = OutboundFrame::new("image/png\r\n\r\n", Bytes::new(), SEP);
        assert!(matches!(result, Err(BlobStreamError::InvalidMediaType(_))));
    }

    #[test]
    fn test_encode_frames_trailing_separator() {
        let bytes = encode_frames(
            [("image/png", b"A".as_slice()), ("text/plain", b"C".as_slice())],
            SEP,
        )
        .unwrap();

        assert_eq!(
            bytes,
            b"Content-Type: image/png\r\n\r\nA--SEP--Content-Type: text/plain\r\n\r\nC--SEP--"
        );
    }

    #[test]
    fn test_encode_frames_empty_list() {
        let bytes = encode_frames(Vec::<(&str, Vec<u8>)>::new(), SEP).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(&config.separator[..], DEFAULT_SEPARATOR.as_bytes());
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![OutboundFrame::new("a/b", Bytes::from_static(b"hello"), SEP).unwrap()];
        let slices = build_remaining_slices(&batch, SEP, 0);
        assert_eq!(slices.len(), 3);
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![OutboundFrame::new("a/b", Bytes::from_static(b"hello"), SEP).unwrap()];
        let header_len = batch[0].header.len();

        let slices = build_remaining_slices(&batch, SEP, 5);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0].len(), header_len - 5);
        assert_eq!(slices[1].len(), 5);
        assert_eq!(slices[2].len(), SEP.len());
    }

    #[test]
    fn test_build_remaining_slices_inside_separator() {
        let batch = vec![OutboundFrame::new("a/b", Bytes::from_static(b"hello"), SEP).unwrap()];
        let skip = batch[0].header.len() + 5 + 2;

        let slices = build_remaining_slices(&batch, SEP, skip);
        assert_eq!(slices.len(), 1);
        assert_eq!(&slices[0][..], b"SEP--");
    }

    #[test]
    fn test_build_remaining_slices_empty_payload() {
        let batch = vec![OutboundFrame::new("a/b", Bytes::new(), SEP).unwrap()];
        let slices = build_remaining_slices(&batch, SEP, 0);
        assert_eq!(slices.len(), 2);
    }

    #[tokio::test]
    async fn test_frame_writer_writes_frames() {
        let mut writer = FrameWriter::with_separator(Cursor::new(Vec::new()), SEP).unwrap();

        writer
            .write_frame("image/png", Bytes::from_static(b"A"))
            .await
            .unwrap();
        writer
            .write_frame("text/plain", Bytes::from_static(b"C"))
            .await
            .unwrap();

        assert_eq!(writer.frames_written(), 2);
        let written = writer.into_inner().into_inner();
        assert_eq!(
            written,
            encode_frames([("image/png", b"A"), ("text/plain", b"C")], SEP).unwrap()
        );
    }

    #[tokio::test]
    async fn test_frame_writer_rejects_separator_in_payload() {
        let mut writer = FrameWriter::with_separator(Cursor::new(Vec::new()), SEP).unwrap();

        let result = writer
            .write_frame("image/png", Bytes::from_static(b"xx--SEP--"))
            .await;

        assert!(matches!(
            result,
            Err(BlobStreamError::PayloadContainsSeparator { offset: 2 })
        ));
        assert!(writer.into_inner().into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_writer_task_streams_frames() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, config()).unwrap();

        for i in 0..10u32 {
            handle
                .send("image/png", Bytes::copy_from_slice(&i.to_be_bytes()))
                .await
                .unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();

        let expected: Vec<_> = (0..10u32)
            .map(|i| ("image/png", i.to_be_bytes().to_vec()))
            .collect();
        assert_eq!(received, encode_frames(expected, SEP).unwrap());
    }

    #[tokio::test]
    async fn test_writer_handle_pending_count() {
        let (client, _server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, config()).unwrap();

        assert_eq!(handle.pending_count(), 0);
        assert!(!handle.is_backpressure_active());
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let handle = WriterHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(100)),
            max_pending: 100,
            timeout: Duration::from_secs(1),
            separator: Bytes::from_static(SEP),
        };

        let result = handle.try_send("image/png", Bytes::new());
        assert!(matches!(result, Err(BlobStreamError::BackpressureTimeout)));
    }

    #[test]
    fn test_concurrent_try_send_never_exceeds_max_pending() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(100);
        let handle = WriterHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: 5,
            timeout: Duration::from_secs(1),
            separator: Bytes::from_static(SEP),
        };

        let accepted = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let handle = handle.clone();
                let accepted = &accepted;
                scope.spawn(move || {
                    for _ in 0..10 {
                        if handle.try_send("image/png", Bytes::new()).is_ok() {
                            accepted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(accepted.load(Ordering::Relaxed), 5);
        assert_eq!(handle.pending_count(), 5);
    }

    #[tokio::test]
    async fn test_send_times_out_at_max_pending() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(100);
        let handle = WriterHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: 2,
            timeout: Duration::from_millis(20),
            separator: Bytes::from_static(SEP),
        };

        handle.send("image/png", Bytes::new()).await.unwrap();
        handle.send("image/png", Bytes::new()).await.unwrap();
        let result = handle.send("image/png", Bytes::new()).await;

        assert!(matches!(result, Err(BlobStreamError::BackpressureTimeout)));
        assert_eq!(handle.pending_count(), 2);
        assert!(handle.is_backpressure_active());
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (tx, rx) = mpsc::channel::<OutboundFrame>(10);
        drop(rx);
        let handle = WriterHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: 100,
            timeout: Duration::from_secs(1),
            separator: Bytes::from_static(SEP),
        };

        let result = handle.send("image/png", Bytes::new()).await;
        assert!(matches!(result, Err(BlobStreamError::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, config()).unwrap();

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_spawn_rejects_invalid_separator() {
        let (client, _server) = duplex(64);
        let config = WriterConfig {
            separator: Bytes::new(),
            ..WriterConfig::default()
        };

        assert!(spawn_writer_task(client, config).is_err());
    }
}
