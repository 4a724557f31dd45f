//! Render Job - streaming results from a producer to a consumer.
//!
//! This demo shows:
//! - A simulated render job handing each image to the writer task as it completes
//! - The consumer decoding the response body incrementally
//! - A sink re-rendering from the full snapshot on every progress call
//!
//! Run with `RUST_LOG=debug cargo run --example render_job` to see decoder logs.

use std::time::Duration;

use blobstream::{
    spawn_writer_task, Blob, ResultAggregator, StreamConfig, StreamConsumer, StreamFailure,
    StreamSink,
};
use bytes::Bytes;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Sink that "renders" the gallery from the full list each time.
struct Gallery;

impl StreamSink for Gallery {
    fn on_progress(&mut self, results: &[Blob]) {
        let summary: Vec<_> = results
            .iter()
            .map(|b| format!("{} ({} bytes)", b.media_type(), b.len()))
            .collect();
        info!(count = results.len(), "gallery: [{}]", summary.join(", "));
    }

    fn on_complete(&mut self) {
        info!("job finished");
    }

    fn on_error(&mut self, failure: &StreamFailure, partial: &[Blob]) {
        error!(kept = partial.len(), "job failed: {}", failure);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = StreamConfig::from_json(r#"{ "separator": "--render-boundary--" }"#)?;

    // The duplex pipe stands in for the HTTP response body.
    let (body_writer, body_reader) = tokio::io::duplex(16 * 1024);
    let (handle, writer_task) = spawn_writer_task(body_writer, config.writer_config())?;

    let job = tokio::spawn(async move {
        for step in 0..4u8 {
            // Simulate rendering work
            tokio::time::sleep(Duration::from_millis(50)).await;
            let image = vec![step; 1024 * (step as usize + 1)];
            handle.send("image/png", Bytes::from(image)).await?;
        }
        handle
            .send("text/plain", Bytes::from_static(b"4 images rendered"))
            .await
    });

    let consumer = StreamConsumer::new(config)?;
    let mut aggregator = ResultAggregator::new(Gallery);
    let outcome = consumer
        .consume_response(200, body_reader, &mut aggregator)
        .await;

    job.await??;
    writer_task.await??;

    info!(?outcome, "stream closed");
    Ok(())
}
