//! Plays a sequence directory without a renderer and prints what would be drawn.
//!
//! ```text
//! RUST_LOG=debug cargo run -p vizij-geostream-core --example headless_playback -- <dir> [buffer] [seconds]
//! ```

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use log::info;
use vizij_geostream::{FrameView, SequenceStreamer, StreamEvent, StreamerConfig};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(dir) = args.next() else {
        bail!("usage: headless_playback <sequence-dir> [buffer-size] [seconds]");
    };
    let buffer_size: usize = match args.next() {
        Some(s) => s.parse().context("buffer size must be an integer")?,
        None => StreamerConfig::default().buffer_size,
    };
    let seconds: f64 = match args.next() {
        Some(s) => s.parse().context("seconds must be a number")?,
        None => 5.0,
    };

    let config = StreamerConfig::default().with_buffer_size(buffer_size);
    let mut streamer = SequenceStreamer::open_with_config(&dir, config)
        .with_context(|| format!("failed to open sequence at {dir}"))?;
    info!(
        "{} frames of {}, {} bytes reserved",
        streamer.total_frames(),
        streamer.descriptor().geometry_kind.name(),
        streamer.metrics().memory_usage_bytes
    );

    let mut vertices_presented = 0u64;
    let mut present = |frame: &FrameView<'_>| {
        vertices_presented += frame.vertex_count;
    };

    let start = Instant::now();
    let mut last = start;
    while start.elapsed().as_secs_f64() < seconds {
        std::thread::sleep(Duration::from_millis(16));
        let now = Instant::now();
        let dt_ms = now.duration_since(last).as_secs_f64() * 1000.0;
        last = now;

        let report = streamer.tick_with(dt_ms, &mut present);
        for event in &report.events {
            match event {
                StreamEvent::FrameShown { .. } => {}
                other => info!("{other:?}"),
            }
        }
    }

    let metrics = streamer.metrics();
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    println!("vertices presented: {vertices_presented}");
    streamer.close();
    Ok(())
}
