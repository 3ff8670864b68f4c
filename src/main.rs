//! Demo collector
//!
//! Polls a few simulated sources until Ctrl+C, then writes the dataset to
//! `./data`. Set `MULTIRATE_FFMPEG` to point at an encoder binary.

use multirate_recorder::{
    cancel_on_interrupt, init_tracing, Payload, Session, SessionConfig, SourceKind,
    SourceRegistry, VideoConfig,
};
use std::path::PathBuf;
use std::time::Instant;

const FRAME_HEIGHT: u32 = 120;
const FRAME_WIDTH: u32 = 160;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("Starting multirate-recorder v{}", env!("CARGO_PKG_VERSION"));

    let origin = Instant::now();
    let mut registry = SourceRegistry::new();

    registry.register("joints", SourceKind::Sensor, 100.0, move || -> anyhow::Result<Payload> {
        let t = origin.elapsed().as_secs_f64();
        Ok(Payload::Vector(
            (0..7).map(|j| (t + j as f64 * 0.3).sin()).collect(),
        ))
    })?;

    registry.register("gripper", SourceKind::Control, 20.0, move || -> anyhow::Result<Payload> {
        let t = origin.elapsed().as_secs_f64();
        Ok(Payload::Scalar(if (t as u64) % 4 < 2 { 0.0 } else { 1.0 }))
    })?;

    let mut frame_index: u32 = 0;
    registry.register_default("front_cam", SourceKind::Image, move || -> anyhow::Result<Payload> {
        frame_index = frame_index.wrapping_add(1);
        let mut data = Vec::with_capacity((FRAME_HEIGHT * FRAME_WIDTH * 3) as usize);
        for y in 0..FRAME_HEIGHT {
            for x in 0..FRAME_WIDTH {
                data.push(((x + frame_index) % 256) as u8);
                data.push(((y + frame_index) % 256) as u8);
                data.push((frame_index % 256) as u8);
            }
        }
        Payload::image(FRAME_HEIGHT, FRAME_WIDTH, 3, data)
    })?;

    let video = match std::env::var_os("MULTIRATE_FFMPEG") {
        Some(binary) => VideoConfig {
            binary: PathBuf::from(binary),
            ..VideoConfig::default()
        },
        None => VideoConfig::default(),
    };
    let config = SessionConfig {
        dataset_name: "demo".to_string(),
        video,
        ..SessionConfig::new("data")
    };

    let session = Session::new(registry, config)?;
    cancel_on_interrupt(session.cancel_token());
    tracing::info!("Collecting, press Ctrl+C to stop");

    if let Some(report) = session.run_forever().await? {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
