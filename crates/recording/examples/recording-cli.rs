//! Records the synthetic display and microphone into a session bundle.
//!
//! ```sh
//! cargo run --example recording-cli -- --duration-secs 3 --system-audio
//! ```

use clap::Parser;
use reel_recording::{
    MicrophoneOptions, RecorderHandle, RecordingPlan, SchemeItem, ScreenOptions,
};
use std::{path::PathBuf, time::Duration};

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "3")]
    duration_secs: u64,
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    hevc: bool,
    #[arg(long)]
    system_audio: bool,
    #[arg(long)]
    microphone: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let output = args
        .output
        .unwrap_or_else(|| std::env::temp_dir().join("reel-recordings"));
    std::fs::create_dir_all(&output)?;

    let mut items = vec![SchemeItem::Display {
        display_id: 0,
        crop: None,
        hdr: false,
        capture_system_audio: args.system_audio,
        filename: "display.mov".into(),
        options: ScreenOptions {
            use_hevc: args.hevc,
            ..Default::default()
        },
        excluded_window_titles: vec![],
    }];

    if args.microphone {
        items.push(SchemeItem::Microphone {
            microphone_id: "default".into(),
            filename: "microphone.m4a".into(),
            options: MicrophoneOptions::default(),
        });
    }

    let recorder = RecorderHandle::builder(RecordingPlan::new(items), output)
        .with_on_interrupt(|err| eprintln!("recording interrupted: {err}"))
        .spawn();

    recorder.prepare().await?;
    recorder.start().await?;

    println!("recording for {}s...", args.duration_secs);
    tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;

    let result = recorder.stop_with_result().await?;

    println!("bundle: {}", result.bundle_dir.display());
    for file in &result.bundle.files {
        println!(
            "  {} ({:?}, codec {})",
            file.filename,
            file.file_type,
            file.codec.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}
