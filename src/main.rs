use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, reload};

use beacon_call::voice::{
    self, CaptureDevice, MicCapture, PlaybackBuffer, PlaybackDevice, SpeakerOutput,
};
use beacon_call::{Config, Daemon, DaemonBuilder, EventKind, RealtimeConnector};

/// Beacon Call - hands-free voice calls with a realtime AI model
#[derive(Parser)]
#[command(name = "beacon-call", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/omni/beacon-call/config.toml)
    #[arg(short, long, env = "BEACON_CALL_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// List audio input and output devices
    Devices,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let base = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let (filter, handle) = reload::Layer::new(log_filter(&base, cli.verbose));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli, &handle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Build the log filter; `RUST_LOG` wins over the configured level
fn log_filter(base: &str, verbose: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let directives = match verbose {
        0 => base.to_string(),
        1 => format!("{base},beacon_call=debug"),
        2 => format!("{base},beacon_call=trace"),
        _ => "trace".to_string(),
    };
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli, log: &FilterHandle) -> anyhow::Result<()> {
    if let Some(Command::Devices) = cli.command {
        return list_devices();
    }

    let config = Config::load(cli.config.as_deref())?;
    if let Err(e) = log.reload(log_filter(&config.log_level, cli.verbose)) {
        tracing::warn!(error = %e, "failed to apply configured log level");
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Some(Command::TestMic { duration }) => return test_mic(&config, duration).await,
        Some(Command::TestSpeaker) => return test_speaker(&config).await,
        Some(Command::Devices) | None => {}
    }

    config.require_api_key()?;

    tracing::info!(
        wake_phrase = %config.wake.wake_phrase,
        exit_phrase = %config.wake.exit_phrase,
        model = %config.realtime.model,
        sample_rate = config.audio.format.sample_rate,
        "starting beacon call"
    );

    let format = config.audio.format;
    let builder = Daemon::builder()
        .capture(MicCapture::new(format, config.audio.mic_device.clone()))
        .playback(SpeakerOutput::new(format, config.audio.speaker_device.clone()))
        .connector(RealtimeConnector::new(
            config.realtime.clone(),
            format.sample_rate,
        ))
        .policy(config.wake.policy());
    let mut daemon = with_recognizer(builder, &config).build()?;

    // Ctrl-C asks the daemon to stop through its own event queue
    let events = daemon.event_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Shutting down...");
            events.post_kind(EventKind::AppStop);
        }
    });

    daemon.run().await?;
    Ok(())
}

#[cfg(feature = "vosk")]
fn with_recognizer(builder: DaemonBuilder, config: &Config) -> DaemonBuilder {
    builder.recognizer(voice::VoskLoader::new(
        config.wake.model_path.clone(),
        config.audio.format.sample_rate,
    ))
}

#[cfg(not(feature = "vosk"))]
fn with_recognizer(builder: DaemonBuilder, config: &Config) -> DaemonBuilder {
    tracing::warn!(
        model_path = %config.wake.model_path.display(),
        "built without the `vosk` feature; wake phrase detection disabled"
    );
    builder.recognizer(voice::UnavailableRecognizer)
}

/// Print audio devices with their indices
fn list_devices() -> anyhow::Result<()> {
    let listing = voice::list_devices()?;

    println!("Input devices:");
    for (i, name) in listing.inputs.iter().enumerate() {
        println!("  [{i}] {name}");
    }
    println!("\nOutput devices:");
    for (i, name) in listing.outputs.iter().enumerate() {
        println!("  [{i}] {name}");
    }
    println!("\nSet MIC_DEVICE_INDEX / SPK_DEVICE_INDEX to an index or part of a name.");

    Ok(())
}

/// Running level statistics for the mic meter
#[derive(Default)]
struct Levels {
    sum_squares: f64,
    samples: usize,
    peak: i16,
}

/// Test microphone input with a level meter
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let format = config.audio.format;
    let levels = Arc::new(Mutex::new(Levels::default()));
    let sink = Arc::clone(&levels);

    let mut capture = MicCapture::new(format, config.audio.mic_device.clone());
    capture.start(Box::new(move |chunk| {
        if let Ok(mut levels) = sink.lock() {
            for sample in voice::pcm_to_samples(&chunk) {
                levels.sum_squares += f64::from(sample) * f64::from(sample);
                levels.samples += 1;
                levels.peak = levels.peak.max(sample.saturating_abs());
            }
        }
    }))?;

    println!("Device: {}", config.audio.mic_device);
    println!("Sample rate: {} Hz", format.sample_rate);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let (rms, peak) = levels.lock().map_or((0.0, 0.0), |mut levels| {
            let stats = std::mem::take(&mut *levels);
            #[allow(clippy::cast_precision_loss)]
            let rms = if stats.samples == 0 {
                0.0
            } else {
                (stats.sum_squares / stats.samples as f64).sqrt() / 32768.0
            };
            (rms, f64::from(stats.peak) / 32768.0)
        });

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (rms * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {rms:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, run `beacon-call devices` and set MIC_DEVICE_INDEX.");

    Ok(())
}

/// Test speaker output with a tone played through the playback buffer
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    const FREQUENCY: f32 = 440.0;
    const SECONDS: u32 = 2;

    println!("Testing speaker output...");
    println!("You should hear a {FREQUENCY}Hz tone for {SECONDS} seconds\n");

    let format = config.audio.format;
    let channels = usize::from(format.channels);
    let buffer = Arc::new(PlaybackBuffer::new(
        (SECONDS * 1000 / format.chunk_ms.max(1)) as usize + 1,
    ));

    let total_frames = (format.sample_rate * SECONDS) as usize;
    let chunk_frames = format.chunk_frames().max(1);
    for start in (0..total_frames).step_by(chunk_frames) {
        let end = (start + chunk_frames).min(total_frames);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let samples: Vec<i16> = (start..end)
            .flat_map(|i| {
                let t = i as f32 / format.sample_rate as f32;
                // 30% volume
                let s = ((2.0 * std::f32::consts::PI * FREQUENCY * t).sin() * 0.3 * 32767.0) as i16;
                std::iter::repeat_n(s, channels)
            })
            .collect();
        buffer.enqueue(voice::samples_to_pcm(&samples));
    }

    let mut speaker = SpeakerOutput::new(format, config.audio.speaker_device.clone());
    speaker.start(Arc::clone(&buffer))?;

    while !buffer.is_empty() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    // Let the device drain its own buffer
    tokio::time::sleep(Duration::from_millis(300)).await;
    speaker.stop();

    println!("Did you hear the tone?");
    Ok(())
}
