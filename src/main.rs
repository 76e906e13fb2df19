use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{error, info};

use mirror_audio::audio::{AudioFrame, CodecParams, SampleFormat};
use mirror_audio::io::CpalBackend;
use mirror_audio::pipeline::FrameSink;
use mirror_audio::player::{AudioPlayer, PlayerConfig};

const SAMPLE_RATE: u32 = 48000;
const CHANNELS: u16 = 2;
const FRAME_SAMPLES: usize = 960;
const FRAME_DURATION: Duration = Duration::from_millis(20);
/// Frames arrive up to this late, like they would over a network.
const MAX_JITTER_MS: u64 = 15;
const PLAY_DURATION: Duration = Duration::from_secs(10);
const TONE_HZ: f32 = 440.0;

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run() {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => PlayerConfig::from_json_file(path)?,
        None => PlayerConfig::default(),
    };
    info!("Starting mirror-audio demo with {:?}", config);

    // The producer owns the player, like a decoder thread would
    let producer = std::thread::Builder::new()
        .name("audio-producer".to_string())
        .spawn(move || produce(config))
        .context("Failed to spawn producer thread")?;

    producer
        .join()
        .map_err(|_| anyhow::anyhow!("Producer thread panicked"))?
}

/// A 440 Hz tone, one frame at a time.
struct Tone {
    phase: f32,
}

impl Tone {
    fn next_frame(&mut self, pts: i64) -> AudioFrame {
        let step = TAU * TONE_HZ / SAMPLE_RATE as f32;
        let mut samples = Vec::with_capacity(FRAME_SAMPLES * CHANNELS as usize);
        for _ in 0..FRAME_SAMPLES {
            let value = 0.2 * self.phase.sin();
            samples.extend(std::iter::repeat_n(value, CHANNELS as usize));
            self.phase = (self.phase + step) % TAU;
        }
        AudioFrame::from_f32(Some(pts), samples)
    }
}

fn produce(config: PlayerConfig) -> Result<()> {
    let params = CodecParams::new(SAMPLE_RATE, CHANNELS, SampleFormat::F32);
    let mut player = AudioPlayer::new(CpalBackend::default(), config);
    player.open(&params).context("Failed to open audio player")?;

    let mut rng = rand::thread_rng();
    let mut tone = Tone { phase: 0.0 };
    let start = Instant::now();
    let mut last_report = start;
    let mut frame_index: u32 = 0;

    while start.elapsed() < PLAY_DURATION {
        // Nominal schedule plus a random delivery delay
        let due = start + FRAME_DURATION * frame_index;
        let jitter = Duration::from_millis(rng.gen_range(0..=MAX_JITTER_MS));
        if let Some(wait) = (due + jitter).checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }

        let pts = frame_index as i64 * FRAME_DURATION.as_micros() as i64;
        player.push(&tone.next_frame(pts));
        frame_index += 1;

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            if let Some(regulator) = player.regulator() {
                let stats = regulator.stats();
                info!(
                    "buffered={} avg={:.0} compensation={} underruns={} dropped={}",
                    stats.buffered(),
                    stats.average_buffering(),
                    stats.compensation(),
                    stats.underruns(),
                    stats.dropped_samples()
                );
            }
        }
    }

    player.close();
    info!("Played {} frames", frame_index);
    Ok(())
}
