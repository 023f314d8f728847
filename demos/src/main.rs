//! A minimal reference player: generates a sine tone into an in-memory
//! source, wires it through one `SoundPlayer` node into the master mixer,
//! and drives that graph with the reference `cpal` backend (§4.7, §4.7.1).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cw_audio::{AudioBackend, AudioEngine, Capability, CpalBackend};
use cw_core::{BufferSource, SampleFormat};
use cw_engine::SoundPlayer;

#[derive(Parser, Debug)]
#[command(about = "Plays a generated sine tone through the reference cpal backend")]
struct Args {
    /// Tone frequency in Hz.
    #[arg(long, default_value_t = 440.0)]
    frequency_hz: f32,

    /// How long to play, in seconds.
    #[arg(long, default_value_t = 3.0)]
    duration_secs: f64,

    /// Linear gain applied to the tone, 0.0-1.0.
    #[arg(long, default_value_t = 0.25)]
    gain: f32,

    /// Preferred device sample rate; falls back to the device default.
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,

    /// Device callback buffer size, in frames.
    #[arg(long, default_value_t = 512)]
    buffer_frames: u32,
}

fn sine_tone(frequency_hz: f32, duration_secs: f64, channels: u16, sample_rate: u32) -> Vec<f32> {
    let frame_count = (duration_secs * sample_rate as f64) as usize;
    let channels = channels.max(1) as usize;
    let mut data = vec![0.0f32; frame_count * channels];
    let angular_step = std::f32::consts::TAU * frequency_hz / sample_rate as f32;

    for (frame_idx, frame) in data.chunks_mut(channels).enumerate() {
        let sample = (angular_step * frame_idx as f32).sin();
        for s in frame.iter_mut() {
            *s = sample;
        }
    }
    data
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let backend = CpalBackend::new(args.sample_rate, args.buffer_frames)?;
    let sample_rate = backend.sample_rate();
    let channels = backend.channels();
    log::info!("negotiated device stream: {sample_rate} Hz, {channels} channel(s)");

    let engine = Arc::new(AudioEngine::new(sample_rate, channels, SampleFormat::F32));

    let tone = sine_tone(args.frequency_hz, args.duration_secs, channels, sample_rate);
    let frame_count = tone.len() / channels.max(1) as usize;
    let source = Box::new(BufferSource::new(tone, channels, sample_rate));
    let (player_node, player) = SoundPlayer::new(source, engine.pool().clone())?;
    player_node.set_gain_pan(args.gain, 0.5);
    engine.master().connect_input(&player_node)?;

    let ended = Arc::new(AtomicBool::new(false));
    let ended_for_listener = ended.clone();
    engine.on_audio_processed(move |_samples, capability| {
        if capability == Capability::Playback {
            // the listener only observes; transport end is polled below.
            let _ = &ended_for_listener;
        }
    });

    let mut backend = backend;
    let engine_for_callback = engine.clone();
    backend.start(Box::new(move |data, info| {
        let byte_len = data.len() * std::mem::size_of::<f32>();
        let mut out_bytes = vec![0u8; byte_len];
        engine_for_callback.process_graph(&mut out_bytes, data.len() / info.channels.max(1) as usize);
        for (dst, chunk) in data.iter_mut().zip(out_bytes.chunks_exact(4)) {
            *dst = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }))?;

    player.play();
    log::info!("playing {} Hz tone for {:.2}s ({frame_count} frames)", args.frequency_hz, args.duration_secs);

    while !player.poll_playback_ended() {
        std::thread::sleep(Duration::from_millis(20));
    }
    ended.store(true, Ordering::Relaxed);

    backend.stop()?;
    Ok(())
}
