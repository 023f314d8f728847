//! The sound player: a node that owns one sample source and drives it
//! through the time-stretch and resample pipeline (§4.5).

use std::sync::{Arc, Weak};

use cw_core::SampleSource;
use cw_dsp::read_interpolated_frame;
use cw_dsp::timestretch::WsolaStretcher;
use parking_lot::Mutex;

use crate::bufferpool::BufferPool;
use crate::error::{EngineError, EngineResult};
use crate::node::{Generator, Node};

/// How many source frames a single fill-stage read attempts to pull at
/// once. Not part of any invariant; a larger value means fewer, bigger
/// reads from the source.
const READ_CHUNK_FRAMES: usize = 1024;

/// A safety bound on how many times `generate` may loop back to
/// `loop_start_sample` within one callback, in case the loop window is
/// degenerate (e.g. zero-length).
const MAX_LOOP_RESTARTS_PER_CALLBACK: usize = 4;

/// The speed, within this tolerance of `1.0`, below which the WSOLA
/// stretcher is bypassed entirely and source samples are passed straight
/// through to the resample stage (SPEC_FULL §4.5 addition, needed for the
/// identity-at-unity-speed testable property in §8).
const UNITY_SPEED_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy)]
pub enum SeekOrigin {
    Begin,
    Current,
    End,
}

struct PlayerInner {
    source: Box<dyn SampleSource>,
    state: TransportState,
    speed: f64,
    loop_enabled: bool,
    loop_start: u64,
    loop_end: i64,
    stretcher: WsolaStretcher,
    resample_buffer: Vec<f32>,
    current_fractional_frame: f64,
    channels: u16,
    sample_rate: u32,
    /// Frames of the original source the stretcher has actually consumed so
    /// far, as opposed to `source.position()`, which advances the instant a
    /// chunk is read regardless of how much of it the stretcher has folded
    /// into output yet (§4.5). This is what `SoundPlayer::time` reports.
    raw_sample_position: u64,
    loop_restarts_this_callback: usize,
    ended_since_last_poll: bool,
}

impl PlayerInner {
    fn channels_usize(&self) -> usize {
        self.channels.max(1) as usize
    }

    fn reset_pipeline_state(&mut self) {
        self.stretcher.reset();
        self.resample_buffer.clear();
        self.current_fractional_frame = 0.0;
    }

    fn bypass_stretch(&self) -> bool {
        (self.speed - 1.0).abs() < UNITY_SPEED_EPSILON
    }

    fn resample_buffer_frames(&self) -> usize {
        self.resample_buffer.len() / self.channels_usize()
    }

    fn loop_end_frame(&self) -> u64 {
        if self.loop_end < 0 {
            self.source.length().unwrap_or(u64::MAX)
        } else {
            self.loop_end as u64
        }
    }

    /// Reads and, if active, stretches source audio until the resample
    /// buffer holds at least `needed_frames` frames or the source and
    /// stretcher are both exhausted. Returns `true` if exhausted (including
    /// having reached the loop window's end, when looping is enabled).
    fn fill_stage(&mut self, needed_frames: usize) -> bool {
        let channels = self.channels_usize();
        let mut raw = vec![0.0f32; READ_CHUNK_FRAMES * channels];

        while self.resample_buffer_frames() < needed_frames {
            if self.loop_enabled && self.source.position() >= self.loop_end_frame() {
                if !self.bypass_stretch() {
                    let mut flushed = Vec::new();
                    let stats = self.stretcher.flush(&mut flushed);
                    self.raw_sample_position += stats.samples_consumed_from_input as u64 / channels as u64;
                    self.resample_buffer.extend_from_slice(&flushed);
                }
                return true;
            }

            let read_n = self.source.read(&mut raw);
            if read_n == 0 {
                if !self.bypass_stretch() {
                    let mut flushed = Vec::new();
                    let stats = self.stretcher.flush(&mut flushed);
                    self.raw_sample_position += stats.samples_consumed_from_input as u64 / channels as u64;
                    self.resample_buffer.extend_from_slice(&flushed);
                    if flushed.is_empty() {
                        return true;
                    }
                } else {
                    return true;
                }
                continue;
            }

            if self.bypass_stretch() {
                self.resample_buffer.extend_from_slice(&raw[..read_n]);
                self.raw_sample_position += (read_n / channels) as u64;
            } else {
                let mut produced = Vec::new();
                let stats = self.stretcher.process(&raw[..read_n], &mut produced);
                self.raw_sample_position += stats.samples_consumed_from_input as u64 / channels as u64;
                self.resample_buffer.extend_from_slice(&produced);
            }
        }
        false
    }

    /// Writes one interpolated output frame and advances the fractional
    /// read position by one output frame (the stretcher already encodes
    /// speed into its output sample density, so the resample step here is
    /// always unity-rate with respect to the stretched stream).
    fn resample_one_frame(&mut self, out_frame: &mut [f32]) -> bool {
        let channels = self.channels_usize();
        let total_frames = self.resample_buffer_frames();
        if total_frames < 2 {
            return false;
        }
        read_interpolated_frame(
            &self.resample_buffer,
            channels,
            total_frames,
            self.current_fractional_frame,
            out_frame,
        );
        self.current_fractional_frame += 1.0;

        let consumed_frames = self.current_fractional_frame.floor() as usize;
        if consumed_frames > 0 {
            let consumed_samples = consumed_frames * channels;
            if consumed_samples <= self.resample_buffer.len() {
                self.resample_buffer.drain(0..consumed_samples);
                self.current_fractional_frame -= consumed_frames as f64;
            }
        }
        true
    }
}

struct PlayerGenerator {
    inner: Arc<Mutex<PlayerInner>>,
    self_node: Weak<Node>,
}

impl Generator for PlayerGenerator {
    fn generate(&mut self, buffer: &mut [f32], channels: u16, _sample_rate: u32) {
        let mut inner = self.inner.lock();
        if inner.state != TransportState::Playing {
            return;
        }
        let channels = channels.max(1) as usize;
        let frame_count = buffer.len() / channels;

        let mut frame_idx = 0;
        inner.loop_restarts_this_callback = 0;

        'frames: while frame_idx < frame_count {
            let exhausted = inner.fill_stage(2);
            if inner.resample_buffer_frames() >= 2 {
                let out_frame = &mut buffer[frame_idx * channels..frame_idx * channels + channels];
                inner.resample_one_frame(out_frame);
                frame_idx += 1;
                continue;
            }

            if exhausted {
                if inner.loop_enabled && inner.loop_restarts_this_callback < MAX_LOOP_RESTARTS_PER_CALLBACK {
                    inner.loop_restarts_this_callback += 1;
                    let loop_start = inner.loop_start;
                    inner.source.seek(loop_start);
                    inner.reset_pipeline_state();
                    inner.raw_sample_position = loop_start;
                    continue 'frames;
                }

                inner.state = TransportState::Stopped;
                inner.ended_since_last_poll = true;
                if let Some(node) = self.self_node.upgrade() {
                    node.set_enabled(false);
                }
                for sample in &mut buffer[frame_idx * channels..] {
                    *sample = 0.0;
                }
                break;
            }
        }
    }

    fn reset(&mut self) {
        let mut inner = self.inner.lock();
        inner.source.seek(0);
        inner.reset_pipeline_state();
    }
}

/// A node that plays back one sample source through the time-stretch and
/// resample pipeline, with transport controls (§4.5).
pub struct SoundPlayer {
    node: Arc<Node>,
    inner: Arc<Mutex<PlayerInner>>,
}

impl SoundPlayer {
    /// Builds a sound-player node and returns both the `Arc<Node>` (to
    /// attach it to a mixer like any other node) and the control handle
    /// used to drive transport, looping, and speed.
    pub fn new(source: Box<dyn SampleSource>, pool: BufferPool) -> EngineResult<(Arc<Node>, SoundPlayer)> {
        let channels = source.channels();
        let sample_rate = source.sample_rate();
        let stretcher = WsolaStretcher::new(channels.max(1) as usize, 1.0)?;

        let inner = Arc::new(Mutex::new(PlayerInner {
            source,
            state: TransportState::Stopped,
            speed: 1.0,
            loop_enabled: false,
            loop_start: 0,
            loop_end: -1,
            stretcher,
            resample_buffer: Vec::new(),
            current_fractional_frame: 0.0,
            channels,
            sample_rate,
            raw_sample_position: 0,
            loop_restarts_this_callback: 0,
            ended_since_last_poll: false,
        }));

        let node = Node::new_cyclic(channels, sample_rate, pool, |weak_self| {
            Box::new(PlayerGenerator {
                inner: inner.clone(),
                self_node: weak_self,
            })
        });
        node.set_enabled(false);

        Ok((
            node.clone(),
            SoundPlayer {
                node,
                inner,
            },
        ))
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn play(&self) {
        let mut inner = self.inner.lock();
        inner.state = TransportState::Playing;
        drop(inner);
        self.node.set_enabled(true);
    }

    pub fn pause(&self) {
        self.inner.lock().state = TransportState::Paused;
        self.node.set_enabled(false);
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.state = TransportState::Stopped;
        inner.source.seek(0);
        inner.reset_pipeline_state();
        inner.raw_sample_position = 0;
        drop(inner);
        self.node.set_enabled(false);
    }

    pub fn state(&self) -> TransportState {
        self.inner.lock().state
    }

    /// Drains and returns whether a `playback_ended` event has fired since
    /// the last call.
    pub fn poll_playback_ended(&self) -> bool {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.ended_since_last_poll, false)
    }

    pub fn seek(&self, frame_offset: i64, origin: SeekOrigin) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        let length = inner.source.length().unwrap_or(u64::MAX) as i64;
        let base = match origin {
            SeekOrigin::Begin => 0,
            SeekOrigin::Current => inner.source.position() as i64,
            SeekOrigin::End => length,
        };
        let target = (base + frame_offset).clamp(0, (length - 1).max(0));

        if !inner.source.seek(target as u64) {
            return Err(EngineError::NotReady("source is not seekable".to_string()));
        }
        inner.reset_pipeline_state();
        inner.raw_sample_position = target as u64;
        Ok(())
    }

    pub fn set_loop_points(&self, start: u64, end: i64) -> EngineResult<()> {
        if end >= 0 && (end as u64) < start {
            return Err(EngineError::InvalidLoopPoints {
                start: start as i64,
                end,
            });
        }
        let mut inner = self.inner.lock();
        inner.loop_start = start;
        inner.loop_end = end;
        Ok(())
    }

    pub fn set_looping(&self, looping: bool) {
        self.inner.lock().loop_enabled = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.inner.lock().loop_enabled
    }

    pub fn set_playback_speed(&self, speed: f64) -> EngineResult<()> {
        if speed <= 0.0 {
            return Err(EngineError::Dsp(cw_dsp::DspError::NonPositiveStretchFactor(speed)));
        }
        let mut inner = self.inner.lock();
        inner.speed = speed;
        inner.stretcher.set_speed(speed)?;
        Ok(())
    }

    /// Current playback position in seconds, derived from the number of
    /// original source frames the stretcher has actually consumed (§6).
    pub fn time(&self) -> f64 {
        let inner = self.inner.lock();
        inner.raw_sample_position as f64 / inner.sample_rate.max(1) as f64
    }

    /// Total duration of the underlying source in seconds, or `f64::INFINITY`
    /// for an unbounded source.
    pub fn duration(&self) -> f64 {
        let inner = self.inner.lock();
        match inner.source.length() {
            Some(frames) => frames as f64 / inner.sample_rate.max(1) as f64,
            None => f64::INFINITY,
        }
    }

    pub fn playback_speed(&self) -> f64 {
        self.inner.lock().speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_core::SilenceSource;

    #[test]
    fn stopped_player_produces_no_output() {
        let pool = BufferPool::new();
        let source = Box::new(SilenceSource::fixed(1, 48_000, 10_000));
        let (node, _player) = SoundPlayer::new(source, pool).unwrap();
        let mut out = vec![1.0_f32; 64];
        node.process(&mut out);
        assert_eq!(out, vec![1.0; 64]);
    }

    #[test]
    fn playing_silence_source_yields_silence_and_eventually_ends() {
        let pool = BufferPool::new();
        let source = Box::new(SilenceSource::fixed(1, 48_000, 512));
        let (node, player) = SoundPlayer::new(source, pool).unwrap();
        player.play();

        let mut saw_end = false;
        for _ in 0..20 {
            let mut out = vec![0.0_f32; 256];
            node.process(&mut out);
            assert!(out.iter().all(|&s| s == 0.0));
            if player.poll_playback_ended() {
                saw_end = true;
                break;
            }
        }
        assert!(saw_end);
        assert_eq!(player.state(), TransportState::Stopped);
    }

    #[test]
    fn rejects_non_positive_speed() {
        let pool = BufferPool::new();
        let source = Box::new(SilenceSource::fixed(1, 48_000, 1000));
        let (_node, player) = SoundPlayer::new(source, pool).unwrap();
        assert!(player.set_playback_speed(0.0).is_err());
    }

    /// Mirrors the "silent graph" end-to-end scenario: a 1-second source at
    /// 48 kHz, played to completion at unity speed, reports `time` ≈ 1.0.
    #[test]
    fn time_and_duration_track_playback_at_unity_speed() {
        let pool = BufferPool::new();
        let source = Box::new(SilenceSource::fixed(1, 48_000, 48_000));
        let (node, player) = SoundPlayer::new(source, pool).unwrap();

        assert_eq!(player.playback_speed(), 1.0);
        assert!((player.duration() - 1.0).abs() < 1e-9);
        assert_eq!(player.time(), 0.0);

        player.play();
        let mut saw_end = false;
        for _ in 0..400 {
            let mut out = vec![0.0_f32; 256];
            node.process(&mut out);
            if player.poll_playback_ended() {
                saw_end = true;
                break;
            }
        }
        assert!(saw_end);
        assert!((player.time() - 1.0).abs() < 1e-3, "time was {}", player.time());
    }

    #[test]
    fn seek_and_stop_realign_reported_time() {
        let pool = BufferPool::new();
        let source = Box::new(SilenceSource::fixed(1, 48_000, 48_000));
        let (_node, player) = SoundPlayer::new(source, pool).unwrap();

        player.seek(24_000, SeekOrigin::Begin).unwrap();
        assert!((player.time() - 0.5).abs() < 1e-9);

        player.stop();
        assert_eq!(player.time(), 0.0);
    }
}
