//! The audio segment: the core non-destructive editing entity (§3, §4.8).

use std::sync::Arc;

use cw_core::SampleSource;
use cw_core::{equal_power_pan, pan_bipolar_to_unit};
use cw_dsp::read_interpolated_frame;
use cw_dsp::timestretch::WsolaStretcher;
use cw_dsp::{Analyzer, Modifier};
use parking_lot::Mutex;

use crate::error::{EngineError, EngineResult};

/// A segment's fade shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeCurve {
    Linear,
    /// `progress^2`.
    Logarithmic,
    /// `3·progress^2 − 2·progress^3`.
    SCurve,
}

impl FadeCurve {
    fn apply(self, progress: f32) -> f32 {
        let p = progress.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => p,
            FadeCurve::Logarithmic => p * p,
            FadeCurve::SCurve => 3.0 * p * p - 2.0 * p * p * p,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FadeSettings {
    pub duration_seconds: f64,
    pub curve: Option<FadeCurve>,
}

impl FadeSettings {
    pub fn none() -> Self {
        Self {
            duration_seconds: 0.0,
            curve: None,
        }
    }

    pub fn new(duration_seconds: f64, curve: FadeCurve) -> Self {
        Self {
            duration_seconds,
            curve: Some(curve),
        }
    }
}

/// How many times a segment's stretched instance repeats on the timeline.
#[derive(Debug, Clone, Copy)]
pub enum LoopSetting {
    /// Play `repetitions + 1` total passes (`0` = play once, no loop).
    Repetitions(u32),
    /// Loop (and truncate the final pass) to fill exactly this duration.
    TargetDuration(f64),
}

impl Default for LoopSetting {
    fn default() -> Self {
        LoopSetting::Repetitions(0)
    }
}

/// `factor` stretches duration by `factor` while preserving pitch; a set
/// `target_duration` instead derives the factor needed to hit that
/// duration exactly.
#[derive(Debug, Clone, Copy)]
pub enum TimeStretchSetting {
    Factor(f64),
    TargetDuration(f64),
}

impl Default for TimeStretchSetting {
    fn default() -> Self {
        TimeStretchSetting::Factor(1.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SegmentSettings {
    pub enabled: bool,
    pub gain: f32,
    pub pan: f32,
    pub fade_in: FadeSettings,
    pub fade_out: FadeSettings,
    pub loop_setting: LoopSetting,
    pub reversed: bool,
    pub speed: f64,
    pub time_stretch: TimeStretchSetting,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            gain: 1.0,
            pan: 0.0,
            fade_in: FadeSettings::none(),
            fade_out: FadeSettings::none(),
            loop_setting: LoopSetting::default(),
            reversed: false,
            speed: 1.0,
            time_stretch: TimeStretchSetting::default(),
        }
    }
}

const TIME_STRETCH_EPSILON: f64 = 1e-9;

struct ReversedCache {
    loop_pass: u64,
    frames: Vec<f32>,
}

/// The core editing entity: a region of a shared source, placed on a
/// track's timeline, with its own fades/gain/pan/loop/reverse/stretch
/// settings and modifier/analyzer chains.
pub struct Segment {
    source: Arc<Mutex<Box<dyn SampleSource>>>,
    /// Stable identity of `source`, for persistence collaborators (§4.9) —
    /// never consulted by rendering itself.
    source_guid: uuid::Uuid,
    source_start: u64,
    source_duration: u64,
    source_channels: u16,
    source_sample_rate: u32,
    /// Start of this segment's placement on its track's timeline, in
    /// nanoseconds. Only consulted by `Track`; `read_processed` takes its
    /// offset into the segment directly and does not read this field.
    pub timeline_start: u64,
    pub settings: SegmentSettings,
    modifiers: Vec<Box<dyn Modifier>>,
    analyzers: Vec<Box<dyn Analyzer>>,
    stretcher: Option<WsolaStretcher>,
    last_loop_pass: Option<u64>,
    reversed_cache: Option<ReversedCache>,
    /// Set on construction and by any structural or settings mutation;
    /// cleared by the persistence collaborator once a save has captured the
    /// current state (§3, §6).
    dirty: bool,
}

impl Segment {
    pub fn new(
        source: Arc<Mutex<Box<dyn SampleSource>>>,
        source_guid: uuid::Uuid,
        source_start: u64,
        source_duration: u64,
        timeline_start: u64,
    ) -> EngineResult<Self> {
        if source_duration == 0 {
            return Err(EngineError::NotReady("source_duration must be > 0".to_string()));
        }
        let (source_channels, source_sample_rate) = {
            let guard = source.lock();
            (guard.channels(), guard.sample_rate())
        };
        Ok(Self {
            source,
            source_guid,
            source_start,
            source_duration,
            source_channels,
            source_sample_rate,
            timeline_start,
            settings: SegmentSettings::default(),
            modifiers: Vec::new(),
            analyzers: Vec::new(),
            stretcher: None,
            last_loop_pass: None,
            reversed_cache: None,
            dirty: true,
        })
    }

    pub fn add_modifier(&mut self, modifier: Box<dyn Modifier>) {
        self.modifiers.push(modifier);
        self.dirty = true;
    }

    pub fn add_analyzer(&mut self, analyzer: Box<dyn Analyzer>) {
        self.analyzers.push(analyzer);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Mutable access to this segment's settings; any caller reaching for
    /// this is assumed to be about to change something, so the segment is
    /// marked dirty up front rather than trusting every call site to do it.
    pub fn settings_mut(&mut self) -> &mut SegmentSettings {
        self.dirty = true;
        &mut self.settings
    }

    pub fn source_guid(&self) -> uuid::Uuid {
        self.source_guid
    }

    pub fn source_start(&self) -> u64 {
        self.source_start
    }

    pub fn source_duration(&self) -> u64 {
        self.source_duration
    }

    fn time_stretch_factor(&self) -> f64 {
        match self.settings.time_stretch {
            TimeStretchSetting::Factor(f) => f,
            TimeStretchSetting::TargetDuration(target) => {
                let source_seconds = self.source_duration as f64 / self.source_sample_rate as f64;
                if source_seconds <= 0.0 {
                    1.0
                } else {
                    target / source_seconds
                }
            }
        }
    }

    /// `stretched_source_duration`, in seconds.
    pub fn stretched_source_duration(&self) -> f64 {
        let source_seconds = self.source_duration as f64 / self.source_sample_rate as f64;
        match self.settings.time_stretch {
            TimeStretchSetting::TargetDuration(target) => target,
            TimeStretchSetting::Factor(f) => source_seconds * f,
        }
    }

    /// `single_instance_timeline_duration`, in seconds.
    pub fn single_instance_timeline_duration(&self) -> f64 {
        self.stretched_source_duration() / self.settings.speed.max(TIME_STRETCH_EPSILON)
    }

    /// `total_looped_timeline_duration`, in seconds.
    pub fn total_looped_timeline_duration(&self) -> f64 {
        match self.settings.loop_setting {
            LoopSetting::TargetDuration(target) => target,
            LoopSetting::Repetitions(reps) => self.single_instance_timeline_duration() * (reps as f64 + 1.0),
        }
    }

    /// Renders `duration_to_read` seconds of this segment's fully processed
    /// output, starting at `segment_timeline_offset` seconds into the
    /// segment's own timeline placement, into `out` (interleaved,
    /// `target_ch` channels at `target_sr`). Step numbering follows §4.8.
    pub fn read_processed(
        &mut self,
        segment_timeline_offset: f64,
        duration_to_read: f64,
        out: &mut [f32],
        target_sr: u32,
        target_ch: u16,
    ) {
        // Step 1: early exits.
        if !self.settings.enabled || duration_to_read <= 0.0 || self.stretched_source_duration() <= 0.0 {
            out.fill(0.0);
            return;
        }

        let single_pass = self.single_instance_timeline_duration().max(TIME_STRETCH_EPSILON);

        // Step 2: which loop pass, and offset within it.
        let total_duration = self.total_looped_timeline_duration();
        if segment_timeline_offset >= total_duration {
            out.fill(0.0);
            return;
        }
        let loop_pass = (segment_timeline_offset / single_pass).floor() as u64;
        if let LoopSetting::Repetitions(reps) = self.settings.loop_setting {
            if loop_pass > reps as u64 {
                out.fill(0.0);
                return;
            }
        }
        let offset_within_pass = segment_timeline_offset - loop_pass as f64 * single_pass;

        // Step 3: reset on pass change.
        if self.last_loop_pass != Some(loop_pass) {
            if let Some(stretcher) = self.stretcher.as_mut() {
                stretcher.reset();
            }
            let source_frame = self.source_start + (offset_within_pass * self.source_sample_rate as f64 * self.settings.speed) as u64;
            self.source.lock().seek(source_frame.min(self.source_start + self.source_duration));
            self.last_loop_pass = Some(loop_pass);
        }

        // Step 4: stretched samples needed.
        let stretched_frames_needed = (duration_to_read
            * self.settings.speed
            * self.source_sample_rate as f64) as usize;
        let needed_samples = stretched_frames_needed * target_ch.max(1) as usize;

        // Step 5: fetch stretched (or raw/reversed) samples.
        let mut stretched = vec![0.0f32; needed_samples];
        let stretch_factor = self.time_stretch_factor();
        if (stretch_factor - 1.0).abs() > TIME_STRETCH_EPSILON {
            self.fetch_via_wsola(&mut stretched, target_ch);
        } else if self.settings.reversed {
            self.fetch_reversed(&mut stretched, target_ch, loop_pass, offset_within_pass);
        } else {
            self.fetch_raw(&mut stretched, target_ch, offset_within_pass);
        }

        // Step 6: resample to final output length.
        let channels = target_ch.max(1) as usize;
        let out_frames = out.len() / channels;
        let stretched_frames = stretched.len() / channels;
        let step = if out_frames > 0 {
            stretched_frames as f64 / out_frames as f64
        } else {
            1.0
        };
        let mut position = 0.0;
        for frame_idx in 0..out_frames {
            let out_frame = &mut out[frame_idx * channels..frame_idx * channels + channels];
            read_interpolated_frame(&stretched, channels, stretched_frames.max(1), position, out_frame);
            position += step;
        }

        // Step 7: per-frame modifier/analyzer/fade/gain/pan/clamp.
        let instance_duration = single_pass;
        for frame_idx in 0..out_frames {
            let frame = &mut out[frame_idx * channels..frame_idx * channels + channels];
            for modifier in self.modifiers.iter_mut() {
                modifier.process(frame, target_ch);
            }
            for analyzer in self.analyzers.iter_mut() {
                analyzer.analyze(frame, target_ch);
            }

            let time = offset_within_pass + frame_idx as f64 / out_frames.max(1) as f64 * duration_to_read;
            let fade_gain = self.fade_gain_at(time, instance_duration);

            let final_gain = self.settings.gain * fade_gain;
            apply_segment_gain_pan(frame, final_gain, self.settings.pan);

            for sample in frame.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }
    }

    fn fade_gain_at(&self, time: f64, instance_duration: f64) -> f32 {
        let mut gain = 1.0f32;
        if self.settings.fade_in.duration_seconds > 0.0 {
            if let Some(curve) = self.settings.fade_in.curve {
                let progress = (time / self.settings.fade_in.duration_seconds) as f32;
                if progress < 1.0 {
                    gain *= curve.apply(progress.max(0.0));
                }
            }
        }
        if self.settings.fade_out.duration_seconds > 0.0 {
            if let Some(curve) = self.settings.fade_out.curve {
                let fade_out_start = instance_duration - self.settings.fade_out.duration_seconds;
                if time >= fade_out_start {
                    let progress = ((time - fade_out_start) / self.settings.fade_out.duration_seconds) as f32;
                    gain *= 1.0 - curve.apply(progress.max(0.0).min(1.0));
                }
            }
        }
        gain
    }

    fn fetch_via_wsola(&mut self, out: &mut [f32], channels: u16) {
        if self.stretcher.is_none() {
            self.stretcher = WsolaStretcher::new(channels.max(1) as usize, self.settings.speed).ok();
        }
        let Some(stretcher) = self.stretcher.as_mut() else {
            out.fill(0.0);
            return;
        };
        let _ = stretcher.set_speed(self.settings.speed);

        let mut produced = Vec::new();
        let read_chunk = 4096usize.max(out.len());
        let mut raw = vec![0.0f32; read_chunk];
        let mut guard = self.source.lock();
        while produced.len() < out.len() {
            let read_n = guard.read(&mut raw);
            if read_n == 0 {
                let mut flushed = Vec::new();
                stretcher.flush(&mut flushed);
                if flushed.is_empty() {
                    break;
                }
                produced.extend_from_slice(&flushed);
                continue;
            }
            stretcher.process(&raw[..read_n], &mut produced);
        }
        drop(guard);

        let n = produced.len().min(out.len());
        out[..n].copy_from_slice(&produced[..n]);
        if n < out.len() {
            out[n..].fill(0.0);
        }
    }

    /// The frame offset into this loop pass's source region that
    /// `offset_within_pass` (seconds of timeline time elapsed since the
    /// pass started) corresponds to, mirroring the seek step3 performs on a
    /// pass change.
    fn frame_offset_within_pass(&self, offset_within_pass: f64) -> u64 {
        (offset_within_pass * self.source_sample_rate as f64 * self.settings.speed) as u64
    }

    fn fetch_raw(&mut self, out: &mut [f32], _channels: u16, offset_within_pass: f64) {
        let frame_offset = self.frame_offset_within_pass(offset_within_pass);
        let source_frame = (self.source_start + frame_offset).min(self.source_start + self.source_duration);
        let mut guard = self.source.lock();
        guard.seek(source_frame);
        let n = guard.read(out);
        if n < out.len() {
            out[n..].fill(0.0);
        }
    }

    /// Lazily builds (or reuses) a fully reversed cache of the current loop
    /// pass's source region, keyed by `loop_pass`; frame order is
    /// reversed, channels within a frame are untouched (§4.8 step 5). Each
    /// call starts copying from the cache at the frame corresponding to
    /// `offset_within_pass` rather than always from the start of the pass,
    /// so successive windows within the same pass advance instead of
    /// replaying its opening frames.
    fn fetch_reversed(&mut self, out: &mut [f32], channels: u16, loop_pass: u64, offset_within_pass: f64) {
        let channels = channels.max(1) as usize;
        let need_rebuild = match &self.reversed_cache {
            Some(cache) => cache.loop_pass != loop_pass,
            None => true,
        };
        if need_rebuild {
            let mut guard = self.source.lock();
            guard.seek(self.source_start);
            let mut frames = vec![0.0f32; self.source_duration as usize * channels];
            let n = guard.read(&mut frames);
            frames.truncate(n);
            drop(guard);

            let total_frames = frames.len() / channels;
            let mut reversed = vec![0.0f32; frames.len()];
            for i in 0..total_frames {
                let src = &frames[i * channels..i * channels + channels];
                let dst_idx = total_frames - 1 - i;
                reversed[dst_idx * channels..dst_idx * channels + channels].copy_from_slice(src);
            }
            self.reversed_cache = Some(ReversedCache {
                loop_pass,
                frames: reversed,
            });
        }

        if let Some(cache) = &self.reversed_cache {
            let frame_offset = self.frame_offset_within_pass(offset_within_pass) as usize;
            let start = (frame_offset * channels).min(cache.frames.len());
            let available = &cache.frames[start..];
            let n = available.len().min(out.len());
            out[..n].copy_from_slice(&available[..n]);
            if n < out.len() {
                out[n..].fill(0.0);
            }
        } else {
            out.fill(0.0);
        }
    }
}

fn apply_segment_gain_pan(frame: &mut [f32], gain: f32, pan_bipolar: f32) {
    match frame.len() {
        0 => {}
        1 => frame[0] *= gain,
        _ => {
            let pan_unit = pan_bipolar_to_unit(pan_bipolar);
            let (left_gain, right_gain) = equal_power_pan(gain, pan_unit);
            let other_gain = (left_gain + right_gain) * 0.5;
            frame[0] *= left_gain;
            frame[1] *= right_gain;
            for s in frame.iter_mut().skip(2) {
                *s *= other_gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_core::BufferSource;

    fn segment_with(data: Vec<f32>) -> Segment {
        let len = data.len() as u64;
        let source: Arc<Mutex<Box<dyn SampleSource>>> =
            Arc::new(Mutex::new(Box::new(BufferSource::new(data, 1, 48_000))));
        Segment::new(source, uuid::Uuid::new_v4(), 0, len, 0).unwrap()
    }

    #[test]
    fn disabled_segment_renders_silence() {
        let mut seg = segment_with(vec![1.0; 1000]);
        seg.settings.enabled = false;
        let mut out = vec![9.0f32; 100];
        seg.read_processed(0.0, 100.0 / 48_000.0, &mut out, 48_000, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn fade_curve_progress_is_monotonic() {
        for p in (0..=10).map(|i| i as f32 / 10.0) {
            let lin = FadeCurve::Linear.apply(p);
            let log = FadeCurve::Logarithmic.apply(p);
            let s = FadeCurve::SCurve.apply(p);
            assert!((0.0..=1.0).contains(&lin));
            assert!((0.0..=1.0).contains(&log));
            assert!((0.0..=1.0).contains(&s));
        }
        assert!(FadeCurve::Linear.apply(0.5) > FadeCurve::Logarithmic.apply(0.5));
    }

    #[test]
    fn repetitions_two_triples_total_duration() {
        let mut seg = segment_with(vec![0.0; 48_000]);
        seg.settings.loop_setting = LoopSetting::Repetitions(2);
        let single = seg.single_instance_timeline_duration();
        let total = seg.total_looped_timeline_duration();
        assert!((total - single * 3.0).abs() < 1e-9);
    }

    #[test]
    fn reversed_segment_plays_frames_back_to_front() {
        let mut seg = segment_with(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        seg.settings.reversed = true;
        let mut out = vec![0.0f32; 5];
        seg.read_processed(0.0, 5.0 / 48_000.0, &mut out, 48_000, 1);
        assert_eq!(out, vec![5.0, 4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn reversed_cache_is_rebuilt_on_loop_pass_change() {
        let mut seg = segment_with(vec![1.0, 2.0, 3.0]);
        seg.settings.reversed = true;
        seg.settings.loop_setting = LoopSetting::Repetitions(1);

        let mut first_pass = vec![0.0f32; 3];
        seg.read_processed(0.0, 3.0 / 48_000.0, &mut first_pass, 48_000, 1);
        assert_eq!(first_pass, vec![3.0, 2.0, 1.0]);

        let single = seg.single_instance_timeline_duration();
        let mut second_pass = vec![0.0f32; 3];
        seg.read_processed(single, 3.0 / 48_000.0, &mut second_pass, 48_000, 1);
        assert_eq!(second_pass, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn reversed_segment_advances_across_mid_pass_windows() {
        let mut seg = segment_with(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        seg.settings.reversed = true;

        let mut first_window = vec![0.0f32; 2];
        seg.read_processed(0.0, 2.0 / 48_000.0, &mut first_window, 48_000, 1);
        assert_eq!(first_window, vec![5.0, 4.0]);

        let mut second_window = vec![0.0f32; 3];
        seg.read_processed(2.0 / 48_000.0, 3.0 / 48_000.0, &mut second_window, 48_000, 1);
        assert_eq!(second_window, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn new_segment_starts_dirty_and_can_be_marked_clean() {
        let mut seg = segment_with(vec![0.0; 10]);
        assert!(seg.is_dirty());
        seg.mark_clean();
        assert!(!seg.is_dirty());
        seg.settings_mut().gain = 0.5;
        assert!(seg.is_dirty());
    }
}
