//! The composition: the top-level non-destructive editing document, owning
//! an ordered set of tracks and the composition-wide modifier/analyzer/gain
//! chain applied after the track mixdown (§3, §4.8).

use cw_core::SampleFormat;
use cw_core::SampleSource;
use cw_dsp::{Analyzer, Modifier};

use crate::error::{EngineError, EngineResult};
use crate::track::Track;

pub struct Composition {
    pub name: String,
    pub master_gain: f32,
    pub sample_rate: u32,
    pub channels: u16,
    tracks: Vec<Track>,
    modifiers: Vec<Box<dyn Modifier>>,
    analyzers: Vec<Box<dyn Analyzer>>,
    /// Set on construction and by any structural mutation; cleared by the
    /// persistence collaborator once a save has captured the current state
    /// (§3, §6).
    dirty: bool,
    /// Read cursor used when the composition itself is driven as a
    /// `SampleSource`, e.g. handed to a `SoundPlayer` (§4.8, §6).
    playback_cursor_frames: u64,
}

impl Composition {
    pub fn new(name: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            name: name.into(),
            master_gain: 1.0,
            sample_rate,
            channels,
            tracks: Vec::new(),
            modifiers: Vec::new(),
            analyzers: Vec::new(),
            dirty: true,
            playback_cursor_frames: 0,
        }
    }

    pub fn add_modifier(&mut self, modifier: Box<dyn Modifier>) {
        self.modifiers.push(modifier);
        self.dirty = true;
    }

    pub fn add_analyzer(&mut self, analyzer: Box<dyn Analyzer>) {
        self.analyzers.push(analyzer);
        self.dirty = true;
    }

    pub fn add_track(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.dirty = true;
        self.tracks.len() - 1
    }

    pub fn remove_track(&mut self, index: usize) -> EngineResult<Track> {
        if index >= self.tracks.len() {
            return Err(EngineError::UnknownId(format!("track index {index}")));
        }
        self.dirty = true;
        Ok(self.tracks.remove(index))
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_mut(&mut self, index: usize) -> EngineResult<&mut Track> {
        self.dirty = true;
        self.tracks
            .get_mut(index)
            .ok_or_else(|| EngineError::UnknownId(format!("track index {index}")))
    }

    /// Dirty if the composition's own settings changed, or any of its
    /// tracks (or their segments) did.
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.tracks.iter().any(Track::is_dirty)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clears the dirty flag across the composition, its tracks, and their
    /// segments. Called by a persistence collaborator once it has
    /// successfully captured the current state.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
        for track in self.tracks.iter_mut() {
            track.mark_clean();
        }
    }

    /// The composition's total timeline extent, in seconds: the end of its
    /// furthest-reaching track (§6).
    pub fn calculate_total_duration(&self) -> f64 {
        self.tracks.iter().map(Track::duration_seconds).fold(0.0, f64::max)
    }

    /// Equivalent to `calculate_total_duration`.
    pub fn duration_seconds(&self) -> f64 {
        self.calculate_total_duration()
    }

    /// Renders `[timeline_offset_seconds, timeline_offset_seconds +
    /// duration_seconds)` of the full composition mixdown into `out`
    /// (interleaved, `self.channels` channels at `self.sample_rate`).
    pub fn render(&mut self, timeline_offset_seconds: f64, duration_seconds: f64, out: &mut [f32]) {
        out.fill(0.0);
        let any_soloed = self.tracks.iter().any(|t| t.soloed);
        let channels = self.channels.max(1) as usize;
        let mut scratch = vec![0.0f32; out.len()];

        for track in self.tracks.iter_mut() {
            track.render(
                timeline_offset_seconds,
                duration_seconds,
                &mut scratch,
                self.sample_rate,
                self.channels,
                any_soloed,
            );
            for (dst, src) in out.iter_mut().zip(scratch.iter()) {
                *dst += *src;
            }
        }

        for frame in out.chunks_mut(channels) {
            for modifier in self.modifiers.iter_mut() {
                modifier.process(frame, self.channels);
            }
        }
        for analyzer in self.analyzers.iter_mut() {
            analyzer.analyze(out, self.channels);
        }

        for sample in out.iter_mut() {
            *sample = (*sample * self.master_gain).clamp(-1.0, 1.0);
        }
    }
}

/// The composition implements the sample-source interface so it can drive a
/// sound player like any other source (§4.8, §6): `read` renders the next
/// span of the mixdown at the current cursor and advances it by
/// `buffer.len() / (channels * sample_rate)` seconds.
impl SampleSource for Composition {
    fn read(&mut self, buffer: &mut [f32]) -> usize {
        let channels = self.channels.max(1) as usize;
        if buffer.len() < channels {
            return 0;
        }

        let requested_frames = (buffer.len() / channels) as u64;
        let available_frames = match self.length() {
            Some(total) => total.saturating_sub(self.playback_cursor_frames).min(requested_frames),
            None => requested_frames,
        };
        if available_frames == 0 {
            return 0;
        }

        let sample_rate = self.sample_rate.max(1) as f64;
        let timeline_offset_seconds = self.playback_cursor_frames as f64 / sample_rate;
        let duration_seconds = available_frames as f64 / sample_rate;
        let written_samples = available_frames as usize * channels;

        self.render(timeline_offset_seconds, duration_seconds, &mut buffer[..written_samples]);
        self.playback_cursor_frames += available_frames;
        written_samples
    }

    fn seek(&mut self, frame_position: u64) -> bool {
        if let Some(total) = self.length() {
            if frame_position > total {
                return false;
            }
        }
        self.playback_cursor_frames = frame_position;
        true
    }

    fn position(&self) -> u64 {
        self.playback_cursor_frames
    }

    fn length(&self) -> Option<u64> {
        Some((self.calculate_total_duration() * self.sample_rate as f64) as u64)
    }

    fn seekable(&self) -> bool {
        true
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn native_format(&self) -> SampleFormat {
        SampleFormat::F32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_composition_renders_silence() {
        let mut comp = Composition::new("c", 48_000, 2);
        let mut out = vec![9.0f32; 64];
        comp.render(0.0, 64.0 / 48_000.0 / 2.0, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn master_gain_attenuates_output() {
        let mut comp = Composition::new("c", 48_000, 1);
        comp.master_gain = 0.0;
        let track = Track::new("t");
        comp.add_track(track);
        let mut out = vec![1.0f32; 16];
        comp.render(0.0, 16.0 / 48_000.0, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn solo_silences_non_soloed_tracks() {
        let mut comp = Composition::new("c", 48_000, 1);
        let mut soloed = Track::new("solo");
        soloed.soloed = true;
        let mut other = Track::new("other");
        other.muted = false;
        comp.add_track(soloed);
        comp.add_track(other);
        // Both tracks are empty, so output is silent regardless; this
        // exercises the any_soloed branch without asserting on content.
        let mut out = vec![0.0f32; 16];
        comp.render(0.0, 16.0 / 48_000.0, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn composition_as_sample_source_advances_cursor_and_exhausts() {
        use crate::segment::Segment;
        use cw_core::BufferSource;
        use parking_lot::Mutex;
        use std::sync::Arc;

        let mut comp = Composition::new("c", 48_000, 1);
        let source: Arc<Mutex<Box<dyn SampleSource>>> =
            Arc::new(Mutex::new(Box::new(BufferSource::new(vec![1.0; 48_000], 1, 48_000))));
        let segment = Segment::new(source, uuid::Uuid::new_v4(), 0, 48_000, 0).unwrap();
        let mut track = Track::new("t");
        track.insert_segment(segment).unwrap();
        comp.add_track(track);

        assert_eq!(comp.length(), Some(48_000));
        assert_eq!(comp.position(), 0);

        let mut buf = vec![0.0f32; 24_000];
        assert_eq!(comp.read(&mut buf), 24_000);
        assert_eq!(comp.position(), 24_000);

        let mut buf2 = vec![0.0f32; 24_000];
        assert_eq!(comp.read(&mut buf2), 24_000);
        assert_eq!(comp.position(), 48_000);

        let mut buf3 = vec![0.0f32; 100];
        assert_eq!(comp.read(&mut buf3), 0);
    }

    #[test]
    fn composition_seek_rejects_out_of_range() {
        let mut comp = Composition::new("c", 48_000, 1);
        assert!(comp.seek(0));
        assert!(!comp.seek(1));
    }

    #[test]
    fn new_composition_starts_dirty_and_mark_clean_propagates() {
        let mut comp = Composition::new("c", 48_000, 1);
        assert!(comp.is_dirty());
        comp.add_track(Track::new("t"));
        comp.mark_clean();
        assert!(!comp.is_dirty());
    }
}
