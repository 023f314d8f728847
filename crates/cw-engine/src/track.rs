//! A track: an ordered, non-overlapping collection of segments on the
//! timeline, with its own gain/pan/mute/solo and modifier/analyzer chains
//! (§3, §4.8).

use std::sync::Arc;

use cw_core::SampleSource;
use cw_dsp::{Analyzer, Modifier};
use parking_lot::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::segment::Segment;

pub struct Track {
    pub name: String,
    pub enabled: bool,
    pub muted: bool,
    pub soloed: bool,
    pub gain: f32,
    pub pan: f32,
    segments: Vec<Segment>,
    modifiers: Vec<Box<dyn Modifier>>,
    analyzers: Vec<Box<dyn Analyzer>>,
    /// Set on construction and by any structural mutation; cleared by the
    /// persistence collaborator once a save has captured the current state.
    dirty: bool,
}

impl Track {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            muted: false,
            soloed: false,
            gain: 1.0,
            pan: 0.0,
            segments: Vec::new(),
            modifiers: Vec::new(),
            analyzers: Vec::new(),
            dirty: true,
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

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Dirty if this track's own settings changed, or any of its segments
    /// did; a composition consulting this rolls the check up further still.
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.segments.iter().any(Segment::is_dirty)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
        for segment in self.segments.iter_mut() {
            segment.mark_clean();
        }
    }

    /// Inserts `segment` if it does not overlap any existing segment's
    /// timeline span (non-destructive editing's invariant: a track's
    /// segments never overlap).
    pub fn insert_segment(&mut self, segment: Segment) -> EngineResult<()> {
        let new_start = segment.timeline_start;
        let new_end = new_start + (segment.total_looped_timeline_duration() * 1e9) as u64;

        for existing in &self.segments {
            let existing_start = existing.timeline_start;
            let existing_end = existing_start + (existing.total_looped_timeline_duration() * 1e9) as u64;
            if new_start < existing_end && existing_start < new_end {
                log::warn!(
                    "rejected segment insert on track {:?}: [{new_start}, {new_end}) overlaps [{existing_start}, {existing_end})",
                    self.name
                );
                return Err(EngineError::SegmentOverlap);
            }
        }

        self.segments.push(segment);
        self.segments.sort_by_key(|s| s.timeline_start);
        self.dirty = true;
        Ok(())
    }

    /// Places `segment` at `timeline_time`. When `shift_subsequent` is
    /// `false`, this behaves like `insert_segment` and rejects an overlap.
    /// When `true`, every existing segment starting at or after
    /// `timeline_time` is pushed later by `segment`'s own timeline span to
    /// make room, rather than rejecting — the ripple-insert a non-
    /// destructive timeline editor needs (§3, §6). Ripple-shifting can only
    /// make room for segments that start at or after the insertion point;
    /// if an existing segment straddles it, the insert is still rejected.
    pub fn insert_segment_at(&mut self, mut segment: Segment, timeline_time: u64, shift_subsequent: bool) -> EngineResult<()> {
        segment.timeline_start = timeline_time;

        if !shift_subsequent {
            return self.insert_segment(segment);
        }

        let new_duration = (segment.total_looped_timeline_duration() * 1e9) as u64;
        for existing in &self.segments {
            let existing_start = existing.timeline_start;
            let existing_end = existing_start + (existing.total_looped_timeline_duration() * 1e9) as u64;
            if existing_start < timeline_time && existing_end > timeline_time {
                log::warn!(
                    "rejected ripple insert on track {:?}: [{timeline_time}, _) falls inside existing segment [{existing_start}, {existing_end})",
                    self.name
                );
                return Err(EngineError::SegmentOverlap);
            }
        }

        for existing in self.segments.iter_mut() {
            if existing.timeline_start >= timeline_time {
                existing.timeline_start += new_duration;
                existing.mark_dirty();
            }
        }

        self.segments.push(segment);
        self.segments.sort_by_key(|s| s.timeline_start);
        self.dirty = true;
        Ok(())
    }

    pub fn remove_segment_at(&mut self, index: usize) -> EngineResult<Segment> {
        if index >= self.segments.len() {
            return Err(EngineError::UnknownId(format!("segment index {index}")));
        }
        self.dirty = true;
        Ok(self.segments.remove(index))
    }

    /// Removes the segment at `index`. When `shift_subsequent` is `true`,
    /// every segment starting at or after the removed one's timeline start
    /// is pulled earlier to close the gap it left (§3, §6).
    pub fn remove_segment(&mut self, index: usize, shift_subsequent: bool) -> EngineResult<Segment> {
        if index >= self.segments.len() {
            return Err(EngineError::UnknownId(format!("segment index {index}")));
        }
        let removed = self.segments.remove(index);

        if shift_subsequent {
            let removed_start = removed.timeline_start;
            let gap = (removed.total_looped_timeline_duration() * 1e9) as u64;
            for existing in self.segments.iter_mut() {
                if existing.timeline_start >= removed_start {
                    existing.timeline_start = existing.timeline_start.saturating_sub(gap);
                    existing.mark_dirty();
                }
            }
        }

        self.dirty = true;
        Ok(removed)
    }

    /// Replaces whichever segment occupies exactly `[start, end)` on the
    /// timeline with a fresh segment over `new_source`, preserving the
    /// replaced segment's settings (gain, pan, fades, loop, reverse,
    /// stretch) unchanged (§3, §6).
    pub fn replace_segment(
        &mut self,
        start: u64,
        end: u64,
        new_source: Arc<Mutex<Box<dyn SampleSource>>>,
        new_source_start: u64,
        new_source_duration: u64,
    ) -> EngineResult<()> {
        let index = self
            .segments
            .iter()
            .position(|s| s.timeline_start == start && s.timeline_start + (s.total_looped_timeline_duration() * 1e9) as u64 == end)
            .ok_or_else(|| EngineError::UnknownId(format!("no segment occupies [{start}, {end})")))?;

        let preserved_settings = self.segments[index].settings;
        let mut replacement = Segment::new(new_source, uuid::Uuid::new_v4(), new_source_start, new_source_duration, start)?;
        replacement.settings = preserved_settings;
        replacement.mark_dirty();
        self.segments[index] = replacement;
        self.dirty = true;
        Ok(())
    }

    /// The track's total timeline extent, in seconds: the end of its
    /// furthest-reaching segment.
    pub fn duration_seconds(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| {
                let start_seconds = s.timeline_start as f64 / 1e9;
                start_seconds + s.total_looped_timeline_duration()
            })
            .fold(0.0, f64::max)
    }

    /// Mixes all segments overlapping `[timeline_offset, timeline_offset +
    /// duration)` into `out` (interleaved `target_ch` channels at
    /// `target_sr`), then applies the track's own modifier chain, analyzer
    /// tap, gain, and pan. `any_soloed` lets the caller implement solo
    /// semantics: a track renders silence if some other track is soloed and
    /// this one is not.
    pub fn render(
        &mut self,
        timeline_offset_seconds: f64,
        duration_seconds: f64,
        out: &mut [f32],
        target_sr: u32,
        target_ch: u16,
        any_soloed: bool,
    ) {
        out.fill(0.0);
        if !self.enabled || self.muted {
            return;
        }
        if any_soloed && !self.soloed {
            return;
        }

        let channels = target_ch.max(1) as usize;
        let mut scratch = vec![0.0f32; out.len()];

        for segment in self.segments.iter_mut() {
            let segment_start_seconds = segment.timeline_start as f64 / 1e9;
            let segment_end_seconds = segment_start_seconds + segment.total_looped_timeline_duration();
            let window_end_seconds = timeline_offset_seconds + duration_seconds;

            if segment_end_seconds <= timeline_offset_seconds || segment_start_seconds >= window_end_seconds {
                continue;
            }

            let segment_offset = (timeline_offset_seconds - segment_start_seconds).max(0.0);
            segment.read_processed(segment_offset, duration_seconds, &mut scratch, target_sr, target_ch);

            for (dst, src) in out.iter_mut().zip(scratch.iter()) {
                *dst += *src;
            }
        }

        for frame in out.chunks_mut(channels) {
            for modifier in self.modifiers.iter_mut() {
                modifier.process(frame, target_ch);
            }
        }
        for analyzer in self.analyzers.iter_mut() {
            analyzer.analyze(out, target_ch);
        }

        apply_track_gain_pan(out, channels, self.gain, self.pan);
    }
}

fn apply_track_gain_pan(buffer: &mut [f32], channels: usize, gain: f32, pan_bipolar: f32) {
    use cw_core::{equal_power_pan, pan_bipolar_to_unit};
    let pan_unit = pan_bipolar_to_unit(pan_bipolar);
    let (left_gain, right_gain) = equal_power_pan(gain, pan_unit);
    let other_gain = (left_gain + right_gain) * 0.5;

    for frame in buffer.chunks_mut(channels) {
        match frame.len() {
            0 => {}
            1 => frame[0] *= gain,
            _ => {
                frame[0] *= left_gain;
                frame[1] *= right_gain;
                for s in frame.iter_mut().skip(2) {
                    *s *= other_gain;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_core::{BufferSource, SampleSource};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn make_segment(start_ns: u64, duration_samples: u64) -> Segment {
        let source: Arc<Mutex<Box<dyn SampleSource>>> =
            Arc::new(Mutex::new(Box::new(BufferSource::new(vec![1.0; duration_samples as usize], 1, 48_000))));
        let mut seg = Segment::new(source, uuid::Uuid::new_v4(), 0, duration_samples, start_ns).unwrap();
        seg.timeline_start = start_ns;
        seg
    }

    #[test]
    fn overlapping_segments_are_rejected() {
        let mut track = Track::new("a");
        track.insert_segment(make_segment(0, 48_000)).unwrap();
        let result = track.insert_segment(make_segment(0, 48_000));
        assert!(result.is_err());
    }

    #[test]
    fn adjacent_non_overlapping_segments_are_accepted() {
        let mut track = Track::new("a");
        track.insert_segment(make_segment(0, 48_000)).unwrap();
        // second segment starts a full second later; no overlap.
        track.insert_segment(make_segment(2_000_000_000, 48_000)).unwrap();
        assert_eq!(track.segments().len(), 2);
    }

    #[test]
    fn muted_track_renders_silence() {
        let mut track = Track::new("a");
        track.muted = true;
        track.insert_segment(make_segment(0, 48_000)).unwrap();
        let mut out = vec![9.0f32; 64];
        track.render(0.0, 64.0 / 48_000.0, &mut out, 48_000, 1, false);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn insert_at_without_shift_rejects_overlap() {
        let mut track = Track::new("a");
        track.insert_segment(make_segment(0, 48_000)).unwrap();
        let result = track.insert_segment_at(make_segment(0, 48_000), 0, false);
        assert!(result.is_err());
    }

    #[test]
    fn insert_at_with_shift_pushes_later_segments_back() {
        let mut track = Track::new("a");
        track.insert_segment(make_segment(0, 48_000)).unwrap();
        track.insert_segment_at(make_segment(0, 48_000), 0, true).unwrap();
        assert_eq!(track.segments().len(), 2);
        // the original segment at 0 was pushed back by the new one's
        // one-second span (48_000 samples at 48kHz = 1e9 ns).
        assert_eq!(track.segments()[1].timeline_start, 1_000_000_000);
    }

    #[test]
    fn insert_at_with_shift_still_rejects_straddled_segment() {
        let mut track = Track::new("a");
        track.insert_segment(make_segment(0, 48_000)).unwrap();
        // inserting in the middle of the existing segment can't be resolved
        // by ripple-shifting whole segments.
        let result = track.insert_segment_at(make_segment(0, 48_000), 24_000, true);
        assert!(result.is_err());
    }

    #[test]
    fn remove_with_shift_closes_the_gap() {
        let mut track = Track::new("a");
        track.insert_segment(make_segment(0, 48_000)).unwrap();
        track.insert_segment(make_segment(2_000_000_000, 48_000)).unwrap();
        track.remove_segment(0, true).unwrap();
        assert_eq!(track.segments().len(), 1);
        assert_eq!(track.segments()[0].timeline_start, 1_000_000_000);
    }

    #[test]
    fn remove_without_shift_leaves_gap() {
        let mut track = Track::new("a");
        track.insert_segment(make_segment(0, 48_000)).unwrap();
        track.insert_segment(make_segment(2_000_000_000, 48_000)).unwrap();
        track.remove_segment(0, false).unwrap();
        assert_eq!(track.segments()[0].timeline_start, 2_000_000_000);
    }

    #[test]
    fn replace_segment_swaps_source_and_keeps_settings() {
        let mut track = Track::new("a");
        let mut original = make_segment(0, 48_000);
        original.settings.gain = 0.25;
        track.insert_segment(original).unwrap();

        let new_source: Arc<Mutex<Box<dyn SampleSource>>> =
            Arc::new(Mutex::new(Box::new(BufferSource::new(vec![0.5; 24_000], 1, 48_000))));
        track.replace_segment(0, 1_000_000_000, new_source, 0, 24_000).unwrap();

        assert_eq!(track.segments().len(), 1);
        assert_eq!(track.segments()[0].source_duration(), 24_000);
        assert_eq!(track.segments()[0].settings.gain, 0.25);
    }

    #[test]
    fn new_track_starts_dirty_and_mark_clean_propagates_to_segments() {
        let mut track = Track::new("a");
        track.insert_segment(make_segment(0, 48_000)).unwrap();
        assert!(track.is_dirty());
        track.mark_clean();
        assert!(!track.is_dirty());
    }
}
