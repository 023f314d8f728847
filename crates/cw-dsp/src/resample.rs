//! Linear-interpolation resampling over a fractional frame position.
//!
//! Used by the sound player's resample stage (§4.5 step 2) and by the
//! segment rendering pipeline's rate conversion step (§4.8 step 6). This is
//! intentionally a simple, allocation-free interpolator rather than a
//! sinc-table resampler: the spec calls for speed/pitch changes to go
//! through WSOLA, leaving straight sample-rate conversion as a secondary,
//! lower-fidelity concern.

/// Reads one interpolated interleaved frame from `source` (a frame-major
/// interleaved buffer with `channels` channels) at fractional frame
/// position `position`, writing into `out_frame` (which must be at least
/// `channels` samples long).
///
/// `position` must be `< total_frames - 1` for full interpolation; at the
/// last available frame this falls back to nearest-frame lookup.
pub fn read_interpolated_frame(
    source: &[f32],
    channels: usize,
    total_frames: usize,
    position: f64,
    out_frame: &mut [f32],
) {
    if total_frames == 0 || channels == 0 {
        out_frame[..channels].fill(0.0);
        return;
    }

    let base = position.floor();
    let frac = (position - base) as f32;
    let index0 = (base as i64).clamp(0, total_frames as i64 - 1) as usize;
    let index1 = (index0 + 1).min(total_frames - 1);

    let frame0 = &source[index0 * channels..index0 * channels + channels];
    let frame1 = &source[index1 * channels..index1 * channels + channels];

    for c in 0..channels {
        out_frame[c] = frame0[c] + (frame1[c] - frame0[c]) * frac;
    }
}

/// A stateful stepper that advances a fractional frame position by
/// `step` (source frames per output frame) each call, driving
/// `read_interpolated_frame` without the caller having to track position.
pub struct LinearResampler {
    position: f64,
    step: f64,
}

impl LinearResampler {
    /// `step = source_sample_rate / output_sample_rate`; e.g. `2.0` halves
    /// the rate (and thus the duration), `0.5` doubles it.
    pub fn new(step: f64) -> Self {
        Self { position: 0.0, step }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn set_step(&mut self, step: f64) {
        self.step = step;
    }

    pub fn seek(&mut self, position: f64) {
        self.position = position;
    }

    /// Produces the next interpolated frame and advances `position` by
    /// `step`. Returns `false` (without writing) once `position` would
    /// advance past `total_frames - 1`.
    pub fn next_frame(
        &mut self,
        source: &[f32],
        channels: usize,
        total_frames: usize,
        out_frame: &mut [f32],
    ) -> bool {
        if total_frames == 0 || self.position >= (total_frames - 1).max(0) as f64 + 1.0 {
            return false;
        }
        read_interpolated_frame(source, channels, total_frames, self.position, out_frame);
        self.position += self.step;
        true
    }

    pub fn reset(&mut self) {
        self.position = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_midpoint_linearly() {
        let source = [0.0_f32, 10.0];
        let mut out = [0.0_f32; 1];
        read_interpolated_frame(&source, 1, 2, 0.5, &mut out);
        assert!((out[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn unity_step_reproduces_source_exactly() {
        let source = [1.0_f32, 2.0, 3.0, 4.0];
        let mut resampler = LinearResampler::new(1.0);
        let mut out = [0.0_f32; 1];
        let mut produced = Vec::new();
        while resampler.next_frame(&source, 1, 4, &mut out) {
            produced.push(out[0]);
        }
        assert_eq!(produced, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn half_speed_step_doubles_frame_count() {
        let source = [0.0_f32, 10.0, 20.0, 30.0];
        let mut resampler = LinearResampler::new(0.5);
        let mut out = [0.0_f32; 1];
        let mut count = 0;
        while resampler.next_frame(&source, 1, 4, &mut out) {
            count += 1;
        }
        assert_eq!(count, 6);
    }
}
