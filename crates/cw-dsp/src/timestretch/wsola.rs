//! WSOLA (Waveform Similarity Overlap-Add) time-stretching (§4.6).
//!
//! Streaming, pitch-preserving time stretch over interleaved multi-channel
//! `f32`. Fixed analysis window `W = 1024`, nominal analysis hop
//! `H_a = 256`, search radius `R = 96`; synthesis hop tracks the speed
//! factor each frame so speed changes take effect without a reset.
//!
//! Verhelst & Roelands, "An overlap-add technique based on waveform
//! similarity (WSOLA) for high quality time-scale modification of speech"
//! (1993) — adapted here to a streaming `process`/`flush` contract instead
//! of the original's batch transform.

use crate::{DspError, DspResult};

pub const WINDOW_SIZE: usize = 1024;
pub const ANALYSIS_HOP: usize = 256;
pub const SEARCH_RADIUS: usize = 96;

/// Per-call accounting the sound player and segment renderer use to advance
/// source-read position and estimate playback progress (§4.5, §4.6).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StretchStats {
    pub samples_consumed_from_input: usize,
    pub source_samples_represented_by_output: f64,
}

impl StretchStats {
    fn accumulate(&mut self, other: StretchStats) {
        self.samples_consumed_from_input += other.samples_consumed_from_input;
        self.source_samples_represented_by_output += other.source_samples_represented_by_output;
    }
}

fn hann_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|i| {
            let x = std::f64::consts::PI * 2.0 * i as f64 / (len as f64 - 1.0);
            (0.5 * (1.0 - x.cos())) as f32
        })
        .collect()
}

/// A streaming WSOLA time-stretcher over interleaved `channels`-channel
/// audio. Not thread-safe (§5): owned and driven by exactly one player or
/// segment renderer at a time.
pub struct WsolaStretcher {
    channels: usize,
    speed: f64,
    window: Vec<f32>,
    input: Vec<f32>,
    read_pos: usize,
    prev_tail: Vec<f32>,
    first_frame: bool,
    last_output: Vec<f32>,
}

impl WsolaStretcher {
    pub fn new(channels: usize, speed: f64) -> DspResult<Self> {
        if speed <= 0.0 {
            return Err(DspError::NonPositiveStretchFactor(speed));
        }
        Ok(Self {
            channels: channels.max(1),
            speed,
            window: hann_window(WINDOW_SIZE),
            input: Vec::new(),
            last_output: Vec::new(),
            read_pos: 0,
            prev_tail: Vec::new(),
            first_frame: true,
        })
    }

    pub fn set_speed(&mut self, speed: f64) -> DspResult<()> {
        if speed <= 0.0 {
            return Err(DspError::NonPositiveStretchFactor(speed));
        }
        self.speed = speed;
        Ok(())
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn reset(&mut self) {
        self.input.clear();
        self.read_pos = 0;
        self.prev_tail.clear();
        self.first_frame = true;
    }

    fn synthesis_hop(&self) -> usize {
        (ANALYSIS_HOP as f64 / self.speed).round().max(1.0) as usize
    }

    fn available(&self) -> usize {
        self.input.len() - self.read_pos
    }

    /// Drops already-consumed prefix so the backing buffer doesn't grow
    /// without bound across a long-lived stream.
    fn compact(&mut self) {
        if self.read_pos > WINDOW_SIZE * self.channels * 4 {
            self.input.drain(0..self.read_pos);
            self.read_pos = 0;
        }
    }

    /// Searches `δ ∈ [-max_delta, max_delta]` for the offset that best
    /// continues `prev_tail` by normalized cross-correlation, per the
    /// quality-threshold tie-break rule. Returns `0` if `prev_tail` is
    /// empty (first frame) or below the silence floor.
    fn search_delta(&self, max_delta: i64, h_s: usize) -> i64 {
        if self.prev_tail.is_empty() || max_delta == 0 {
            return 0;
        }

        let channels = self.channels;
        let overlap_len = (WINDOW_SIZE * channels).saturating_sub(h_s * channels);
        let compare_len = self.prev_tail.len().min(overlap_len);
        if compare_len == 0 {
            return 0;
        }

        let tail = &self.prev_tail[..compare_len];
        let tail_energy: f64 = tail.iter().map(|&s| (s as f64) * (s as f64)).sum();
        if tail_energy < 1e-7 * compare_len as f64 {
            return 0;
        }

        let (tail_mean, tail_std) = mean_and_std(tail);

        let mut best_delta = 0i64;
        let mut best_ncc = f64::NEG_INFINITY;

        for delta in -max_delta..=max_delta {
            let offset = ((ANALYSIS_HOP as i64 + delta) as usize) * channels;
            let start = self.read_pos + offset;
            if start + compare_len > self.input.len() {
                continue;
            }
            let candidate = &self.input[start..start + compare_len];
            let (cand_mean, cand_std) = mean_and_std(candidate);

            let ncc = if tail_std < 1e-9 || cand_std < 1e-9 {
                if tail_std < 1e-9 && cand_std < 1e-9 {
                    1.0
                } else {
                    0.0
                }
            } else {
                let mut dot = 0.0f64;
                for (a, b) in tail.iter().zip(candidate.iter()) {
                    dot += (*a as f64 - tail_mean) * (*b as f64 - cand_mean);
                }
                dot / (tail_std * cand_std * compare_len as f64)
            };

            if best_ncc == f64::NEG_INFINITY {
                best_ncc = ncc;
                best_delta = delta;
                continue;
            }

            if ncc >= best_ncc + 0.02 {
                best_ncc = ncc;
                best_delta = delta;
            } else if (ncc - best_ncc).abs() < 0.02 && delta.abs() < best_delta.abs() {
                best_delta = delta;
                if ncc > best_ncc {
                    best_ncc = ncc;
                }
            }
        }

        if best_ncc < 0.3 {
            log::trace!("wsola: weak correlation match (ncc={best_ncc:.3}), delta={best_delta}");
        }

        best_delta
    }

    /// Attempts to synthesize one frame. `max_delta` bounds the search
    /// (the full `SEARCH_RADIUS` in `process`, clamped to what's actually
    /// buffered during `flush`). Returns `None` if not enough input is
    /// buffered to form a frame at all.
    fn try_one_frame(&mut self, max_delta: i64) -> Option<StretchStats> {
        let channels = self.channels;
        let h_s = self.synthesis_hop();

        let delta = if self.first_frame {
            0
        } else {
            self.search_delta(max_delta, h_s)
        };

        let offset_frames = (ANALYSIS_HOP as i64 + delta).max(0) as usize;
        let start = self.read_pos + offset_frames * channels;
        let end = start + WINDOW_SIZE * channels;
        if end > self.input.len() {
            return None;
        }

        let mut analysis_frame = vec![0.0f32; WINDOW_SIZE * channels];
        for frame_idx in 0..WINDOW_SIZE {
            let w = self.window[frame_idx];
            for c in 0..channels {
                analysis_frame[frame_idx * channels + c] = self.input[start + frame_idx * channels + c] * w;
            }
        }

        let total_len = WINDOW_SIZE * channels;
        let synth_len = h_s * channels;
        let overlap_len = total_len.saturating_sub(synth_len).min(self.prev_tail.len());

        let mut combined = analysis_frame;
        for i in 0..overlap_len {
            combined[i] += self.prev_tail[i];
        }

        let emit_len = synth_len.min(combined.len());
        let output: Vec<f32> = combined[..emit_len].to_vec();
        let new_tail_start = emit_len.min(combined.len());
        self.prev_tail = combined[new_tail_start..].to_vec();

        self.read_pos += offset_frames * channels;
        self.first_frame = false;

        let consumed = offset_frames * channels;
        let represented = if h_s > 0 {
            (emit_len as f64 / channels as f64) * offset_frames as f64 / h_s as f64
        } else {
            0.0
        };

        self.last_output = output;
        Some(StretchStats {
            samples_consumed_from_input: consumed,
            source_samples_represented_by_output: represented,
        })
    }

    /// Feeds `input_chunk` (interleaved, `channels`-channel) to the
    /// stretcher, appending synthesized output to `out`, and returns this
    /// call's consumption/representation accounting.
    pub fn process(&mut self, input_chunk: &[f32], out: &mut Vec<f32>) -> StretchStats {
        self.input.extend_from_slice(input_chunk);

        let mut stats = StretchStats::default();
        let min_required = (ANALYSIS_HOP + SEARCH_RADIUS + WINDOW_SIZE) * self.channels;

        while self.available() >= min_required {
            match self.try_one_frame(SEARCH_RADIUS as i64) {
                Some(frame_stats) => {
                    out.extend_from_slice(&self.last_output);
                    stats.accumulate(frame_stats);
                }
                None => break,
            }
        }

        self.compact();
        stats
    }

    /// Drains as much remaining buffered input as possible without
    /// requiring further `process` calls, for use at end of stream. Keeps
    /// emitting while at least one full window is available (clamping the
    /// search radius to whatever margin remains), then flushes the final
    /// overlap tail.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> StretchStats {
        let mut stats = StretchStats::default();
        let channels = self.channels;

        loop {
            let available = self.available();
            if available < WINDOW_SIZE * channels {
                break;
            }
            let max_offset_frames = available / channels;
            let max_delta = (max_offset_frames as i64 - ANALYSIS_HOP as i64 - WINDOW_SIZE as i64)
                .clamp(0, SEARCH_RADIUS as i64);

            match self.try_one_frame(max_delta) {
                Some(frame_stats) => {
                    out.extend_from_slice(&self.last_output);
                    stats.accumulate(frame_stats);
                }
                None => break,
            }
        }

        if !self.prev_tail.is_empty() {
            out.extend_from_slice(&self.prev_tail);
            self.prev_tail.clear();
        }

        self.compact();
        stats
    }
}

fn mean_and_std(buffer: &[f32]) -> (f64, f64) {
    let n = buffer.len() as f64;
    let mean: f64 = buffer.iter().map(|&s| s as f64).sum::<f64>() / n;
    let variance: f64 = buffer.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, channels: usize, freq: f64, sample_rate: f64) -> Vec<f32> {
        let mut buf = vec![0.0f32; frames * channels];
        for i in 0..frames {
            let sample = (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin() as f32;
            for c in 0..channels {
                buf[i * channels + c] = sample;
            }
        }
        buf
    }

    #[test]
    fn unity_speed_roughly_preserves_length_and_energy() {
        let input = sine(20_000, 1, 440.0, 48_000.0);
        let mut stretcher = WsolaStretcher::new(1, 1.0).unwrap();
        let mut out = Vec::new();
        stretcher.process(&input, &mut out);
        stretcher.flush(&mut out);

        assert!(
            (out.len() as f64 - input.len() as f64).abs() / (input.len() as f64) < 0.1,
            "out={} input={}",
            out.len(),
            input.len()
        );

        let in_rms = rms(&input);
        let out_rms = rms(&out);
        assert!(in_rms > 0.0 && out_rms > 0.0);
        let ratio_db = 20.0 * (out_rms / in_rms).log10();
        assert!(ratio_db.abs() < 6.0, "ratio_db={ratio_db}");
    }

    #[test]
    fn double_speed_produces_roughly_half_the_output() {
        let input = sine(40_000, 1, 220.0, 48_000.0);
        let mut stretcher = WsolaStretcher::new(1, 2.0).unwrap();
        let mut out = Vec::new();
        stretcher.process(&input, &mut out);
        stretcher.flush(&mut out);

        let ratio = out.len() as f64 / input.len() as f64;
        assert!((ratio - 0.5).abs() < 0.15, "ratio={ratio}");
    }

    #[test]
    fn rejects_non_positive_speed() {
        assert!(WsolaStretcher::new(2, 0.0).is_err());
        assert!(WsolaStretcher::new(2, -1.0).is_err());
    }

    #[test]
    fn reset_clears_internal_state() {
        let mut stretcher = WsolaStretcher::new(1, 1.0).unwrap();
        let mut out = Vec::new();
        stretcher.process(&sine(5000, 1, 440.0, 48_000.0), &mut out);
        stretcher.reset();
        assert!(stretcher.first_frame);
        assert!(stretcher.prev_tail.is_empty());
        assert_eq!(stretcher.input.len(), 0);
    }

    fn rms(buffer: &[f32]) -> f64 {
        if buffer.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = buffer.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum_sq / buffer.len() as f64).sqrt()
    }
}
