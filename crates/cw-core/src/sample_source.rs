//! `SampleSource`: the producer contract for anything that can be read into
//! the graph or the timeline — a decoded file, an in-memory buffer, or a
//! generated signal (§4.1). Decoding itself is out of scope; sources are
//! always already-decoded interleaved `f32`.

use crate::format::SampleFormat;

/// A seekable or forward-only producer of interleaved `f32` audio.
///
/// Implementations are not required to be thread-safe; per §5, a source is
/// owned by exactly one `SoundPlayer` or segment renderer at a time.
pub trait SampleSource: Send {
    /// Read up to `buffer.len()` interleaved samples (a multiple of
    /// `channels()` is not required of the caller; partial frames at the
    /// tail of a read are the caller's responsibility to buffer).
    ///
    /// Returns the number of samples actually written, which is `0` only
    /// at end of stream for finite sources.
    fn read(&mut self, buffer: &mut [f32]) -> usize;

    /// Reposition to an absolute sample-frame offset. Returns `false` (and
    /// leaves position unchanged) if the source is not seekable or the
    /// offset is out of range.
    fn seek(&mut self, frame_position: u64) -> bool;

    /// Current read position in sample frames.
    fn position(&self) -> u64;

    /// Total length in sample frames, or `None` if unbounded/unknown.
    fn length(&self) -> Option<u64>;

    fn seekable(&self) -> bool;

    fn channels(&self) -> u16;

    fn sample_rate(&self) -> u32;

    /// The format the underlying data was (or, for an embed round-trip,
    /// should be) encoded in before decode, regardless of the fact that
    /// `read` always hands back `f32` (§4.1, §3).
    fn native_format(&self) -> SampleFormat;
}

/// An in-memory, fully-decoded, interleaved sample source. Seekable.
pub struct BufferSource {
    data: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    frame_position: u64,
}

impl BufferSource {
    pub fn new(data: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            data,
            channels,
            sample_rate,
            frame_position: 0,
        }
    }

    fn frame_count(&self) -> u64 {
        if self.channels == 0 {
            0
        } else {
            (self.data.len() / self.channels as usize) as u64
        }
    }
}

impl SampleSource for BufferSource {
    fn read(&mut self, buffer: &mut [f32]) -> usize {
        let channels = self.channels.max(1) as usize;
        let start_sample = self.frame_position as usize * channels;
        if start_sample >= self.data.len() {
            return 0;
        }
        let remaining = &self.data[start_sample..];
        let to_copy = remaining.len().min(buffer.len());
        buffer[..to_copy].copy_from_slice(&remaining[..to_copy]);
        self.frame_position += (to_copy / channels) as u64;
        to_copy
    }

    fn seek(&mut self, frame_position: u64) -> bool {
        if frame_position > self.frame_count() {
            return false;
        }
        self.frame_position = frame_position;
        true
    }

    fn position(&self) -> u64 {
        self.frame_position
    }

    fn length(&self) -> Option<u64> {
        Some(self.frame_count())
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

/// A generator of digital silence, either infinite or a fixed frame length.
/// Used as a placeholder source and in tests for the "silent graph" scenario.
pub struct SilenceSource {
    channels: u16,
    sample_rate: u32,
    length_frames: Option<u64>,
    frame_position: u64,
}

impl SilenceSource {
    pub fn infinite(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            length_frames: None,
            frame_position: 0,
        }
    }

    pub fn fixed(channels: u16, sample_rate: u32, length_frames: u64) -> Self {
        Self {
            channels,
            sample_rate,
            length_frames: Some(length_frames),
            frame_position: 0,
        }
    }
}

impl SampleSource for SilenceSource {
    fn read(&mut self, buffer: &mut [f32]) -> usize {
        let channels = self.channels.max(1) as u64;
        let available = match self.length_frames {
            None => buffer.len(),
            Some(total) => {
                let remaining_frames = total.saturating_sub(self.frame_position);
                (remaining_frames * channels) as usize
            }
        }
        .min(buffer.len());

        buffer[..available].fill(0.0);
        self.frame_position += (available as u64) / channels;
        available
    }

    fn seek(&mut self, frame_position: u64) -> bool {
        match self.length_frames {
            Some(total) if frame_position > total => false,
            _ => {
                self.frame_position = frame_position;
                true
            }
        }
    }

    fn position(&self) -> u64 {
        self.frame_position
    }

    fn length(&self) -> Option<u64> {
        self.length_frames
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
    fn buffer_source_reads_then_exhausts() {
        let mut src = BufferSource::new(vec![1.0, 2.0, 3.0, 4.0], 2, 48_000);
        let mut buf = [0.0_f32; 2];
        assert_eq!(src.read(&mut buf), 2);
        assert_eq!(buf, [1.0, 2.0]);
        assert_eq!(src.read(&mut buf), 2);
        assert_eq!(buf, [3.0, 4.0]);
        assert_eq!(src.read(&mut buf), 0);
    }

    #[test]
    fn buffer_source_seek_rejects_out_of_range() {
        let mut src = BufferSource::new(vec![0.0; 4], 2, 48_000);
        assert!(src.seek(2));
        assert!(!src.seek(3));
    }

    #[test]
    fn silence_source_fixed_length_exhausts() {
        let mut src = SilenceSource::fixed(1, 48_000, 4);
        let mut buf = [1.0_f32; 10];
        let n = src.read(&mut buf);
        assert_eq!(n, 4);
        assert!(buf[..4].iter().all(|&s| s == 0.0));
        assert_eq!(src.read(&mut buf), 0);
    }

    #[test]
    fn silence_source_infinite_never_exhausts() {
        let mut src = SilenceSource::infinite(2, 48_000);
        let mut buf = [1.0_f32; 100];
        assert_eq!(src.read(&mut buf), 100);
        assert!(buf.iter().all(|&s| s == 0.0));
    }
}
