//! WAV mixdown writer (§4.9).
//!
//! Uses `hound`, which the teacher already carries as a dev-dependency for
//! test fixtures; here it is promoted to a real dependency since recording
//! the master mix to disk is in scope. `hound::WavWriter` already rewrites
//! the RIFF/`data` chunk sizes on `finalize()`; the periodic rewrite this
//! module adds on top (§10.3/§4.9 supplement) re-opens the file read/write
//! and patches those same header fields without closing the stream, so a
//! crash between periodic rewrites still leaves a playable file.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{debug, warn};

use crate::error::{RecordingError, Result};

const RIFF_CHUNK_SIZE_OFFSET: u64 = 4;
const DATA_CHUNK_SIZE_OFFSET: u64 = 40;

/// Creates a float32 RIFF/WAVE mixdown file and appends interleaved frames.
/// Not thread-safe; the mix engine serializes calls under a small mutex.
pub struct WaveFileWriter {
    path: PathBuf,
    writer: WavWriter<std::io::BufWriter<std::fs::File>>,
    frames_written: u64,
    channels: u32,
    frames_since_header_rewrite: u64,
}

/// How often (in written frames) to rewrite the header so a crash leaves a
/// playable partial file (§4.9, optional-made-mandatory by SPEC_FULL §4.9).
const HEADER_REWRITE_INTERVAL_FRAMES: u64 = 48_000 * 5;

impl WaveFileWriter {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32, channels: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(&path, spec)
            .map_err(|e| RecordingError::Create(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        debug!("mixdown writer created at {}", path.display());
        Ok(Self {
            path,
            writer,
            frames_written: 0,
            channels,
            frames_since_header_rewrite: 0,
        })
    }

    /// Append one span of interleaved float samples (`frames * channels`
    /// long). Periodically rewrites the header so a crash leaves a playable
    /// file up to the last rewrite.
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        for &sample in samples {
            self.writer
                .write_sample(sample)
                .map_err(|e| RecordingError::Write(e.to_string()))?;
        }
        let frames = samples.len() as u64 / self.channels.max(1) as u64;
        self.frames_written += frames;
        self.frames_since_header_rewrite += frames;

        if self.frames_since_header_rewrite >= HEADER_REWRITE_INTERVAL_FRAMES {
            if let Err(e) = self.rewrite_header_in_place() {
                warn!("periodic mixdown header rewrite failed: {e}");
            }
            self.frames_since_header_rewrite = 0;
        }
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush, close, and rewrite the final RIFF/`data` chunk sizes.
    pub fn close(mut self) -> Result<()> {
        self.writer
            .finalize()
            .map_err(|e| RecordingError::Write(e.to_string()))?;
        debug!("mixdown writer closed after {} frames", self.frames_written);
        Ok(())
    }

    /// Patch the RIFF and `data` chunk size fields in the file on disk
    /// without closing the active `hound` writer, so the file remains
    /// playable if the process crashes before the next rewrite or the final
    /// `close`.
    fn rewrite_header_in_place(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| RecordingError::Write(e.to_string()))?;

        let data_bytes = self.frames_written * self.channels as u64 * 4;
        let riff_size = data_bytes + 36;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(RecordingError::Create)?;

        file.seek(SeekFrom::Start(RIFF_CHUNK_SIZE_OFFSET))
            .map_err(RecordingError::Create)?;
        file.write_all(&(riff_size as u32).to_le_bytes())
            .map_err(RecordingError::Create)?;

        file.seek(SeekFrom::Start(DATA_CHUNK_SIZE_OFFSET))
            .map_err(RecordingError::Create)?;
        file.write_all(&(data_bytes as u32).to_le_bytes())
            .map_err(RecordingError::Create)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_close_produces_readable_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut writer = WaveFileWriter::create(&path, 44_100, 2).unwrap();
        let samples: Vec<f32> = (0..200).map(|i| (i as f32 / 200.0) - 0.5).collect();
        writer.write_samples(&samples).unwrap();
        assert_eq!(writer.frames_written(), 100);
        writer.close().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 44_100);
        assert_eq!(reader.spec().channels, 2);
        let read_back: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(read_back, samples);
    }

    #[test]
    fn periodic_rewrite_leaves_valid_partial_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.wav");

        let mut writer = WaveFileWriter::create(&path, 48_000, 1).unwrap();
        let chunk = vec![0.25f32; 48_000 * 5];
        writer.write_samples(&chunk).unwrap();
        writer.rewrite_header_in_place().unwrap();

        // Don't call close(): simulate a crash right after the rewrite.
        drop(writer);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 48_000 * 5);
    }
}
