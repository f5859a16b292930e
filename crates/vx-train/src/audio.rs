//! WAV file I/O

use std::path::Path;

use ndarray::Array2;

use crate::error::{TrainError, TrainResult};

/// Decoded WAV file
#[derive(Debug, Clone)]
pub struct WavAudio {
    /// Samples shaped `(channels, samples)`
    pub samples: Array2<f32>,
    pub sample_rate: u32,
}

impl WavAudio {
    pub fn channels(&self) -> usize {
        self.samples.nrows()
    }

    pub fn len(&self) -> usize {
        self.samples.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.ncols() == 0
    }

    /// Average all channels into one
    pub fn to_mono(&self) -> Array2<f32> {
        let channels = self.channels().max(1) as f32;
        let mono = self.samples.sum_axis(ndarray::Axis(0)).mapv(|v| v / channels);
        mono.insert_axis(ndarray::Axis(0))
    }
}

/// Read a WAV file, float or integer PCM, into `(channels, samples)`
pub fn read_wav<P: AsRef<Path>>(path: P) -> TrainResult<WavAudio> {
    let path = path.as_ref();
    let reader = hound::WavReader::open(path)
        .map_err(|e| TrainError::Loader(format!("{}: {}", path.display(), e)))?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(TrainError::Loader(format!(
            "{}: no channels",
            path.display()
        )));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    // Deinterleave
    let frames = interleaved.len() / channels;
    let samples = Array2::from_shape_fn((channels, frames), |(ch, i)| {
        interleaved[i * channels + ch]
    });

    log::debug!(
        "Loaded {} ({} ch, {} samples @ {} Hz)",
        path.display(),
        channels,
        frames,
        spec.sample_rate
    );

    Ok(WavAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Write `(channels, samples)` as 32-bit float WAV
pub fn write_wav<P: AsRef<Path>>(
    path: P,
    samples: &Array2<f32>,
    sample_rate: u32,
) -> TrainResult<()> {
    let spec = hound::WavSpec {
        channels: samples.nrows() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
    for i in 0..samples.ncols() {
        for ch in 0..samples.nrows() {
            writer.write_sample(samples[[ch, i]])?;
        }
    }
    writer.finalize()?;
    Ok(())
}
