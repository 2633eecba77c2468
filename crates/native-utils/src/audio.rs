use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree};

/// Creates a mono resampler from `in_sampling_rate` to `out_sampling_rate`.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits samples into chunks of exactly `chunk_size`, zero-padding the last.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Ring buffer shared between a device callback and a blocking reader or writer.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Averages interleaved frames down to one channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Little-endian PCM16 bytes to samples in [-1.0, 1.0]. A trailing odd byte
/// is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Conversion to little-endian PCM16 bytes.
pub trait ToPcm16 {
    fn to_pcm16(&self) -> Vec<u8>;
}

impl ToPcm16 for [f32] {
    fn to_pcm16(&self) -> Vec<u8> {
        self.iter()
            .flat_map(|&sample| {
                let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                v.to_le_bytes()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rubato::Resampler;

    #[test]
    fn test_downmix_averages_frames() {
        let stereo = [0.5, 0.25, -1.0, 0.0];

        assert_eq!(downmix(&stereo, 2), vec![0.375, -0.5]);
        assert_eq!(downmix(&stereo, 1), stereo.to_vec());
    }

    #[test]
    fn test_pcm16_conversion_clamps_and_keeps_byte_order() {
        let bytes = [0.5f32, -1.0, 2.0].to_pcm16();

        assert_eq!(bytes, vec![0x00, 0x40, 0x00, 0x80, 0xff, 0x7f]);
        assert_eq!(pcm16_to_f32(&bytes[..5]), vec![0.5, -1.0]);
    }

    #[test]
    fn test_split_pads_last_chunk() {
        let chunks = split_for_chunks(&[1.0, 2.0, 3.0], 2);

        assert_eq!(chunks, vec![vec![1.0, 2.0], vec![3.0, 0.0]]);
    }

    #[test]
    fn test_resampler_scales_chunk_length() {
        let mut resampler = create_resampler(48_000.0, 16_000.0, 960).unwrap();
        let input = vec![0.0f32; resampler.input_frames_next()];

        let output = resampler.process(&[input.as_slice()], None).unwrap();

        let frames = output[0].len();
        assert!((310..=330).contains(&frames), "got {frames} frames");
    }
}
