//! PCM sample conversion shared by the mixer and the client pipelines.

/// Converts normalized float samples to 16-bit PCM, rounding and saturating.
pub fn f32_to_i16(src: &[f32], dst: &mut [i16]) {
    for (out, sample) in dst.iter_mut().zip(src.iter()) {
        *out = (sample * 32767.0).round().clamp(-32767.0, 32767.0) as i16;
    }
}

/// Converts 16-bit PCM to normalized float samples in `[-1, 1]`.
pub fn i16_to_f32(src: &[i16], dst: &mut [f32]) {
    for (out, sample) in dst.iter_mut().zip(src.iter()) {
        *out = f32::from(*sample) / 32767.0;
    }
}
