//! Linear-interpolation resampling and channel mapping into the mix bus.

use crate::source::PcmClip;

/// Where and how one decoded clip lands in the accumulator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    /// Output frame the clip's first contribution lands on.
    pub dst_offset: usize,
    /// Number of output frames to fill.
    pub frames: usize,
    /// Output sample rate.
    pub dst_rate: u32,
    /// Source time that maps to `dst_offset`.
    pub source_start: f64,
}

/// Add `clip` into `dst` (interleaved, `gains.len()` channels), scaling each
/// output channel by its gain.
///
/// Output frames that fall before the clip's first frame or after its last
/// are left untouched.
pub(crate) fn accumulate(dst: &mut [f64], gains: &[f64], clip: &PcmClip, placement: Placement) {
    let dst_channels = gains.len();
    let src_frames = clip.frames();
    if dst_channels == 0 || src_frames == 0 || clip.sample_rate == 0 || placement.dst_rate == 0 {
        return;
    }

    let ratio = clip.sample_rate as f64 / placement.dst_rate as f64;
    let base = (placement.source_start - clip.start_time) * clip.sample_rate as f64;

    for k in 0..placement.frames {
        let mut pos = base + k as f64 * ratio;
        if !pos.is_finite() {
            break;
        }
        // Snap float noise so equal-rate copies read exact samples.
        let nearest = pos.round();
        if (pos - nearest).abs() < 1e-6 {
            pos = nearest;
        }
        if pos < 0.0 {
            continue;
        }
        let f0 = pos.floor() as usize;
        if f0 >= src_frames {
            break;
        }
        let f1 = (f0 + 1).min(src_frames - 1);
        let frac = pos - f0 as f64;

        let out = (placement.dst_offset + k) * dst_channels;
        let Some(frame) = dst.get_mut(out..out + dst_channels) else {
            break;
        };
        for (c, slot) in frame.iter_mut().enumerate() {
            let v0 = mapped_sample(clip, f0, c, dst_channels);
            let v1 = mapped_sample(clip, f1, c, dst_channels);
            *slot += (v0 + (v1 - v0) * frac) * gains[c];
        }
    }
}

/// Value of output channel `channel` at source `frame`.
///
/// Mono sources feed every output channel; a mono output averages all
/// source channels; otherwise channels map one to one, wrapping when the
/// output has more channels than the source.
fn mapped_sample(clip: &PcmClip, frame: usize, channel: usize, dst_channels: usize) -> f64 {
    let src_channels = clip.channels as usize;
    if src_channels == 1 {
        return clip.sample(frame, 0) as f64;
    }
    if dst_channels == 1 {
        let sum: f64 = (0..src_channels).map(|c| clip.sample(frame, c) as f64).sum();
        return sum / src_channels as f64;
    }
    clip.sample(frame, channel % src_channels) as f64
}

/// Per-channel gains for `volume` and `pan`.
///
/// Pan only applies to the first two channels of a multi-channel output:
/// positive values attenuate the left channel, negative values the right.
pub(crate) fn channel_gains(channels: u16, volume: f64, pan: f64) -> Vec<f64> {
    let pan = if pan.is_finite() { pan.clamp(-1.0, 1.0) } else { 0.0 };
    let mut gains = vec![volume; channels as usize];
    if channels >= 2 {
        gains[0] = volume * (1.0 - pan.max(0.0));
        gains[1] = volume * (1.0 + pan.min(0.0));
    }
    gains
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(frames: usize, dst_rate: u32) -> Placement {
        Placement {
            dst_offset: 0,
            frames,
            dst_rate,
            source_start: 0.0,
        }
    }

    #[test]
    fn test_equal_rate_copy_is_exact() {
        let clip = PcmClip::new(4, 1, vec![0.1, 0.2, 0.3, 0.4]);
        let mut dst = vec![0.0; 4];
        accumulate(&mut dst, &[1.0], &clip, place(4, 4));
        let expected = [0.1f32, 0.2, 0.3, 0.4];
        for (got, want) in dst.iter().zip(expected) {
            assert_eq!(*got, want as f64);
        }
    }

    #[test]
    fn test_upsample_interpolates_midpoints() {
        let clip = PcmClip::new(2, 1, vec![0.0, 1.0]);
        let mut dst = vec![0.0; 3];
        accumulate(&mut dst, &[1.0], &clip, place(3, 4));
        assert!((dst[0] - 0.0).abs() < 1e-9);
        assert!((dst[1] - 0.5).abs() < 1e-9);
        assert!((dst[2] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let clip = PcmClip::new(10, 1, vec![0.5; 10]);
        let mut dst = vec![0.0; 20];
        accumulate(&mut dst, &[1.0, 1.0], &clip, place(10, 10));
        assert!(dst.iter().all(|s| (*s - 0.5).abs() < 1e-7));
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let clip = PcmClip::new(10, 2, vec![1.0, 0.0, 1.0, 0.0]);
        let mut dst = vec![0.0; 2];
        accumulate(&mut dst, &[1.0], &clip, place(2, 10));
        assert!(dst.iter().all(|s| (*s - 0.5).abs() < 1e-9));
    }

    #[test]
    fn test_past_clip_end_is_untouched() {
        let clip = PcmClip::new(10, 1, vec![1.0; 3]);
        let mut dst = vec![0.0; 5];
        accumulate(&mut dst, &[1.0], &clip, place(5, 10));
        assert_eq!(&dst[3..], &[0.0, 0.0]);
    }

    #[test]
    fn test_pan_gains() {
        assert_eq!(channel_gains(2, 0.8, 0.0), vec![0.8, 0.8]);
        let right = channel_gains(2, 1.0, 1.0);
        assert_eq!(right, vec![0.0, 1.0]);
        let left = channel_gains(2, 1.0, -0.5);
        assert_eq!(left, vec![1.0, 0.5]);
        assert_eq!(channel_gains(1, 0.5, 1.0), vec![0.5]);
    }
}
