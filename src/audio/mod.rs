//! Audio processing between decoder and encoder
//!
//! Decoded PCM is 16-bit interleaved. Each decoder buffer is stretched to
//! follow the time interpolator, remixed to the output channel count and
//! resampled to the output rate before it is written to an encoder input
//! buffer:
//! - `conversions`: byte/sample/microsecond arithmetic
//! - `remix`: mono <-> stereo
//! - `resample`: rate conversion
//! - `stretch`: duration correction
//! - `channel`: the stateful adapter running the chain with an overflow buffer

pub mod channel;
pub mod conversions;
pub mod remix;
pub mod resample;
pub mod stretch;

pub use channel::AudioProcessingChannel;
pub use remix::AudioRemixer;
pub use resample::{
    AudioResampler, DefaultAudioResampler, DownsampleAudioResampler, PassThroughAudioResampler,
    UpsampleAudioResampler,
};
pub use stretch::{
    AudioStretcher, CutAudioStretcher, DefaultAudioStretcher, InsertAudioStretcher,
    PassThroughAudioStretcher,
};

/// Interleave `primary` steps with `extra` steps so the extra ones are spread
/// evenly. At each step the kind with the larger remaining fraction goes next;
/// `step` receives `true` for an extra step. Exactly `primary + extra` steps run.
pub(crate) fn spread_evenly(primary: usize, extra: usize, mut step: impl FnMut(bool)) {
    let (mut left_primary, mut left_extra) = (primary, extra);
    while left_primary > 0 || left_extra > 0 {
        let take_primary = if left_extra == 0 {
            true
        } else if left_primary == 0 {
            false
        } else {
            // left_primary / primary >= left_extra / extra
            left_primary as u64 * extra as u64 >= left_extra as u64 * primary as u64
        };
        if take_primary {
            left_primary -= 1;
        } else {
            left_extra -= 1;
        }
        step(!take_primary);
    }
}
