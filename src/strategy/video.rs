use super::{StrategyError, StrategyResult, TrackStrategy};
use crate::media::{MediaFormat, MIME_VIDEO_AVC};

const DEFAULT_FRAME_RATE: u32 = 30;
const DEFAULT_KEY_FRAME_INTERVAL: f32 = 3.0;
/// Bits per pixel per frame used for the bitrate estimate
const BITS_PER_PIXEL: f64 = 0.07 * 2.0;

/// Output size constraint
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VideoSize {
    /// Exact dimensions. The larger value goes on the input's longer side.
    Exact { first: u32, second: u32 },
    /// Scale down, keeping the aspect ratio, until both sides fit.
    AtMost { minor: u32, major: u32 },
    /// Keep the input size
    AsInput,
}

impl VideoSize {
    /// Output (width, height) for an input of (width, height).
    pub fn resolve(&self, width: u32, height: u32) -> (u32, u32) {
        let landscape = width >= height;
        let (in_major, in_minor) = if landscape { (width, height) } else { (height, width) };
        let (major, minor) = match *self {
            VideoSize::Exact { first, second } => (first.max(second), first.min(second)),
            VideoSize::AtMost { minor, major } => {
                if in_minor <= minor && in_major <= major {
                    (in_major, in_minor)
                } else {
                    let scale = (minor as f64 / in_minor.max(1) as f64)
                        .min(major as f64 / in_major.max(1) as f64);
                    (
                        even((in_major as f64 * scale).round() as u32),
                        even((in_minor as f64 * scale).round() as u32),
                    )
                }
            }
            VideoSize::AsInput => (in_major, in_minor),
        };
        if landscape {
            (major, minor)
        } else {
            (minor, major)
        }
    }
}

/// Encoders want even dimensions for 4:2:0 chroma
fn even(v: u32) -> u32 {
    (v & !1).max(2)
}

/// Re-encodes video to H.264 within size, frame rate and key frame
/// interval limits. When a single input already satisfies every limit the
/// strategy declines with `AlreadyCompressed`.
#[derive(Debug, Clone)]
pub struct DefaultVideoStrategy {
    size: VideoSize,
    frame_rate: u32,
    key_frame_interval: f32,
    bit_rate: Option<u64>,
}

impl Default for DefaultVideoStrategy {
    fn default() -> Self {
        Self {
            size: VideoSize::AtMost {
                minor: 720,
                major: 1280,
            },
            frame_rate: DEFAULT_FRAME_RATE,
            key_frame_interval: DEFAULT_KEY_FRAME_INTERVAL,
            bit_rate: None,
        }
    }
}

impl DefaultVideoStrategy {
    pub fn new(size: VideoSize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    /// 720x1280 at 2 Mbps, 30 fps, one key frame every 3 seconds.
    pub fn for_720x1280() -> Self {
        Self::new(VideoSize::Exact {
            first: 720,
            second: 1280,
        })
        .bit_rate(2_000_000)
    }

    pub fn frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn key_frame_interval(mut self, seconds: f32) -> Self {
        self.key_frame_interval = seconds;
        self
    }

    pub fn bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }
}

impl TrackStrategy for DefaultVideoStrategy {
    fn create_output_format(&self, inputs: &[MediaFormat]) -> StrategyResult {
        let first = inputs
            .first()
            .ok_or_else(|| StrategyError::Unavailable("no video input".into()))?;
        let (width, height) = match (first.width, first.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(StrategyError::Unavailable(
                    "video input has no dimensions".into(),
                ))
            }
        };

        let (out_width, out_height) = self.size.resolve(width, height);
        let input_fps = inputs.iter().filter_map(|f| f.frame_rate).min();
        let out_fps = match input_fps {
            Some(fps) => fps.min(self.frame_rate),
            None => self.frame_rate,
        };

        if let [single] = inputs {
            let size_done = width.min(height) <= out_width.min(out_height);
            let frame_rate_done = input_fps.is_some_and(|fps| fps <= out_fps);
            let interval_done = single
                .key_frame_interval
                .is_some_and(|i| i >= self.key_frame_interval);
            let type_done = single.is_avc();
            if size_done && frame_rate_done && interval_done && type_done {
                tracing::debug!(input = %single, "video input already compressed");
                return Err(StrategyError::AlreadyCompressed);
            }
        }

        let bit_rate = self.bit_rate.unwrap_or_else(|| {
            (BITS_PER_PIXEL * out_width as f64 * out_height as f64 * out_fps as f64) as u64
        });

        let mut format = MediaFormat::video(MIME_VIDEO_AVC, out_width, out_height);
        format.frame_rate = Some(out_fps);
        format.key_frame_interval = Some(self.key_frame_interval);
        format.bit_rate = Some(bit_rate);
        tracing::debug!(format = %format, "video strategy");
        Ok(Some(format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(mime: &str, w: u32, h: u32, fps: u32, interval: f32) -> MediaFormat {
        let mut f = MediaFormat::video(mime, w, h);
        f.frame_rate = Some(fps);
        f.key_frame_interval = Some(interval);
        f
    }

    #[test]
    fn test_exact_follows_orientation() {
        let size = VideoSize::Exact {
            first: 720,
            second: 1280,
        };
        assert_eq!(size.resolve(1920, 1080), (1280, 720));
        assert_eq!(size.resolve(1080, 1920), (720, 1280));
    }

    #[test]
    fn test_at_most_scales_down() {
        let size = VideoSize::AtMost {
            minor: 360,
            major: 640,
        };
        assert_eq!(size.resolve(1920, 1080), (640, 360));
        assert_eq!(size.resolve(320, 240), (320, 240));
    }

    #[test]
    fn test_720x1280_preset() {
        let out = DefaultVideoStrategy::for_720x1280()
            .create_output_format(&[input("video/hevc", 1920, 1080, 60, 1.0)])
            .unwrap()
            .unwrap();
        assert!(out.is_avc());
        assert_eq!((out.width, out.height), (Some(1280), Some(720)));
        assert_eq!(out.frame_rate, Some(30));
        assert_eq!(out.bit_rate, Some(2_000_000));
        assert_eq!(out.key_frame_interval, Some(3.0));
    }

    #[test]
    fn test_already_compressed() {
        let result = DefaultVideoStrategy::for_720x1280()
            .create_output_format(&[input(MIME_VIDEO_AVC, 640, 360, 24, 5.0)]);
        assert!(matches!(result, Err(StrategyError::AlreadyCompressed)));
    }

    #[test]
    fn test_estimated_bitrate() {
        let out = DefaultVideoStrategy::default()
            .create_output_format(&[input("video/mp4v-es", 100, 100, 10, 1.0)])
            .unwrap()
            .unwrap();
        assert_eq!(out.frame_rate, Some(10));
        assert_eq!(out.bit_rate, Some(14_000));
    }

    #[test]
    fn test_missing_dimensions() {
        let f = MediaFormat {
            mime: MIME_VIDEO_AVC.into(),
            ..Default::default()
        };
        assert!(matches!(
            DefaultVideoStrategy::default().create_output_format(&[f]),
            Err(StrategyError::Unavailable(_))
        ));
    }
}
