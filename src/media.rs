//! Track model shared by every stage of the pipeline
//!
//! - `TrackType`: the two track slots (video, audio)
//! - `TrackStatus`: what the engine decided to do with a track
//! - `TrackMap`: a fixed two-slot map keyed by `TrackType`
//! - `MediaFormat`: the negotiated description of an elementary stream

use std::fmt;

/// Mime type of H.264 video
pub const MIME_VIDEO_AVC: &str = "video/avc";
/// Mime type of AAC audio
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";
/// Mime type of decoded 16-bit interleaved PCM
pub const MIME_AUDIO_RAW: &str = "audio/raw";
/// Mime type of decoded video frames
pub const MIME_VIDEO_RAW: &str = "video/raw";

/// AAC Low Complexity object type
pub const AAC_PROFILE_LC: u32 = 2;

/// Elementary stream kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    Video,
    Audio,
}

impl TrackType {
    /// Both track types, in the order the engine visits them.
    pub const ALL: [TrackType; 2] = [TrackType::Video, TrackType::Audio];
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackType::Video => write!(f, "video"),
            TrackType::Audio => write!(f, "audio"),
        }
    }
}

/// Decision taken for a single track before transcoding starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackStatus {
    /// The source has no track of this type
    #[default]
    Absent,
    /// The track exists but will not be written
    Removing,
    /// The track is copied without decoding
    PassThrough,
    /// The track is decoded, processed and re-encoded
    Compressing,
}

impl TrackStatus {
    /// True when the track is read from the source and added to the output.
    pub fn is_transcoding(&self) -> bool {
        matches!(self, TrackStatus::PassThrough | TrackStatus::Compressing)
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackStatus::Absent => "absent",
            TrackStatus::Removing => "removing",
            TrackStatus::PassThrough => "pass-through",
            TrackStatus::Compressing => "compressing",
        };
        f.write_str(s)
    }
}

/// One value per track type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMap<T> {
    pub video: T,
    pub audio: T,
}

impl<T> TrackMap<T> {
    pub fn new(video: T, audio: T) -> Self {
        Self { video, audio }
    }

    /// Build both slots from a function of the track type.
    pub fn from_fn(mut f: impl FnMut(TrackType) -> T) -> Self {
        Self {
            video: f(TrackType::Video),
            audio: f(TrackType::Audio),
        }
    }

    pub fn get(&self, track: TrackType) -> &T {
        match track {
            TrackType::Video => &self.video,
            TrackType::Audio => &self.audio,
        }
    }

    pub fn get_mut(&mut self, track: TrackType) -> &mut T {
        match track {
            TrackType::Video => &mut self.video,
            TrackType::Audio => &mut self.audio,
        }
    }

    pub fn set(&mut self, track: TrackType, value: T) {
        *self.get_mut(track) = value;
    }

    /// Iterate video first, then audio.
    pub fn iter(&self) -> impl Iterator<Item = (TrackType, &T)> {
        [(TrackType::Video, &self.video), (TrackType::Audio, &self.audio)].into_iter()
    }

    pub fn map<U>(self, mut f: impl FnMut(TrackType, T) -> U) -> TrackMap<U> {
        TrackMap {
            video: f(TrackType::Video, self.video),
            audio: f(TrackType::Audio, self.audio),
        }
    }
}

impl<T> IntoIterator for TrackMap<T> {
    type Item = (TrackType, T);
    type IntoIter = std::array::IntoIter<(TrackType, T), 2>;

    fn into_iter(self) -> Self::IntoIter {
        [(TrackType::Video, self.video), (TrackType::Audio, self.audio)].into_iter()
    }
}

impl TrackMap<TrackStatus> {
    /// Number of tracks that are read and written.
    pub fn active_count(&self) -> usize {
        self.iter().filter(|(_, s)| s.is_transcoding()).count()
    }
}

/// Description of an elementary stream, as reported by a source, requested by a
/// strategy, or determined by a codec.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaFormat {
    pub mime: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    /// Seconds between key frames
    pub key_frame_interval: Option<f32>,
    pub bit_rate: Option<u64>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
    pub aac_profile: Option<u32>,
    pub rotation_degrees: Option<i32>,
    pub duration_us: Option<i64>,
    /// Largest chunk the source can produce for this track
    pub max_input_size: Option<usize>,
    /// Codec specific data (SPS/PPS, AudioSpecificConfig)
    pub codec_private: Vec<u8>,
}

impl MediaFormat {
    pub fn video(mime: &str, width: u32, height: u32) -> Self {
        Self {
            mime: mime.to_string(),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    pub fn audio(mime: &str, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            mime: mime.to_string(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Default::default()
        }
    }

    /// Track type implied by the mime prefix.
    pub fn track_type(&self) -> Option<TrackType> {
        if self.mime.starts_with("video/") {
            Some(TrackType::Video)
        } else if self.mime.starts_with("audio/") {
            Some(TrackType::Audio)
        } else {
            None
        }
    }

    pub fn is_avc(&self) -> bool {
        self.mime == MIME_VIDEO_AVC
    }

    pub fn is_aac(&self) -> bool {
        self.mime == MIME_AUDIO_AAC
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime)?;
        if let (Some(w), Some(h)) = (self.width, self.height) {
            write!(f, " {}x{}", w, h)?;
        }
        if let Some(fps) = self.frame_rate {
            write!(f, " @{}fps", fps)?;
        }
        if let Some(rate) = self.sample_rate {
            write!(f, " {}Hz", rate)?;
        }
        if let Some(ch) = self.channel_count {
            write!(f, " {}ch", ch)?;
        }
        if let Some(br) = self.bit_rate {
            write!(f, " {}bps", br)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transcoding() {
        assert!(!TrackStatus::Absent.is_transcoding());
        assert!(!TrackStatus::Removing.is_transcoding());
        assert!(TrackStatus::PassThrough.is_transcoding());
        assert!(TrackStatus::Compressing.is_transcoding());
    }

    #[test]
    fn test_track_map_order() {
        let map = TrackMap::new(1, 2);
        let order: Vec<_> = map.iter().map(|(t, v)| (t, *v)).collect();
        assert_eq!(order, vec![(TrackType::Video, 1), (TrackType::Audio, 2)]);
    }

    #[test]
    fn test_active_count() {
        let statuses = TrackMap::new(TrackStatus::Compressing, TrackStatus::Absent);
        assert_eq!(statuses.active_count(), 1);
    }

    #[test]
    fn test_track_type_from_mime() {
        assert_eq!(
            MediaFormat::video(MIME_VIDEO_AVC, 1, 1).track_type(),
            Some(TrackType::Video)
        );
        assert_eq!(
            MediaFormat::audio(MIME_AUDIO_AAC, 44100, 2).track_type(),
            Some(TrackType::Audio)
        );
        assert_eq!(MediaFormat::default().track_type(), None);
    }
}
