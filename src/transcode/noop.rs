use super::{StepContext, TrackTranscoder};
use crate::error::Result;
use crate::media::TrackType;

/// Transcoder for absent and removed tracks
#[derive(Debug)]
pub struct NoOpTrackTranscoder {
    track: TrackType,
}

impl NoOpTrackTranscoder {
    pub fn new(track: TrackType) -> Self {
        Self { track }
    }
}

impl TrackTranscoder for NoOpTrackTranscoder {
    fn track(&self) -> TrackType {
        self.track
    }

    fn step(&mut self, _ctx: &mut StepContext<'_>, _force_eos: bool) -> Result<bool> {
        Ok(false)
    }

    fn is_finished(&self) -> bool {
        true
    }

    fn position_us(&self) -> i64 {
        0
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
