//! Inputs of one operation
//!
//! Every track reads an ordered list of sources, one after the other. A
//! source carrying both tracks is stored once and appears in both lists, so
//! the video and audio steps can point at the same container.

use super::DataSource;
use crate::media::{TrackMap, TrackType};

#[derive(Default)]
pub struct SourceSet {
    sources: Vec<Box<dyn DataSource>>,
    tracks: TrackMap<Vec<usize>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set reading every track from a single source
    pub fn single(source: Box<dyn DataSource>) -> Self {
        let mut set = Self::new();
        set.add(source);
        set
    }

    /// Append a source to the list of every track it carries.
    pub fn add(&mut self, source: Box<dyn DataSource>) {
        let index = self.sources.len();
        for track in TrackType::ALL {
            if source.track_format(track).is_some() {
                self.tracks.get_mut(track).push(index);
            }
        }
        self.sources.push(source);
    }

    /// Append a source to the list of `track` only.
    pub fn add_for(&mut self, track: TrackType, source: Box<dyn DataSource>) {
        self.tracks.get_mut(track).push(self.sources.len());
        self.sources.push(source);
    }

    /// True when no track has a source
    pub fn is_empty(&self) -> bool {
        self.tracks.iter().all(|(_, list)| list.is_empty())
    }

    /// Number of sources `track` reads in turn
    pub fn steps(&self, track: TrackType) -> usize {
        self.tracks.get(track).len()
    }

    /// Index of the source read by `track` at `step`
    pub fn index(&self, track: TrackType, step: usize) -> Option<usize> {
        self.tracks.get(track).get(step).copied()
    }

    /// Sources of `track`, in reading order
    pub fn for_track(&self, track: TrackType) -> impl Iterator<Item = &dyn DataSource> + '_ {
        self.tracks
            .get(track)
            .iter()
            .map(move |&index| self.sources[index].as_ref())
    }

    pub fn get(&self, index: usize) -> &dyn DataSource {
        self.sources[index].as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> &mut dyn DataSource {
        self.sources[index].as_mut()
    }

    /// Sum of the source durations of `track`, or -1 when a source does not
    /// know its duration or the track has no source.
    pub fn duration_us(&self, track: TrackType) -> i64 {
        let mut total = 0;
        for source in self.for_track(track) {
            let duration = source.duration_us(track);
            if duration <= 0 {
                return -1;
            }
            total += duration;
        }
        if self.tracks.get(track).is_empty() {
            -1
        } else {
            total
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::MockSource;

    #[test]
    fn test_add_follows_carried_tracks() {
        let mut set = SourceSet::new();
        set.add(Box::new(MockSource::video_only(2, 100_000).with_audio(2, 100, 1000, 1)));
        set.add(Box::new(MockSource::video_only(3, 100_000)));
        set.add_for(TrackType::Audio, Box::new(MockSource::audio_only(1, 100, 1000, 1)));

        assert_eq!(set.steps(TrackType::Video), 2);
        assert_eq!(set.steps(TrackType::Audio), 2);
        assert_eq!(set.index(TrackType::Video, 1), Some(1));
        assert_eq!(set.index(TrackType::Audio, 1), Some(2));
        assert_eq!(set.index(TrackType::Audio, 2), None);
        assert_eq!(set.duration_us(TrackType::Video), 500_000);
        assert_eq!(set.duration_us(TrackType::Audio), 300_000);
    }

    #[test]
    fn test_duration_unknown() {
        assert!(SourceSet::new().is_empty());
        let set = SourceSet::single(Box::new(MockSource::video_only(2, 100_000)));
        assert!(!set.is_empty());
        assert_eq!(set.duration_us(TrackType::Audio), -1);
    }
}
