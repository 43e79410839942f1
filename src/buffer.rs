//! Buffer descriptors passed between sources, codecs and sinks

use std::ops::{BitOr, BitOrAssign};

use crate::media::TrackType;

/// Per-buffer flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(2);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(4);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_key_frame(&self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub fn is_codec_config(&self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }

    /// These flags with every bit of `other` cleared
    pub fn without(self, other: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 & !other.0)
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        BufferFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A compressed chunk read from a source into a caller-owned buffer.
///
/// The chunk borrows the buffer it was read into, so it cannot outlive the
/// read step that produced it.
#[derive(Debug)]
pub struct Chunk<'a> {
    pub data: &'a [u8],
    pub timestamp_us: i64,
    pub key_frame: bool,
}

impl Chunk<'_> {
    pub fn bytes(&self) -> usize {
        self.data.len()
    }

    pub fn flags(&self) -> BufferFlags {
        if self.key_frame {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::NONE
        }
    }
}

/// Metadata of a filled codec output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn new(size: usize, presentation_time_us: i64, flags: BufferFlags) -> Self {
        Self {
            offset: 0,
            size,
            presentation_time_us,
            flags,
        }
    }
}

/// An encoded sample on its way to the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedSample {
    pub track: TrackType,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.is_key_frame());
        assert!(flags.is_end_of_stream());
        assert!(!flags.is_codec_config());
        assert_eq!(flags.bits(), 5);
        assert_eq!(flags.without(BufferFlags::END_OF_STREAM), BufferFlags::KEY_FRAME);
    }

    #[test]
    fn test_chunk_flags() {
        let data = [0u8; 4];
        let chunk = Chunk {
            data: &data,
            timestamp_us: 10,
            key_frame: true,
        };
        assert_eq!(chunk.bytes(), 4);
        assert_eq!(chunk.flags(), BufferFlags::KEY_FRAME);
    }
}
