//! EBML element ids used by the demuxer.
//!
//! Ids are stored with their VINT marker bits intact, exactly as they appear
//! on the wire, and are compared bit-for-bit against these constants.

// ============================================================================
// Top level
// ============================================================================

/// EBML header (root of the document header).
pub const EBML: u32 = 0x1A45DFA3;
/// Segment (main container).
pub const SEGMENT: u32 = 0x18538067;
/// Void (padding, skippable anywhere).
pub const VOID: u32 = 0xEC;
/// CRC-32 checksum.
pub const CRC32: u32 = 0xBF;

// ============================================================================
// SeekHead
// ============================================================================

/// SeekHead (index for faster top-level navigation).
pub const SEEK_HEAD: u32 = 0x114D9B74;
/// Seek (single entry in SeekHead).
pub const SEEK: u32 = 0x4DBB;
/// SeekID (element id being indexed).
pub const SEEK_ID: u32 = 0x53AB;
/// SeekPosition (byte position relative to the segment).
pub const SEEK_POSITION: u32 = 0x53AC;

// ============================================================================
// Info
// ============================================================================

/// Info (segment information).
pub const INFO: u32 = 0x1549A966;
/// Timecode scale (nanoseconds per tick).
pub const TIMECODE_SCALE: u32 = 0x2AD7B1;
/// Duration (in timecode units, float).
pub const DURATION: u32 = 0x4489;
/// Title.
pub const TITLE: u32 = 0x7BA9;
/// Muxing application.
pub const MUXING_APP: u32 = 0x4D80;
/// Writing application.
pub const WRITING_APP: u32 = 0x5741;

// ============================================================================
// Tracks
// ============================================================================

/// Tracks container.
pub const TRACKS: u32 = 0x1654AE6B;
/// Track entry.
pub const TRACK_ENTRY: u32 = 0xAE;
/// Track number.
pub const TRACK_NUMBER: u32 = 0xD7;
/// Track type (1 = video, 2 = audio).
pub const TRACK_TYPE: u32 = 0x83;
/// Codec id string.
pub const CODEC_ID: u32 = 0x86;
/// Codec private data.
pub const CODEC_PRIVATE: u32 = 0x63A2;

/// Video settings container.
pub const VIDEO: u32 = 0xE0;
/// Pixel width.
pub const PIXEL_WIDTH: u32 = 0xB0;
/// Pixel height.
pub const PIXEL_HEIGHT: u32 = 0xBA;
/// Display width.
pub const DISPLAY_WIDTH: u32 = 0x54B0;
/// Display height.
pub const DISPLAY_HEIGHT: u32 = 0x54BA;
/// Pixel crop bottom.
pub const PIXEL_CROP_BOTTOM: u32 = 0x54AA;
/// Pixel crop top.
pub const PIXEL_CROP_TOP: u32 = 0x54BB;
/// Pixel crop left.
pub const PIXEL_CROP_LEFT: u32 = 0x54CC;
/// Pixel crop right.
pub const PIXEL_CROP_RIGHT: u32 = 0x54DD;

/// Audio settings container.
pub const AUDIO: u32 = 0xE1;
/// Sampling frequency (float).
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
/// Channel count.
pub const CHANNELS: u32 = 0x9F;
/// Bits per sample.
pub const BIT_DEPTH: u32 = 0x6264;

/// Video track type value.
pub const TRACK_TYPE_VIDEO: u64 = 1;
/// Audio track type value.
pub const TRACK_TYPE_AUDIO: u64 = 2;

// ============================================================================
// Cues
// ============================================================================

/// Cues (seeking index).
pub const CUES: u32 = 0x1C53BB6B;
/// Cue point.
pub const CUE_POINT: u32 = 0xBB;
/// Cue time.
pub const CUE_TIME: u32 = 0xB3;
/// Cue track positions.
pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
/// Cue track.
pub const CUE_TRACK: u32 = 0xF7;
/// Cue cluster position.
pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
/// Cue relative position.
pub const CUE_RELATIVE_POSITION: u32 = 0xF0;
/// Cue block number.
pub const CUE_BLOCK_NUMBER: u32 = 0x5378;

// ============================================================================
// Clusters
// ============================================================================

/// Cluster (container for time-grouped blocks).
pub const CLUSTER: u32 = 0x1F43B675;
/// Cluster timestamp in timecode units.
pub const TIMESTAMP: u32 = 0xE7;
/// Simple block (combined block with flags).
pub const SIMPLE_BLOCK: u32 = 0xA3;
/// Block group.
pub const BLOCK_GROUP: u32 = 0xA0;
/// Block.
pub const BLOCK: u32 = 0xA1;
/// Block duration.
pub const BLOCK_DURATION: u32 = 0x9B;
/// Reference block (present on non-keyframes).
pub const REFERENCE_BLOCK: u32 = 0xFB;

/// Get a human-readable name for an element id.
pub fn element_name(id: u32) -> &'static str {
    match id {
        EBML => "EBML",
        SEGMENT => "Segment",
        VOID => "Void",
        CRC32 => "CRC-32",
        SEEK_HEAD => "SeekHead",
        SEEK => "Seek",
        SEEK_ID => "SeekID",
        SEEK_POSITION => "SeekPosition",
        INFO => "Info",
        TIMECODE_SCALE => "TimecodeScale",
        DURATION => "Duration",
        TITLE => "Title",
        MUXING_APP => "MuxingApp",
        WRITING_APP => "WritingApp",
        TRACKS => "Tracks",
        TRACK_ENTRY => "TrackEntry",
        TRACK_NUMBER => "TrackNumber",
        TRACK_TYPE => "TrackType",
        CODEC_ID => "CodecID",
        CODEC_PRIVATE => "CodecPrivate",
        VIDEO => "Video",
        PIXEL_WIDTH => "PixelWidth",
        PIXEL_HEIGHT => "PixelHeight",
        DISPLAY_WIDTH => "DisplayWidth",
        DISPLAY_HEIGHT => "DisplayHeight",
        AUDIO => "Audio",
        SAMPLING_FREQUENCY => "SamplingFrequency",
        CHANNELS => "Channels",
        BIT_DEPTH => "BitDepth",
        CUES => "Cues",
        CUE_POINT => "CuePoint",
        CUE_TIME => "CueTime",
        CUE_TRACK_POSITIONS => "CueTrackPositions",
        CLUSTER => "Cluster",
        TIMESTAMP => "Timestamp",
        SIMPLE_BLOCK => "SimpleBlock",
        BLOCK_GROUP => "BlockGroup",
        BLOCK => "Block",
        BLOCK_DURATION => "BlockDuration",
        REFERENCE_BLOCK => "ReferenceBlock",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_element_names() {
        assert_eq!(element_name(EBML), "EBML");
        assert_eq!(element_name(CLUSTER), "Cluster");
        assert_eq!(element_name(SIMPLE_BLOCK), "SimpleBlock");
        assert_eq!(element_name(0xFFFF_FFFF), "Unknown");
    }
}
