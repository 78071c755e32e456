//! Resumable parsers for the segment-level metadata elements: SeekHead,
//! Info, Tracks and Cues.
//!
//! Each parser is constructed from the element header found by the scan
//! loop and then driven with `load` until it returns `Ready`. Partial
//! progress (current child header, half-built entry) lives inside the
//! parser, so a `Pending` return leaves the cursor and the parser in a
//! state where the next call continues exactly where this one stopped.

use tracing::{debug, warn};

use crate::cursor::{peek_into, ByteCursor};
use crate::ebml::ElementHeader;
use crate::elements;
use crate::error::{ready, Result, Step};
use crate::source::ByteSource;

/// One entry of a SeekHead: which top-level element lives where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekEntry {
    /// Id of the indexed element, marker bits retained.
    pub id: u32,
    /// Byte position relative to the start of the segment payload.
    pub position: u64,
}

#[derive(Debug)]
struct SeekEntryState {
    end: u64,
    slot: Option<ElementHeader>,
    id: u32,
    position: u64,
}

/// The SeekHead index.
#[derive(Debug)]
pub struct SeekHead {
    /// Header of the SeekHead element itself.
    pub header: ElementHeader,
    /// Decoded entries, in file order.
    pub entries: Vec<SeekEntry>,
    /// True once the whole payload has been consumed.
    pub loaded: bool,
    slot: Option<ElementHeader>,
    current: Option<SeekEntryState>,
}

impl SeekHead {
    pub fn new(header: ElementHeader) -> Self {
        Self {
            header,
            entries: Vec::new(),
            loaded: false,
            slot: None,
            current: None,
        }
    }

    /// Consume the SeekHead payload.
    pub fn load<S: ByteSource>(&mut self, cursor: &mut ByteCursor<S>) -> Result<Step<()>> {
        let end = self.header.end();
        loop {
            if let Some(state) = self.current.as_mut() {
                while cursor.offset() < state.end {
                    let child = ready!(peek_into(&mut state.slot, cursor)?);
                    match child.id {
                        // Ids are at most 4 octets; a wider payload cannot
                        // name a real element and must not truncate into one.
                        elements::SEEK_ID if (1..=4).contains(&child.size) => {
                            state.id = ready!(cursor.read_uint(child.size)?) as u32;
                        }
                        elements::SEEK_ID => {
                            warn!(size = child.size, "SeekID payload is not a valid id width");
                            ready!(cursor.skip(child.size)?);
                        }
                        elements::SEEK_POSITION => {
                            state.position = ready!(cursor.read_uint(child.size)?);
                        }
                        _ => {
                            debug!(id = child.id, name = elements::element_name(child.id),
                                "skipping element inside Seek");
                            ready!(cursor.skip(child.size)?);
                        }
                    }
                    state.slot = None;
                }
                self.entries.push(SeekEntry {
                    id: state.id,
                    position: state.position,
                });
                self.current = None;
            }
            if cursor.offset() >= end {
                break;
            }
            let child = ready!(peek_into(&mut self.slot, cursor)?);
            match child.id {
                elements::SEEK => {
                    self.current = Some(SeekEntryState {
                        end: child.end(),
                        slot: None,
                        id: 0,
                        position: 0,
                    });
                }
                _ => {
                    debug!(id = child.id, name = elements::element_name(child.id),
                        "skipping element inside SeekHead");
                    ready!(cursor.skip(child.size)?);
                }
            }
            self.slot = None;
        }
        self.loaded = true;
        Ok(Step::Ready(()))
    }
}

/// Segment information: timing scale, duration, labels.
#[derive(Debug)]
pub struct SegmentInfo {
    /// Header of the Info element itself.
    pub header: ElementHeader,
    /// Nanoseconds per timecode tick. Defaults to one millisecond.
    pub timecode_scale: u64,
    /// Duration in raw timecode units; negative when absent.
    pub duration: f64,
    /// Segment title.
    pub title: Option<String>,
    /// Name of the muxing application.
    pub muxing_app: Option<String>,
    /// Name of the writing application.
    pub writing_app: Option<String>,
    /// True once the whole payload has been consumed.
    pub loaded: bool,
    slot: Option<ElementHeader>,
}

impl SegmentInfo {
    pub fn new(header: ElementHeader) -> Self {
        Self {
            header,
            timecode_scale: 1_000_000,
            duration: -1.0,
            title: None,
            muxing_app: None,
            writing_app: None,
            loaded: false,
            slot: None,
        }
    }

    /// Consume the Info payload.
    pub fn load<S: ByteSource>(&mut self, cursor: &mut ByteCursor<S>) -> Result<Step<()>> {
        let end = self.header.end();
        while cursor.offset() < end {
            let child = ready!(peek_into(&mut self.slot, cursor)?);
            match child.id {
                elements::TIMECODE_SCALE => {
                    self.timecode_scale = ready!(cursor.read_uint(child.size)?);
                }
                elements::DURATION => {
                    self.duration = ready!(cursor.read_float(child.size)?);
                }
                elements::TITLE => {
                    self.title = Some(ready!(cursor.read_string(child.size)?));
                }
                elements::MUXING_APP => {
                    self.muxing_app = Some(ready!(cursor.read_string(child.size)?));
                }
                elements::WRITING_APP => {
                    self.writing_app = Some(ready!(cursor.read_string(child.size)?));
                }
                _ => {
                    debug!(id = child.id, name = elements::element_name(child.id),
                        "skipping element inside Info");
                    ready!(cursor.skip(child.size)?);
                }
            }
            self.slot = None;
        }
        self.loaded = true;
        Ok(Step::Ready(()))
    }
}

/// One TrackEntry, with video and audio settings flattened in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackEntry {
    pub track_number: u64,
    pub track_type: u64,
    pub codec_id: String,
    pub codec_private: Option<Vec<u8>>,
    // Video settings.
    pub width: u64,
    pub height: u64,
    pub display_width: u64,
    pub display_height: u64,
    pub pixel_crop_left: u64,
    pub pixel_crop_top: u64,
    pub pixel_crop_right: u64,
    pub pixel_crop_bottom: u64,
    // Audio settings.
    pub channels: u64,
    pub rate: f64,
    pub bit_depth: u64,
}

#[derive(Debug)]
struct TrackEntryState {
    end: u64,
    slot: Option<ElementHeader>,
    entry: TrackEntry,
}

/// The Tracks container.
#[derive(Debug)]
pub struct Tracks {
    /// Header of the Tracks element itself.
    pub header: ElementHeader,
    /// Decoded track entries, in file order.
    pub entries: Vec<TrackEntry>,
    /// True once the whole payload has been consumed.
    pub loaded: bool,
    slot: Option<ElementHeader>,
    current: Option<TrackEntryState>,
}

impl Tracks {
    pub fn new(header: ElementHeader) -> Self {
        Self {
            header,
            entries: Vec::new(),
            loaded: false,
            slot: None,
            current: None,
        }
    }

    /// Consume the Tracks payload.
    ///
    /// The Video and Audio settings containers are not given their own
    /// parsers; their headers are consumed and their children decoded in
    /// the same loop, which works because each settles inside the entry's
    /// extent.
    pub fn load<S: ByteSource>(&mut self, cursor: &mut ByteCursor<S>) -> Result<Step<()>> {
        let end = self.header.end();
        loop {
            if let Some(state) = self.current.as_mut() {
                while cursor.offset() < state.end {
                    let child = ready!(peek_into(&mut state.slot, cursor)?);
                    match child.id {
                        elements::TRACK_NUMBER => {
                            state.entry.track_number = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::TRACK_TYPE => {
                            state.entry.track_type = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::CODEC_ID => {
                            state.entry.codec_id = ready!(cursor.read_string(child.size)?);
                        }
                        elements::CODEC_PRIVATE => {
                            state.entry.codec_private =
                                Some(ready!(cursor.read_binary(child.size)?));
                        }
                        // Descend: the settings children follow immediately.
                        elements::VIDEO | elements::AUDIO => {}
                        elements::PIXEL_WIDTH => {
                            state.entry.width = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::PIXEL_HEIGHT => {
                            state.entry.height = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::DISPLAY_WIDTH => {
                            state.entry.display_width = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::DISPLAY_HEIGHT => {
                            state.entry.display_height = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::PIXEL_CROP_LEFT => {
                            state.entry.pixel_crop_left = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::PIXEL_CROP_TOP => {
                            state.entry.pixel_crop_top = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::PIXEL_CROP_RIGHT => {
                            state.entry.pixel_crop_right = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::PIXEL_CROP_BOTTOM => {
                            state.entry.pixel_crop_bottom = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::SAMPLING_FREQUENCY => {
                            state.entry.rate = ready!(cursor.read_float(child.size)?);
                        }
                        elements::CHANNELS => {
                            state.entry.channels = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::BIT_DEPTH => {
                            state.entry.bit_depth = ready!(cursor.read_uint(child.size)?);
                        }
                        _ => {
                            debug!(id = child.id, name = elements::element_name(child.id),
                                "skipping element inside TrackEntry");
                            ready!(cursor.skip(child.size)?);
                        }
                    }
                    state.slot = None;
                }
                let state = match self.current.take() {
                    Some(s) => s,
                    None => break,
                };
                self.entries.push(state.entry);
            }
            if cursor.offset() >= end {
                break;
            }
            let child = ready!(peek_into(&mut self.slot, cursor)?);
            match child.id {
                elements::TRACK_ENTRY => {
                    self.current = Some(TrackEntryState {
                        end: child.end(),
                        slot: None,
                        entry: TrackEntry::default(),
                    });
                }
                _ => {
                    debug!(id = child.id, name = elements::element_name(child.id),
                        "skipping element inside Tracks");
                    ready!(cursor.skip(child.size)?);
                }
            }
            self.slot = None;
        }
        self.loaded = true;
        Ok(Step::Ready(()))
    }
}

/// Positions of one cue point on one track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CueTrackPosition {
    /// Track this position refers to.
    pub track: u64,
    /// Cluster byte position relative to the segment payload.
    pub cluster_position: u64,
    /// Block byte position relative to the cluster, when present.
    pub relative_position: Option<u64>,
    /// Ordinal of the block inside its cluster, when present.
    pub block_number: Option<u64>,
}

/// One cue point: a timestamp and where to find it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CuePoint {
    /// Cue time in timecode units.
    pub time: u64,
    /// One position per indexed track.
    pub positions: Vec<CueTrackPosition>,
}

#[derive(Debug)]
struct CueTrackPosState {
    end: u64,
    slot: Option<ElementHeader>,
    pos: CueTrackPosition,
}

#[derive(Debug)]
struct CuePointState {
    end: u64,
    slot: Option<ElementHeader>,
    point: CuePoint,
    pos: Option<CueTrackPosState>,
}

/// The Cues seeking index.
#[derive(Debug)]
pub struct Cues {
    /// Header of the Cues element itself.
    pub header: ElementHeader,
    /// Decoded cue points, in file order.
    pub entries: Vec<CuePoint>,
    /// True once the whole payload has been consumed.
    pub loaded: bool,
    slot: Option<ElementHeader>,
    current: Option<CuePointState>,
}

impl Cues {
    pub fn new(header: ElementHeader) -> Self {
        Self {
            header,
            entries: Vec::new(),
            loaded: false,
            slot: None,
            current: None,
        }
    }

    /// Consume the Cues payload.
    pub fn load<S: ByteSource>(&mut self, cursor: &mut ByteCursor<S>) -> Result<Step<()>> {
        let end = self.header.end();
        loop {
            if let Some(state) = self.current.as_mut() {
                loop {
                    if let Some(pos) = state.pos.as_mut() {
                        while cursor.offset() < pos.end {
                            let child = ready!(peek_into(&mut pos.slot, cursor)?);
                            match child.id {
                                elements::CUE_TRACK => {
                                    pos.pos.track = ready!(cursor.read_uint(child.size)?);
                                }
                                elements::CUE_CLUSTER_POSITION => {
                                    pos.pos.cluster_position =
                                        ready!(cursor.read_uint(child.size)?);
                                }
                                elements::CUE_RELATIVE_POSITION => {
                                    pos.pos.relative_position =
                                        Some(ready!(cursor.read_uint(child.size)?));
                                }
                                elements::CUE_BLOCK_NUMBER => {
                                    pos.pos.block_number =
                                        Some(ready!(cursor.read_uint(child.size)?));
                                }
                                _ => {
                                    debug!(id = child.id,
                                        name = elements::element_name(child.id),
                                        "skipping element inside CueTrackPositions");
                                    ready!(cursor.skip(child.size)?);
                                }
                            }
                            pos.slot = None;
                        }
                        let pos = match state.pos.take() {
                            Some(p) => p,
                            None => break,
                        };
                        state.point.positions.push(pos.pos);
                    }
                    if cursor.offset() >= state.end {
                        break;
                    }
                    let child = ready!(peek_into(&mut state.slot, cursor)?);
                    match child.id {
                        elements::CUE_TIME => {
                            state.point.time = ready!(cursor.read_uint(child.size)?);
                        }
                        elements::CUE_TRACK_POSITIONS => {
                            state.pos = Some(CueTrackPosState {
                                end: child.end(),
                                slot: None,
                                pos: CueTrackPosition::default(),
                            });
                        }
                        _ => {
                            debug!(id = child.id, name = elements::element_name(child.id),
                                "skipping element inside CuePoint");
                            ready!(cursor.skip(child.size)?);
                        }
                    }
                    state.slot = None;
                }
                let state = match self.current.take() {
                    Some(s) => s,
                    None => break,
                };
                self.entries.push(state.point);
            }
            if cursor.offset() >= end {
                break;
            }
            let child = ready!(peek_into(&mut self.slot, cursor)?);
            match child.id {
                elements::CUE_POINT => {
                    self.current = Some(CuePointState {
                        end: child.end(),
                        slot: None,
                        point: CuePoint::default(),
                        pos: None,
                    });
                }
                _ => {
                    debug!(id = child.id, name = elements::element_name(child.id),
                        "skipping element inside Cues");
                    ready!(cursor.skip(child.size)?);
                }
            }
            self.slot = None;
        }
        self.loaded = true;
        Ok(Step::Ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn drive<T>(
        cursor: &mut ByteCursor<crate::source::MemorySource>,
        mut op: impl FnMut(&mut ByteCursor<crate::source::MemorySource>) -> Result<Step<T>>,
    ) -> T {
        loop {
            match op(cursor).unwrap() {
                Step::Ready(v) => return v,
                Step::Pending => cursor.receive_input().unwrap(),
            }
        }
    }

    fn header_of(cursor: &mut ByteCursor<crate::source::MemorySource>) -> ElementHeader {
        drive(cursor, |c| c.peek_element())
    }

    #[test]
    fn seek_head_entries() {
        let seek = [
            el(
                elements::SEEK,
                &[
                    uint_el(elements::SEEK_ID, elements::CUES as u64),
                    uint_el(elements::SEEK_POSITION, 4096),
                ]
                .concat(),
            ),
            el(
                elements::SEEK,
                &[
                    uint_el(elements::SEEK_ID, elements::TRACKS as u64),
                    uint_el(elements::SEEK_POSITION, 200),
                ]
                .concat(),
            ),
        ]
        .concat();
        let data = el(elements::SEEK_HEAD, &seek);

        for chunk in [1, 3, 64] {
            let mut cursor = cursor_over(data.clone(), chunk);
            let header = header_of(&mut cursor);
            let mut seek_head = SeekHead::new(header);
            drive(&mut cursor, |c| seek_head.load(c));
            assert!(seek_head.loaded);
            assert_eq!(
                seek_head.entries,
                vec![
                    SeekEntry { id: elements::CUES, position: 4096 },
                    SeekEntry { id: elements::TRACKS, position: 200 },
                ]
            );
        }
    }

    #[test]
    fn oversized_seek_id_is_skipped_not_truncated() {
        // An 8-byte SeekID cannot be a real id; the low 32 bits must not
        // leak through as one.
        let seek = el(
            elements::SEEK,
            &[
                el(elements::SEEK_ID, &[0xFF; 8]),
                uint_el(elements::SEEK_POSITION, 77),
            ]
            .concat(),
        );
        let data = el(elements::SEEK_HEAD, &seek);
        let mut cursor = cursor_over(data, 64);
        let header = header_of(&mut cursor);
        let mut seek_head = SeekHead::new(header);
        drive(&mut cursor, |c| seek_head.load(c));
        assert!(seek_head.loaded);
        assert_eq!(seek_head.entries.len(), 1);
        assert_eq!(seek_head.entries[0].id, 0);
        assert_eq!(seek_head.entries[0].position, 77);
    }

    #[test]
    fn info_fields_and_defaults() {
        let payload = [
            uint_el(elements::TIMECODE_SCALE, 1_000_000),
            float_el(elements::DURATION, 8000.0),
            str_el(elements::TITLE, "demo"),
            str_el(elements::MUXING_APP, "mux"),
            str_el(elements::WRITING_APP, "write"),
            // An element the parser does not know; must be skipped.
            el(0xEC, &[0, 0, 0]),
        ]
        .concat();
        let data = el(elements::INFO, &payload);
        let mut cursor = cursor_over(data, 5);
        let header = header_of(&mut cursor);
        let mut info = SegmentInfo::new(header);
        drive(&mut cursor, |c| info.load(c));
        assert!(info.loaded);
        assert_eq!(info.timecode_scale, 1_000_000);
        assert_eq!(info.duration, 8000.0);
        assert_eq!(info.title.as_deref(), Some("demo"));
        assert_eq!(info.muxing_app.as_deref(), Some("mux"));
        assert_eq!(info.writing_app.as_deref(), Some("write"));
    }

    #[test]
    fn info_duration_defaults_negative() {
        let data = el(elements::INFO, &uint_el(elements::TIMECODE_SCALE, 1_000_000));
        let mut cursor = cursor_over(data, 64);
        let header = header_of(&mut cursor);
        let mut info = SegmentInfo::new(header);
        drive(&mut cursor, |c| info.load(c));
        assert!(info.duration < 0.0);
    }

    #[test]
    fn tracks_video_and_audio_entries() {
        let video = el(
            elements::TRACK_ENTRY,
            &[
                uint_el(elements::TRACK_NUMBER, 1),
                uint_el(elements::TRACK_TYPE, 1),
                str_el(elements::CODEC_ID, "V_VP8"),
                el(
                    elements::VIDEO,
                    &[
                        uint_el(elements::PIXEL_WIDTH, 640),
                        uint_el(elements::PIXEL_HEIGHT, 360),
                        uint_el(elements::DISPLAY_WIDTH, 1280),
                        uint_el(elements::DISPLAY_HEIGHT, 720),
                        uint_el(elements::PIXEL_CROP_LEFT, 2),
                        uint_el(elements::PIXEL_CROP_RIGHT, 4),
                    ]
                    .concat(),
                ),
            ]
            .concat(),
        );
        let audio = el(
            elements::TRACK_ENTRY,
            &[
                uint_el(elements::TRACK_NUMBER, 2),
                uint_el(elements::TRACK_TYPE, 2),
                str_el(elements::CODEC_ID, "A_VORBIS"),
                el(elements::CODEC_PRIVATE, &[2, 1, 1, 0xAA, 0xBB, 0xCC]),
                el(
                    elements::AUDIO,
                    &[
                        float32_el(elements::SAMPLING_FREQUENCY, 48000.0),
                        uint_el(elements::CHANNELS, 2),
                        uint_el(elements::BIT_DEPTH, 16),
                    ]
                    .concat(),
                ),
            ]
            .concat(),
        );
        let data = el(elements::TRACKS, &[video, audio].concat());

        for chunk in [1, 7, 256] {
            let mut cursor = cursor_over(data.clone(), chunk);
            let header = header_of(&mut cursor);
            let mut tracks = Tracks::new(header);
            drive(&mut cursor, |c| tracks.load(c));
            assert!(tracks.loaded);
            assert_eq!(tracks.entries.len(), 2);

            let v = &tracks.entries[0];
            assert_eq!(v.track_number, 1);
            assert_eq!(v.track_type, 1);
            assert_eq!(v.codec_id, "V_VP8");
            assert_eq!((v.width, v.height), (640, 360));
            assert_eq!((v.display_width, v.display_height), (1280, 720));
            assert_eq!((v.pixel_crop_left, v.pixel_crop_right), (2, 4));

            let a = &tracks.entries[1];
            assert_eq!(a.track_number, 2);
            assert_eq!(a.track_type, 2);
            assert_eq!(a.codec_id, "A_VORBIS");
            assert_eq!(a.codec_private.as_deref(), Some(&[2, 1, 1, 0xAA, 0xBB, 0xCC][..]));
            assert_eq!(a.rate, 48000.0);
            assert_eq!(a.channels, 2);
            assert_eq!(a.bit_depth, 16);
        }
    }

    #[test]
    fn cues_nested_positions() {
        let point = |time: u64, cluster: u64| {
            el(
                elements::CUE_POINT,
                &[
                    uint_el(elements::CUE_TIME, time),
                    el(
                        elements::CUE_TRACK_POSITIONS,
                        &[
                            uint_el(elements::CUE_TRACK, 1),
                            uint_el(elements::CUE_CLUSTER_POSITION, cluster),
                            uint_el(elements::CUE_BLOCK_NUMBER, 1),
                        ]
                        .concat(),
                    ),
                ]
                .concat(),
            )
        };
        let data = el(
            elements::CUES,
            &[point(0, 100), point(2000, 500), point(5000, 900)].concat(),
        );

        for chunk in [1, 4, 128] {
            let mut cursor = cursor_over(data.clone(), chunk);
            let header = header_of(&mut cursor);
            let mut cues = Cues::new(header);
            drive(&mut cursor, |c| cues.load(c));
            assert!(cues.loaded);
            assert_eq!(cues.entries.len(), 3);
            assert_eq!(cues.entries[1].time, 2000);
            assert_eq!(cues.entries[1].positions.len(), 1);
            let pos = cues.entries[1].positions[0];
            assert_eq!(pos.track, 1);
            assert_eq!(pos.cluster_position, 500);
            assert_eq!(pos.block_number, Some(1));
            assert_eq!(pos.relative_position, None);
        }
    }
}
