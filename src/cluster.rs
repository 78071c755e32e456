//! Cluster parsing: SimpleBlocks, BlockGroups, lacing, and packet
//! emission.
//!
//! A cluster is driven like the metadata parsers: `load` is called until it
//! returns `Ready`, emitting finished packets into a [`PacketSink`] as it
//! goes. Block payloads are the only place the demuxer copies media bytes.

use bitflags::bitflags;
use tracing::debug;

use crate::cursor::{peek_into, ByteCursor};
use crate::ebml::ElementHeader;
use crate::elements;
use crate::error::{ready, DemuxError, Result, Step};
use crate::source::ByteSource;

bitflags! {
    /// Per-packet flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u8 {
        /// The packet can be decoded without prior packets.
        const KEYFRAME = 1 << 0;
        /// The packet may be dropped under pressure.
        const DISCARDABLE = 1 << 1;
    }
}

/// One demuxed media packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Track the packet belongs to.
    pub track_number: u64,
    /// Presentation time in seconds.
    pub timestamp: f64,
    /// Timestamp of the most recent video keyframe at emission time.
    pub keyframe_timestamp: f64,
    /// Keyframe/discardable flags.
    pub flags: PacketFlags,
    /// Codec payload.
    pub data: Vec<u8>,
}

/// Routes finished packets to the per-track output queues.
pub(crate) struct PacketSink<'a> {
    pub video_track: Option<u64>,
    pub audio_track: Option<u64>,
    pub video_packets: &'a mut Vec<Packet>,
    pub audio_packets: &'a mut Vec<Packet>,
    pub last_keyframe_ts: &'a mut f64,
}

impl PacketSink<'_> {
    fn push(&mut self, mut packet: Packet) {
        if Some(packet.track_number) == self.video_track {
            if packet.flags.contains(PacketFlags::KEYFRAME) {
                *self.last_keyframe_ts = packet.timestamp;
            }
            packet.keyframe_timestamp = *self.last_keyframe_ts;
            self.video_packets.push(packet);
        } else if Some(packet.track_number) == self.audio_track {
            packet.keyframe_timestamp = packet.timestamp;
            self.audio_packets.push(packet);
        } else {
            debug!(track = packet.track_number, "dropping packet for unselected track");
        }
    }
}

/// Lacing mode from bits 1..=2 of the block flags octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lacing {
    None,
    Xiph,
    Fixed,
    Ebml,
}

impl Lacing {
    fn from_flags(flags: u8) -> Self {
        match (flags >> 1) & 0b11 {
            0b00 => Lacing::None,
            0b01 => Lacing::Xiph,
            0b10 => Lacing::Fixed,
            _ => Lacing::Ebml,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockStage {
    Track,
    RelTimestamp,
    Flags,
    LaceCount,
    LaceSizes,
    Frames,
}

/// In-flight decode of one Block or SimpleBlock payload.
#[derive(Debug)]
struct BlockState {
    header: ElementHeader,
    stage: BlockStage,
    track: u64,
    rel_timestamp: i64,
    flags: u8,
    lacing: Lacing,
    frame_count: usize,
    /// Explicit lace sizes; the final frame takes whatever payload remains
    /// unless the mode is fixed, where all sizes are explicit.
    sizes: Vec<u64>,
    xiph_acc: u64,
    prev_size: i64,
    /// Size of the frame currently being read, captured once so a
    /// suspension mid-frame does not recompute it from a moved offset.
    cur_frame_size: Option<u64>,
    frames: Vec<Vec<u8>>,
}

impl BlockState {
    fn new(header: ElementHeader) -> Self {
        Self {
            header,
            stage: BlockStage::Track,
            track: 0,
            rel_timestamp: 0,
            flags: 0,
            lacing: Lacing::None,
            frame_count: 0,
            sizes: Vec::new(),
            xiph_acc: 0,
            prev_size: 0,
            cur_frame_size: None,
            frames: Vec::new(),
        }
    }

    /// Payload bytes left in the block's extent, erroring if earlier lace
    /// sizes already pushed the cursor past it.
    fn remaining_payload(&self, offset: u64) -> Result<u64> {
        self.header.end().checked_sub(offset).ok_or_else(|| {
            DemuxError::InvalidBlock(format!(
                "cursor at {} is past block end {}",
                offset,
                self.header.end()
            ))
        })
    }

    fn step<S: ByteSource>(&mut self, cursor: &mut ByteCursor<S>) -> Result<Step<()>> {
        loop {
            match self.stage {
                BlockStage::Track => {
                    self.track = ready!(cursor.read_vint()?);
                    self.stage = BlockStage::RelTimestamp;
                }
                BlockStage::RelTimestamp => {
                    self.rel_timestamp = ready!(cursor.read_int(2)?);
                    self.stage = BlockStage::Flags;
                }
                BlockStage::Flags => {
                    self.flags = ready!(cursor.read_uint(1)?) as u8;
                    self.lacing = Lacing::from_flags(self.flags);
                    if self.lacing == Lacing::None {
                        self.frame_count = 1;
                        self.stage = BlockStage::Frames;
                    } else {
                        self.stage = BlockStage::LaceCount;
                    }
                }
                BlockStage::LaceCount => {
                    self.frame_count = ready!(cursor.read_uint(1)?) as usize + 1;
                    if self.lacing == Lacing::Fixed {
                        let remaining = self.remaining_payload(cursor.offset())?;
                        if self.frame_count == 0 || remaining % self.frame_count as u64 != 0 {
                            return Err(DemuxError::InvalidLacing(format!(
                                "{} payload bytes cannot split into {} fixed laces",
                                remaining, self.frame_count
                            )));
                        }
                        self.sizes = vec![remaining / self.frame_count as u64; self.frame_count];
                        self.stage = BlockStage::Frames;
                    } else {
                        self.stage = BlockStage::LaceSizes;
                    }
                }
                BlockStage::LaceSizes => {
                    match self.lacing {
                        Lacing::Xiph => {
                            // Each size is a run of 255s plus a terminator
                            // byte; the accumulator survives suspension.
                            while self.sizes.len() + 1 < self.frame_count {
                                let byte = ready!(cursor.read_uint(1)?);
                                self.xiph_acc += byte;
                                if byte < 255 {
                                    self.sizes.push(self.xiph_acc);
                                    self.xiph_acc = 0;
                                }
                            }
                        }
                        Lacing::Ebml => {
                            if self.sizes.is_empty() && self.frame_count > 1 {
                                let first = ready!(cursor.read_vint()?);
                                self.prev_size = first as i64;
                                self.sizes.push(first);
                            }
                            while self.sizes.len() + 1 < self.frame_count {
                                let delta = ready!(cursor.read_lacing_size()?);
                                self.prev_size += delta;
                                if self.prev_size < 0 {
                                    return Err(DemuxError::InvalidLacing(format!(
                                        "lace size delta {} drives size negative",
                                        delta
                                    )));
                                }
                                self.sizes.push(self.prev_size as u64);
                            }
                        }
                        Lacing::None | Lacing::Fixed => {}
                    }
                    self.stage = BlockStage::Frames;
                }
                BlockStage::Frames => {
                    while self.frames.len() < self.frame_count {
                        let size = match self.cur_frame_size {
                            Some(s) => s,
                            None => {
                                let index = self.frames.len();
                                let s = if index < self.sizes.len() {
                                    self.sizes[index]
                                } else {
                                    self.remaining_payload(cursor.offset())?
                                };
                                self.cur_frame_size = Some(s);
                                s
                            }
                        };
                        let data = ready!(cursor.read_binary(size)?);
                        self.cur_frame_size = None;
                        self.frames.push(data);
                    }
                    if cursor.offset() != self.header.end() {
                        return Err(DemuxError::InvalidBlock(format!(
                            "lace sizes overrun block extent by {} bytes",
                            cursor.offset() - self.header.end()
                        )));
                    }
                    return Ok(Step::Ready(()));
                }
            }
        }
    }

    /// Emit the finished block's frames into the sink. Only the first
    /// frame of a laced block carries the keyframe flag.
    fn emit(self, keyframe: bool, discardable: bool, timecode: u64, sink: &mut PacketSink<'_>) {
        let timestamp = (timecode as i64 + self.rel_timestamp).max(0) as f64 / 1000.0;
        for (index, data) in self.frames.into_iter().enumerate() {
            let mut flags = PacketFlags::empty();
            if keyframe && index == 0 {
                flags |= PacketFlags::KEYFRAME;
            }
            if discardable {
                flags |= PacketFlags::DISCARDABLE;
            }
            sink.push(Packet {
                track_number: self.track,
                timestamp,
                keyframe_timestamp: timestamp,
                flags,
                data,
            });
        }
    }
}

/// In-flight decode of a BlockGroup.
///
/// Emission is deferred to the group's end because ReferenceBlock
/// children, which decide the keyframe flag, may follow the Block. A
/// group normally carries a single Block, but every completed one is
/// kept and emitted.
#[derive(Debug)]
struct GroupState {
    header: ElementHeader,
    slot: Option<ElementHeader>,
    block: Option<BlockState>,
    done_blocks: Vec<BlockState>,
    reference_count: u32,
}

impl GroupState {
    fn new(header: ElementHeader) -> Self {
        Self {
            header,
            slot: None,
            block: None,
            done_blocks: Vec::new(),
            reference_count: 0,
        }
    }

    fn step<S: ByteSource>(&mut self, cursor: &mut ByteCursor<S>) -> Result<Step<()>> {
        loop {
            if let Some(block) = self.block.as_mut() {
                ready!(block.step(cursor)?);
                if let Some(done) = self.block.take() {
                    self.done_blocks.push(done);
                }
            }
            if cursor.offset() >= self.header.end() {
                return Ok(Step::Ready(()));
            }
            let child = ready!(peek_into(&mut self.slot, cursor)?);
            match child.id {
                elements::BLOCK => {
                    self.block = Some(BlockState::new(child));
                }
                elements::REFERENCE_BLOCK => {
                    ready!(cursor.read_int(child.size)?);
                    self.reference_count += 1;
                }
                elements::BLOCK_DURATION => {
                    ready!(cursor.read_uint(child.size)?);
                }
                _ => {
                    debug!(id = child.id, name = elements::element_name(child.id),
                        "skipping element inside BlockGroup");
                    ready!(cursor.skip(child.size)?);
                }
            }
            self.slot = None;
        }
    }
}

/// One Cluster, parsed incrementally.
#[derive(Debug)]
pub(crate) struct Cluster {
    pub header: ElementHeader,
    /// Cluster base timestamp in timecode units.
    pub timecode: u64,
    slot: Option<ElementHeader>,
    block: Option<BlockState>,
    group: Option<GroupState>,
}

impl Cluster {
    pub fn new(header: ElementHeader) -> Self {
        Self {
            header,
            timecode: 0,
            slot: None,
            block: None,
            group: None,
        }
    }

    /// Consume the cluster payload, emitting packets into `sink`.
    pub fn load<S: ByteSource>(
        &mut self,
        cursor: &mut ByteCursor<S>,
        sink: &mut PacketSink<'_>,
    ) -> Result<Step<()>> {
        let end = self.header.end();
        loop {
            if let Some(block) = self.block.as_mut() {
                ready!(block.step(cursor)?);
                let block = match self.block.take() {
                    Some(b) => b,
                    None => break,
                };
                let keyframe = block.flags & 0x80 != 0;
                let discardable = block.flags & 0x01 != 0;
                block.emit(keyframe, discardable, self.timecode, sink);
            }
            if let Some(group) = self.group.as_mut() {
                ready!(group.step(cursor)?);
                let group = match self.group.take() {
                    Some(g) => g,
                    None => break,
                };
                let keyframe = group.reference_count == 0;
                for block in group.done_blocks {
                    block.emit(keyframe, false, self.timecode, sink);
                }
            }
            if cursor.offset() >= end {
                break;
            }
            let child = ready!(peek_into(&mut self.slot, cursor)?);
            match child.id {
                elements::TIMESTAMP => {
                    self.timecode = ready!(cursor.read_uint(child.size)?);
                }
                elements::SIMPLE_BLOCK => {
                    self.block = Some(BlockState::new(child));
                }
                elements::BLOCK_GROUP => {
                    self.group = Some(GroupState::new(child));
                }
                _ => {
                    debug!(id = child.id, name = elements::element_name(child.id),
                        "skipping element inside Cluster");
                    ready!(cursor.skip(child.size)?);
                }
            }
            self.slot = None;
        }
        Ok(Step::Ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn drive_cluster(data: Vec<u8>, chunk: u64) -> (Vec<Packet>, Vec<Packet>, f64) {
        let mut cursor = cursor_over(data, chunk);
        let header = loop {
            match cursor.peek_element().unwrap() {
                Step::Ready(h) => break h,
                Step::Pending => cursor.receive_input().unwrap(),
            }
        };
        let mut cluster = Cluster::new(header);
        let mut video = Vec::new();
        let mut audio = Vec::new();
        let mut last_keyframe = 0.0;
        let mut sink = PacketSink {
            video_track: Some(1),
            audio_track: Some(2),
            video_packets: &mut video,
            audio_packets: &mut audio,
            last_keyframe_ts: &mut last_keyframe,
        };
        loop {
            match cluster.load(&mut cursor, &mut sink).unwrap() {
                Step::Ready(()) => break,
                Step::Pending => cursor.receive_input().unwrap(),
            }
        }
        (video, audio, last_keyframe)
    }

    /// Block payload prefix: track vint, 2-byte relative timestamp, flags.
    fn block_prefix(track: u8, rel_ts: i16, flags: u8) -> Vec<u8> {
        let mut out = vec![0x80 | track];
        out.extend_from_slice(&rel_ts.to_be_bytes());
        out.push(flags);
        out
    }

    fn drive_block(data: Vec<u8>, chunk: u64) -> BlockState {
        let mut cursor = cursor_over(data, chunk);
        let header = loop {
            match cursor.peek_element().unwrap() {
                Step::Ready(h) => break h,
                Step::Pending => cursor.receive_input().unwrap(),
            }
        };
        let mut block = BlockState::new(header);
        loop {
            match block.step(&mut cursor).unwrap() {
                Step::Ready(()) => break,
                Step::Pending => cursor.receive_input().unwrap(),
            }
        }
        block
    }

    #[test]
    fn simple_block_without_lacing() {
        let mut payload = block_prefix(1, 5, 0x80);
        payload.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let cluster = el(
            elements::CLUSTER,
            &[uint_el(elements::TIMESTAMP, 1000), el(elements::SIMPLE_BLOCK, &payload)].concat(),
        );

        for chunk in [1, 3, 64] {
            let (video, audio, last_keyframe) = drive_cluster(cluster.clone(), chunk);
            assert!(audio.is_empty());
            assert_eq!(video.len(), 1);
            let p = &video[0];
            assert_eq!(p.track_number, 1);
            assert_eq!(p.timestamp, 1.005);
            assert!(p.flags.contains(PacketFlags::KEYFRAME));
            assert_eq!(p.keyframe_timestamp, 1.005);
            assert_eq!(p.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
            assert_eq!(last_keyframe, 1.005);
        }
    }

    #[test]
    fn xiph_lacing_splits_frames() {
        // Three frames of sizes 2, 300 and whatever remains (4).
        let mut payload = block_prefix(2, 0, 0b0000_0010);
        payload.push(2); // two lace sizes follow
        payload.push(2); // size 2
        payload.extend_from_slice(&[255, 45]); // size 300
        payload.extend_from_slice(&[0xAA; 2]);
        payload.extend_from_slice(&[0xBB; 300]);
        payload.extend_from_slice(&[0xCC; 4]);
        let block = el(elements::SIMPLE_BLOCK, &payload);

        for chunk in [1, 7, 512] {
            let state = drive_block(block.clone(), chunk);
            assert_eq!(state.frames.len(), 3);
            assert_eq!(state.frames[0], vec![0xAA; 2]);
            assert_eq!(state.frames[1], vec![0xBB; 300]);
            assert_eq!(state.frames[2], vec![0xCC; 4]);
        }
    }

    #[test]
    fn ebml_lacing_applies_signed_deltas() {
        // First size 5 as a plain vint, then delta -2 (width-1 vint 61).
        let mut payload = block_prefix(2, 0, 0b0000_0110);
        payload.push(2);
        payload.push(0x85); // first size 5
        payload.push(0x80 | 61); // 61 - 63 = -2, second size 3
        payload.extend_from_slice(&[1; 5]);
        payload.extend_from_slice(&[2; 3]);
        payload.extend_from_slice(&[3; 6]);
        let block = el(elements::SIMPLE_BLOCK, &payload);

        for chunk in [1, 4, 128] {
            let state = drive_block(block.clone(), chunk);
            assert_eq!(state.frames.len(), 3);
            assert_eq!(state.frames[0], vec![1; 5]);
            assert_eq!(state.frames[1], vec![2; 3]);
            assert_eq!(state.frames[2], vec![3; 6]);
        }
    }

    #[test]
    fn fixed_lacing_divides_evenly() {
        let mut payload = block_prefix(2, 0, 0b0000_0100);
        payload.push(3); // four frames
        payload.extend_from_slice(&[7; 12]); // 3 bytes each
        let block = el(elements::SIMPLE_BLOCK, &payload);
        let state = drive_block(block, 64);
        assert_eq!(state.frames.len(), 4);
        assert!(state.frames.iter().all(|f| f == &vec![7; 3]));
    }

    #[test]
    fn fixed_lacing_remainder_is_an_error() {
        let mut payload = block_prefix(2, 0, 0b0000_0100);
        payload.push(3); // four frames over 11 bytes
        payload.extend_from_slice(&[7; 11]);
        let data = el(elements::SIMPLE_BLOCK, &payload);

        let mut cursor = cursor_over(data, 64);
        let header = cursor.peek_element().unwrap().unwrap();
        let mut block = BlockState::new(header);
        assert!(matches!(
            block.step(&mut cursor),
            Err(DemuxError::InvalidLacing(_))
        ));
    }

    #[test]
    fn block_group_without_reference_is_keyframe() {
        let mut payload = block_prefix(1, 0, 0);
        payload.extend_from_slice(&[9, 9]);
        let group = el(
            elements::BLOCK_GROUP,
            &[el(elements::BLOCK, &payload), uint_el(elements::BLOCK_DURATION, 33)].concat(),
        );
        let cluster = el(
            elements::CLUSTER,
            &[uint_el(elements::TIMESTAMP, 0), group].concat(),
        );
        let (video, _, _) = drive_cluster(cluster, 64);
        assert_eq!(video.len(), 1);
        assert!(video[0].flags.contains(PacketFlags::KEYFRAME));
    }

    #[test]
    fn block_group_with_reference_is_not_keyframe() {
        let mut payload = block_prefix(1, 0, 0);
        payload.extend_from_slice(&[9, 9]);
        // The reference arrives after the block; the keyframe decision
        // must wait for the group's end.
        let group = el(
            elements::BLOCK_GROUP,
            &[
                el(elements::BLOCK, &payload),
                el(elements::REFERENCE_BLOCK, &[0xFF]),
            ]
            .concat(),
        );
        let cluster = el(
            elements::CLUSTER,
            &[uint_el(elements::TIMESTAMP, 0), group].concat(),
        );
        let (video, _, _) = drive_cluster(cluster, 64);
        assert_eq!(video.len(), 1);
        assert!(!video[0].flags.contains(PacketFlags::KEYFRAME));
    }

    #[test]
    fn block_group_with_two_blocks_emits_both() {
        let mut first = block_prefix(1, 0, 0);
        first.push(0x30);
        let mut second = block_prefix(1, 20, 0);
        second.push(0x31);
        let group = el(
            elements::BLOCK_GROUP,
            &[el(elements::BLOCK, &first), el(elements::BLOCK, &second)].concat(),
        );
        let cluster = el(
            elements::CLUSTER,
            &[uint_el(elements::TIMESTAMP, 100), group].concat(),
        );
        for chunk in [1, 64] {
            let (video, _, _) = drive_cluster(cluster.clone(), chunk);
            assert_eq!(video.len(), 2);
            assert_eq!(video[0].timestamp, 0.1);
            assert_eq!(video[1].timestamp, 0.12);
            assert!(video.iter().all(|p| p.flags.contains(PacketFlags::KEYFRAME)));
        }
    }

    #[test]
    fn negative_relative_timestamp_clamps_to_zero() {
        let mut payload = block_prefix(1, -50, 0x80);
        payload.push(1);
        let cluster = el(
            elements::CLUSTER,
            &[uint_el(elements::TIMESTAMP, 10), el(elements::SIMPLE_BLOCK, &payload)].concat(),
        );
        let (video, _, _) = drive_cluster(cluster, 64);
        assert_eq!(video[0].timestamp, 0.0);
    }

    #[test]
    fn audio_and_video_route_to_their_queues() {
        let mut v = block_prefix(1, 0, 0x80);
        v.push(1);
        let mut a = block_prefix(2, 1, 0);
        a.push(2);
        let mut unknown = block_prefix(3, 0, 0);
        unknown.push(3);
        let cluster = el(
            elements::CLUSTER,
            &[
                uint_el(elements::TIMESTAMP, 2000),
                el(elements::SIMPLE_BLOCK, &v),
                el(elements::SIMPLE_BLOCK, &a),
                el(elements::SIMPLE_BLOCK, &unknown),
            ]
            .concat(),
        );
        let (video, audio, _) = drive_cluster(cluster, 16);
        assert_eq!(video.len(), 1);
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].timestamp, 2.001);
        assert_eq!(audio[0].keyframe_timestamp, audio[0].timestamp);
    }

    #[test]
    fn keyframe_timestamp_carries_to_interframes() {
        let mut key = block_prefix(1, 0, 0x80);
        key.push(1);
        let mut inter = block_prefix(1, 40, 0);
        inter.push(2);
        let cluster = el(
            elements::CLUSTER,
            &[
                uint_el(elements::TIMESTAMP, 1000),
                el(elements::SIMPLE_BLOCK, &key),
                el(elements::SIMPLE_BLOCK, &inter),
            ]
            .concat(),
        );
        let (video, _, last) = drive_cluster(cluster, 64);
        assert_eq!(video.len(), 2);
        assert_eq!(video[0].keyframe_timestamp, 1.0);
        assert_eq!(video[1].keyframe_timestamp, 1.0);
        assert_eq!(last, 1.0);
    }
}
