//! The incremental WebM demuxer.
//!
//! Parsing advances through fixed phases: EBML header, Segment, SeekHead,
//! Info, Tracks, Cues, then Clusters. Each phase is a resumable scan over
//! the segment's children; when a scan meets an element that belongs to a
//! later phase it stops without consuming it, so the next phase picks up
//! exactly there. Input arrives one chunk at a time, and any phase can
//! suspend mid-element and resume after the next chunk.

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::cluster::{Cluster, Packet, PacketFlags, PacketSink};
use crate::codec::{
    audio_codec_from_id, split_vorbis_private, video_codec_from_id, AudioCodec, AudioFormat,
    VideoCodec, VideoFormat,
};
use crate::cursor::{peek_into, ByteCursor};
use crate::ebml::ElementHeader;
use crate::elements;
use crate::error::{ready, DemuxError, Result, Step};
use crate::segment::{CuePoint, SeekHead, SegmentInfo, Tracks};
use crate::source::ByteSource;

/// Segment-level metadata, borrowed from the demuxer.
#[derive(Debug)]
pub struct Meta<'a> {
    /// Segment information (timing scale, duration, labels).
    pub info: &'a SegmentInfo,
    /// Selected video track format, when a supported one exists.
    pub video: Option<&'a VideoFormat>,
    /// Selected audio track format, when a supported one exists.
    pub audio: Option<&'a AudioFormat>,
}

/// Demuxed media, borrowed from the demuxer.
#[derive(Debug)]
pub struct MediaData<'a> {
    /// The seeking index; empty when the file carries no Cues.
    pub cues: &'a [CuePoint],
    /// Video packets in file order.
    pub video_packets: &'a [Packet],
    /// Audio packets in file order; for Vorbis the first three are the
    /// setup headers with a sentinel timestamp of -1.
    pub audio_packets: &'a [Packet],
}

/// Incremental WebM/Matroska demuxer over a chunked byte source.
pub struct WebmDemuxer<S> {
    cursor: ByteCursor<S>,
    file_size: u64,
    slot: Option<ElementHeader>,

    header_loaded: bool,
    segment: Option<ElementHeader>,
    seek_head: Option<SeekHead>,
    seek_head_loaded: bool,
    info: Option<SegmentInfo>,
    info_loaded: bool,
    tracks: Option<Tracks>,
    tracks_loaded: bool,
    cues: Option<crate::segment::Cues>,
    cues_loaded: bool,
    current_cluster: Option<Cluster>,
    meta_loaded: bool,
    data_loaded: bool,

    video_track_number: Option<u64>,
    audio_track_number: Option<u64>,
    video_codec: Option<VideoCodec>,
    audio_codec: Option<AudioCodec>,
    video_format: Option<VideoFormat>,
    audio_format: Option<AudioFormat>,
    video_packets: Vec<Packet>,
    audio_packets: Vec<Packet>,
    last_keyframe_ts: f64,
}

impl<S> Default for WebmDemuxer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> WebmDemuxer<S> {
    /// Create a demuxer with no source bound.
    pub fn new() -> Self {
        Self {
            cursor: ByteCursor::new(),
            file_size: 0,
            slot: None,
            header_loaded: false,
            segment: None,
            seek_head: None,
            seek_head_loaded: false,
            info: None,
            info_loaded: false,
            tracks: None,
            tracks_loaded: false,
            cues: None,
            cues_loaded: false,
            current_cluster: None,
            meta_loaded: false,
            data_loaded: false,
            video_track_number: None,
            audio_track_number: None,
            video_codec: None,
            audio_codec: None,
            video_format: None,
            audio_format: None,
            video_packets: Vec::new(),
            audio_packets: Vec::new(),
            last_keyframe_ts: 0.0,
        }
    }

    /// Override the range-fetch window size.
    pub fn set_chunk_size(&mut self, chunk_size: u64) {
        self.cursor.set_chunk_size(chunk_size);
    }

    /// Drop all parsed state and unbind the source.
    pub fn reset(&mut self) {
        self.cursor.unbind();
        self.file_size = 0;
        self.slot = None;
        self.header_loaded = false;
        self.segment = None;
        self.seek_head = None;
        self.seek_head_loaded = false;
        self.info = None;
        self.info_loaded = false;
        self.tracks = None;
        self.tracks_loaded = false;
        self.cues = None;
        self.cues_loaded = false;
        self.current_cluster = None;
        self.meta_loaded = false;
        self.data_loaded = false;
        self.video_track_number = None;
        self.audio_track_number = None;
        self.video_codec = None;
        self.audio_codec = None;
        self.video_format = None;
        self.audio_format = None;
        self.video_packets.clear();
        self.audio_packets.clear();
        self.last_keyframe_ts = 0.0;
    }

    /// Duration in seconds, when the file declares one.
    pub fn duration_seconds(&self) -> Option<f64> {
        let info = self.info.as_ref()?;
        if info.duration < 0.0 {
            None
        } else {
            Some(info.duration / 1000.0)
        }
    }

    /// Keyframe timestamp of the first demuxed video packet.
    pub fn keyframe_timestamp(&self) -> Option<f64> {
        self.video_packets.first().map(|p| p.keyframe_timestamp)
    }

    /// Codec of the selected video track.
    pub fn video_codec(&self) -> Option<VideoCodec> {
        self.video_codec
    }

    /// Codec of the selected audio track.
    pub fn audio_codec(&self) -> Option<AudioCodec> {
        self.audio_codec
    }
}

impl<S: ByteSource> WebmDemuxer<S> {
    /// Bind a source and prime the first chunk, discarding any previous
    /// file's state.
    pub fn init_file(&mut self, source: S, file_size: u64) -> Result<()> {
        self.reset();
        self.cursor.bind(source, file_size);
        self.file_size = file_size;
        self.cursor.receive_input()?;
        Ok(())
    }

    /// Parse up to and including the Tracks element and resolve the
    /// playable tracks. Idempotent after the first success.
    pub fn get_meta(&mut self) -> Result<Meta<'_>> {
        if !self.cursor.has_source() {
            return Err(DemuxError::NoSource);
        }
        if !self.meta_loaded {
            self.drive_header()?;
            if !self.seek_head_loaded {
                self.drive_scan("SeekHead", false, Self::step_seek_head, |s| {
                    s.seek_head.is_some()
                })?;
                self.seek_head_loaded = true;
            }
            if !self.info_loaded {
                self.drive_scan("Info", true, Self::step_info, |s| s.info.is_some())?;
                self.info_loaded = true;
            }
            if !self.tracks_loaded {
                self.drive_scan("Tracks", true, Self::step_tracks, |s| s.tracks.is_some())?;
                self.tracks_loaded = true;
            }
            self.validate_metadata()?;
            self.meta_loaded = true;
        }
        let info = self.info.as_ref().ok_or(DemuxError::MissingElement("Info"))?;
        Ok(Meta {
            info,
            video: self.video_format.as_ref(),
            audio: self.audio_format.as_ref(),
        })
    }

    /// Parse the Cues and every Cluster, collecting all packets.
    /// Implies [`get_meta`](Self::get_meta). Idempotent after the first
    /// success.
    pub fn get_data(&mut self) -> Result<MediaData<'_>> {
        if !self.meta_loaded {
            self.get_meta()?;
        }
        if !self.data_loaded {
            if !self.cues_loaded {
                self.drive_scan("Cues", false, Self::step_cues, |s| s.cues.is_some())?;
                self.cues_loaded = true;
            }
            self.drive_clusters()?;
            self.data_loaded = true;
        }
        Ok(MediaData {
            cues: self
                .cues
                .as_ref()
                .map(|c| c.entries.as_slice())
                .unwrap_or(&[]),
            video_packets: &self.video_packets,
            audio_packets: &self.audio_packets,
        })
    }

    /// Find the video packet closest to `seconds`, going through the
    /// latest cue point at or before the target. Implies
    /// [`get_data`](Self::get_data). `None` when no cue sits at or before
    /// the target or the file carries no Cues at all.
    pub fn seek_frame(&mut self, seconds: f64) -> Result<Option<&Packet>> {
        if !self.data_loaded {
            self.get_data()?;
        }
        let target = (seconds * 1000.0) as u64;
        let cue = self.cues.as_ref().and_then(|cues| {
            cues.entries
                .iter()
                .filter(|c| c.time <= target)
                .max_by_key(|c| c.time)
        });
        let cue = match cue {
            Some(c) => c,
            None => return Ok(None),
        };
        let frame_time = cue.time as f64 / 1000.0;
        Ok(self.video_packets.iter().min_by(|a, b| {
            let da = (a.timestamp - frame_time).abs();
            let db = (b.timestamp - frame_time).abs();
            da.partial_cmp(&db).unwrap_or(Ordering::Equal)
        }))
    }

    /// Request the next chunk; false when the whole file was requested.
    fn feed(&mut self) -> Result<bool> {
        if self.cursor.fetched_to() < self.file_size {
            self.cursor.receive_input()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// End of the segment's payload, clamped to the file size so an
    /// overstated (or unknown, all-ones) segment size cannot push the
    /// scan past the input.
    fn scan_limit(&self) -> u64 {
        self.segment
            .map(|s| s.end())
            .unwrap_or(self.file_size)
            .min(self.file_size)
    }

    fn drive_header(&mut self) -> Result<()> {
        loop {
            match self.step_header()? {
                Step::Ready(()) => return Ok(()),
                Step::Pending => {
                    if !self.feed()? {
                        return Err(DemuxError::UnexpectedEof("file header"));
                    }
                }
            }
        }
    }

    /// Verify the EBML magic, skip the header body, and find the Segment.
    fn step_header(&mut self) -> Result<Step<()>> {
        if !self.header_loaded {
            let header = ready!(peek_into(&mut self.slot, &mut self.cursor)?);
            if header.id != elements::EBML {
                return Err(DemuxError::MalformedHeader { id: header.id });
            }
            ready!(self.cursor.skip(header.size)?);
            self.slot = None;
            self.header_loaded = true;
        }
        while self.segment.is_none() {
            if self.cursor.offset() >= self.file_size {
                return Err(DemuxError::MissingElement("Segment"));
            }
            let header = ready!(peek_into(&mut self.slot, &mut self.cursor)?);
            if header.id == elements::SEGMENT {
                // Descend into the payload rather than skipping it.
                self.segment = Some(header);
                self.slot = None;
            } else {
                debug!(id = header.id, name = elements::element_name(header.id),
                    "skipping top-level element before Segment");
                ready!(self.cursor.skip(header.size)?);
                self.slot = None;
            }
        }
        Ok(Step::Ready(()))
    }

    /// Run one scan phase to completion, feeding chunks on demand.
    ///
    /// A `Pending` that cannot be fed means the file ended: fatal when the
    /// target's parser already started or the target is required,
    /// otherwise the element is simply absent.
    fn drive_scan(
        &mut self,
        name: &'static str,
        required: bool,
        step: fn(&mut Self) -> Result<Step<bool>>,
        started: fn(&Self) -> bool,
    ) -> Result<bool> {
        loop {
            match step(self)? {
                Step::Ready(found) => {
                    if !found && required {
                        return Err(DemuxError::MissingElement(name));
                    }
                    return Ok(found);
                }
                Step::Pending => {
                    if !self.feed()? {
                        if started(self) {
                            return Err(DemuxError::UnexpectedEof(name));
                        }
                        if required {
                            return Err(DemuxError::MissingElement(name));
                        }
                        return Ok(false);
                    }
                }
            }
        }
    }

    fn step_seek_head(&mut self) -> Result<Step<bool>> {
        loop {
            if let Some(seek_head) = self.seek_head.as_mut() {
                ready!(seek_head.load(&mut self.cursor)?);
                return Ok(Step::Ready(true));
            }
            if self.cursor.offset() >= self.scan_limit() {
                return Ok(Step::Ready(false));
            }
            let header = ready!(peek_into(&mut self.slot, &mut self.cursor)?);
            match header.id {
                elements::SEEK_HEAD => {
                    self.slot = None;
                    self.seek_head = Some(SeekHead::new(header));
                }
                // A later phase's element: leave it in the slot.
                elements::INFO | elements::TRACKS | elements::CUES | elements::CLUSTER => {
                    return Ok(Step::Ready(false));
                }
                _ => {
                    debug!(id = header.id, name = elements::element_name(header.id),
                        "skipping segment child while scanning for SeekHead");
                    ready!(self.cursor.skip(header.size)?);
                    self.slot = None;
                }
            }
        }
    }

    fn step_info(&mut self) -> Result<Step<bool>> {
        loop {
            if let Some(info) = self.info.as_mut() {
                ready!(info.load(&mut self.cursor)?);
                return Ok(Step::Ready(true));
            }
            if self.cursor.offset() >= self.scan_limit() {
                return Ok(Step::Ready(false));
            }
            let header = ready!(peek_into(&mut self.slot, &mut self.cursor)?);
            match header.id {
                elements::INFO => {
                    self.slot = None;
                    self.info = Some(SegmentInfo::new(header));
                }
                elements::TRACKS | elements::CUES | elements::CLUSTER => {
                    return Ok(Step::Ready(false));
                }
                _ => {
                    debug!(id = header.id, name = elements::element_name(header.id),
                        "skipping segment child while scanning for Info");
                    ready!(self.cursor.skip(header.size)?);
                    self.slot = None;
                }
            }
        }
    }

    fn step_tracks(&mut self) -> Result<Step<bool>> {
        loop {
            if let Some(tracks) = self.tracks.as_mut() {
                ready!(tracks.load(&mut self.cursor)?);
                return Ok(Step::Ready(true));
            }
            if self.cursor.offset() >= self.scan_limit() {
                return Ok(Step::Ready(false));
            }
            let header = ready!(peek_into(&mut self.slot, &mut self.cursor)?);
            match header.id {
                elements::TRACKS => {
                    self.slot = None;
                    self.tracks = Some(Tracks::new(header));
                }
                elements::CUES | elements::CLUSTER => {
                    return Ok(Step::Ready(false));
                }
                _ => {
                    debug!(id = header.id, name = elements::element_name(header.id),
                        "skipping segment child while scanning for Tracks");
                    ready!(self.cursor.skip(header.size)?);
                    self.slot = None;
                }
            }
        }
    }

    fn step_cues(&mut self) -> Result<Step<bool>> {
        loop {
            if let Some(cues) = self.cues.as_mut() {
                ready!(cues.load(&mut self.cursor)?);
                return Ok(Step::Ready(true));
            }
            if self.cursor.offset() >= self.scan_limit() {
                return Ok(Step::Ready(false));
            }
            let header = ready!(peek_into(&mut self.slot, &mut self.cursor)?);
            match header.id {
                elements::CUES => {
                    self.slot = None;
                    self.cues = Some(crate::segment::Cues::new(header));
                }
                elements::CLUSTER => {
                    return Ok(Step::Ready(false));
                }
                _ => {
                    debug!(id = header.id, name = elements::element_name(header.id),
                        "skipping segment child while scanning for Cues");
                    ready!(self.cursor.skip(header.size)?);
                    self.slot = None;
                }
            }
        }
    }

    /// Resolve which tracks will be demuxed and build their formats.
    ///
    /// The first supported track of each kind wins; for Vorbis audio the
    /// CodecPrivate blob is split into the three setup-header packets. A
    /// bad Vorbis blob disables the audio track instead of failing the
    /// whole file.
    fn validate_metadata(&mut self) -> Result<()> {
        let entries = self
            .tracks
            .as_ref()
            .ok_or(DemuxError::MissingElement("Tracks"))?
            .entries
            .clone();
        for entry in &entries {
            match entry.track_type {
                elements::TRACK_TYPE_VIDEO => {
                    if self.video_track_number.is_some() {
                        warn!(track = entry.track_number, "ignoring extra video track");
                        continue;
                    }
                    match video_codec_from_id(&entry.codec_id) {
                        Some(codec) => {
                            self.video_track_number = Some(entry.track_number);
                            self.video_codec = Some(codec);
                            self.video_format = Some(VideoFormat::from_track(
                                codec,
                                entry.width,
                                entry.height,
                                entry.display_width,
                                entry.display_height,
                                entry.pixel_crop_left,
                                entry.pixel_crop_top,
                                entry.pixel_crop_right,
                                entry.pixel_crop_bottom,
                            ));
                        }
                        None => {
                            warn!(codec = %entry.codec_id, "unsupported video codec");
                        }
                    }
                }
                elements::TRACK_TYPE_AUDIO => {
                    if self.audio_track_number.is_some() {
                        warn!(track = entry.track_number, "ignoring extra audio track");
                        continue;
                    }
                    let codec = match audio_codec_from_id(&entry.codec_id) {
                        Some(c) => c,
                        None => {
                            warn!(codec = %entry.codec_id, "unsupported audio codec");
                            continue;
                        }
                    };
                    self.audio_track_number = Some(entry.track_number);
                    self.audio_codec = Some(codec);
                    self.audio_format = Some(AudioFormat {
                        codec,
                        channels: entry.channels,
                        rate: entry.rate,
                        bit_depth: entry.bit_depth,
                    });
                    if codec == AudioCodec::Vorbis {
                        let private = entry.codec_private.as_deref().unwrap_or(&[]);
                        match split_vorbis_private(private) {
                            Ok(headers) => {
                                for data in headers {
                                    self.audio_packets.push(Packet {
                                        track_number: entry.track_number,
                                        timestamp: -1.0,
                                        keyframe_timestamp: -1.0,
                                        flags: PacketFlags::empty(),
                                        data,
                                    });
                                }
                            }
                            Err(err) => {
                                warn!(%err, track = entry.track_number,
                                    "invalid Vorbis setup headers, disabling audio track");
                                self.audio_track_number = None;
                                self.audio_codec = None;
                                self.audio_format = None;
                            }
                        }
                    }
                }
                other => {
                    debug!(track = entry.track_number, track_type = other,
                        "ignoring track of unsupported type");
                }
            }
        }
        Ok(())
    }

    /// Rewind and walk the whole file again, demuxing every Cluster.
    fn drive_clusters(&mut self) -> Result<()> {
        self.cursor.rewind();
        self.slot = None;
        self.current_cluster = None;
        self.cursor.receive_input()?;
        loop {
            match self.step_clusters()? {
                Step::Ready(()) => return Ok(()),
                Step::Pending => {
                    if !self.feed()? {
                        if self.current_cluster.is_some() {
                            return Err(DemuxError::UnexpectedEof("Cluster"));
                        }
                        // Trailing partial element past the last cluster.
                        warn!(offset = self.cursor.offset(), "truncated element at end of file");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn step_clusters(&mut self) -> Result<Step<()>> {
        loop {
            if let Some(cluster) = self.current_cluster.as_mut() {
                let mut sink = PacketSink {
                    video_track: self.video_track_number,
                    audio_track: self.audio_track_number,
                    video_packets: &mut self.video_packets,
                    audio_packets: &mut self.audio_packets,
                    last_keyframe_ts: &mut self.last_keyframe_ts,
                };
                ready!(cluster.load(&mut self.cursor, &mut sink)?);
                self.current_cluster = None;
            }
            if self.cursor.offset() >= self.file_size {
                return Ok(Step::Ready(()));
            }
            let header = ready!(peek_into(&mut self.slot, &mut self.cursor)?);
            match header.id {
                // Descend into the segment payload.
                elements::SEGMENT => {
                    self.slot = None;
                }
                elements::CLUSTER => {
                    self.slot = None;
                    self.current_cluster = Some(Cluster::new(header));
                }
                _ => {
                    ready!(self.cursor.skip(header.size)?);
                    self.slot = None;
                }
            }
        }
    }
}
