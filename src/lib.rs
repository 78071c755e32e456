//! Incremental WebM/Matroska demuxing.
//!
//! The demuxer pulls bytes from a [`ByteSource`] one chunk at a time and
//! never requires the whole file in memory. Parsing is resumable at every
//! level: if a chunk ends in the middle of an element, the demuxer keeps
//! its partial progress and continues when the next chunk arrives.
//!
//! # Example
//!
//! ```no_run
//! use webm_demux::{ReaderSource, WebmDemuxer};
//!
//! # fn main() -> webm_demux::Result<()> {
//! let file = std::fs::File::open("input.webm")?;
//! let size = file.metadata()?.len();
//!
//! let mut demuxer = WebmDemuxer::new();
//! demuxer.init_file(ReaderSource::new(file), size)?;
//!
//! let meta = demuxer.get_meta()?;
//! if let Some(video) = meta.video {
//!     println!("{}x{} {:?}", video.width, video.height, video.codec);
//! }
//!
//! let data = demuxer.get_data()?;
//! println!("{} video packets", data.video_packets.len());
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod codec;
pub mod cursor;
pub mod ebml;
pub mod elements;
pub mod error;
pub mod segment;
pub mod source;

mod demuxer;
#[cfg(test)]
mod testutil;

pub use cluster::{Packet, PacketFlags};
pub use codec::{AudioCodec, AudioFormat, VideoCodec, VideoFormat};
pub use demuxer::{MediaData, Meta, WebmDemuxer};
pub use ebml::ElementHeader;
pub use error::{DemuxError, Result, Step};
pub use segment::{CuePoint, CueTrackPosition, SeekEntry, SegmentInfo, TrackEntry};
pub use source::{ByteSource, MemorySource, ReaderSource};
