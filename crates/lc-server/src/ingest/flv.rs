//! FLV muxing of RTMP frames for the transcoder's stdin.
//!
//! The FLV header needs to know whether the stream carries audio and video,
//! so the first frames are held back until both have been seen (or enough
//! frames have passed that one of them is evidently absent).

use bytes::{Bytes, BytesMut};
use lc_core::Error;
use streamhub::define::FrameData;
use xflv::amf0::amf0_writer::Amf0Writer;
use xflv::muxer::{FlvMuxer, HEADER_LENGTH};

const TAG_AUDIO: u8 = 8;
const TAG_VIDEO: u8 = 9;
const TAG_SCRIPT_DATA: u8 = 18;

/// Frames inspected before the header is written without both tracks.
const MAX_FRAMES_BEFORE_HEADER: usize = 10;

/// Turns a publisher's frames into a contiguous FLV byte stream.
pub struct FlvTagWriter {
    muxer: FlvMuxer,
    has_audio: bool,
    has_video: bool,
    header_written: bool,
    held: Vec<FrameData>,
    inspected: usize,
}

impl Default for FlvTagWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FlvTagWriter {
    pub fn new() -> Self {
        Self {
            muxer: FlvMuxer::new(),
            has_audio: false,
            has_video: false,
            header_written: false,
            held: Vec::new(),
            inspected: 0,
        }
    }

    /// Feed one frame; returns the FLV bytes it produced, if any.
    pub fn push(&mut self, frame: FrameData) -> Result<Option<Bytes>, Error> {
        if self.header_written {
            self.write_tag(frame)?;
            return Ok(self.take());
        }

        self.inspected += 1;
        match frame {
            FrameData::Audio { .. } => self.has_audio = true,
            FrameData::Video { .. } => self.has_video = true,
            FrameData::MetaData { .. } => {}
            _ => return Ok(None),
        }
        self.held.push(frame);

        if !(self.has_audio && self.has_video) && self.inspected <= MAX_FRAMES_BEFORE_HEADER {
            return Ok(None);
        }

        self.muxer
            .write_flv_header(self.has_audio, self.has_video)
            .map_err(|e| Error::Internal(format!("FLV header: {e:?}")))?;
        self.muxer
            .write_previous_tag_size(0)
            .map_err(|e| Error::Internal(format!("FLV tag size: {e:?}")))?;
        self.header_written = true;

        for frame in std::mem::take(&mut self.held) {
            self.write_tag(frame)?;
        }
        Ok(self.take())
    }

    fn write_tag(&mut self, frame: FrameData) -> Result<(), Error> {
        let (tag_type, timestamp, data) = match frame {
            FrameData::Audio { timestamp, data } => (TAG_AUDIO, timestamp, data),
            FrameData::Video { timestamp, data } => (TAG_VIDEO, timestamp, data),
            FrameData::MetaData { timestamp, data } => {
                match strip_set_data_frame(data)? {
                    Some(data) => (TAG_SCRIPT_DATA, timestamp, data),
                    None => return Ok(()),
                }
            }
            _ => return Ok(()),
        };

        let len = data.len() as u32;
        self.muxer
            .write_flv_tag_header(tag_type, len, timestamp)
            .map_err(|e| Error::Internal(format!("FLV tag header: {e:?}")))?;
        self.muxer
            .write_flv_tag_body(data)
            .map_err(|e| Error::Internal(format!("FLV tag body: {e:?}")))?;
        self.muxer
            .write_previous_tag_size(len + HEADER_LENGTH)
            .map_err(|e| Error::Internal(format!("FLV tag size: {e:?}")))?;
        Ok(())
    }

    fn take(&mut self) -> Option<Bytes> {
        let bytes = self.muxer.writer.extract_current_bytes();
        (!bytes.is_empty()).then(|| bytes.freeze())
    }
}

/// RTMP metadata arrives wrapped in `@setDataFrame`, which FLV files omit.
fn strip_set_data_frame(data: BytesMut) -> Result<Option<BytesMut>, Error> {
    let mut prefix = Amf0Writer::new();
    prefix
        .write_string(&String::from("@setDataFrame"))
        .map_err(|e| Error::Internal(format!("AMF0: {e:?}")))?;
    let skip = prefix.len();
    if data.len() < skip {
        return Ok(None);
    }
    if data[..skip] != prefix.extract_current_bytes()[..] {
        return Ok(Some(data));
    }
    Ok(Some(BytesMut::from(&data[skip..])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(ts: u32, payload: &[u8]) -> FrameData {
        FrameData::Video {
            timestamp: ts,
            data: BytesMut::from(payload),
        }
    }

    fn audio(ts: u32, payload: &[u8]) -> FrameData {
        FrameData::Audio {
            timestamp: ts,
            data: BytesMut::from(payload),
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn header_waits_for_both_tracks() {
        let mut writer = FlvTagWriter::new();
        assert!(writer.push(video(0, b"video-key")).unwrap().is_none());

        let out = writer.push(audio(0, b"audio-seq")).unwrap().unwrap();
        assert!(out.starts_with(b"FLV"));
        // Audio and video flags.
        assert_eq!(out[4], 0x05);
        assert!(contains(&out, b"video-key"));
        assert!(contains(&out, b"audio-seq"));

        let next = writer.push(video(40, b"video-delta")).unwrap().unwrap();
        assert!(!next.starts_with(b"FLV"));
        assert_eq!(next[0], TAG_VIDEO);
        assert!(contains(&next, b"video-delta"));
    }

    #[test]
    fn video_only_stream_gets_header_eventually() {
        let mut writer = FlvTagWriter::new();
        let mut first = None;
        for i in 0..=MAX_FRAMES_BEFORE_HEADER as u32 {
            if let Some(out) = writer.push(video(i * 40, b"v")).unwrap() {
                first = Some(out);
                break;
            }
        }
        let first = first.expect("header never written");
        assert!(first.starts_with(b"FLV"));
        assert_eq!(first[4], 0x01);
    }
}
