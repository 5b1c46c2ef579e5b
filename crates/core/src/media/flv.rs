//! FLV tag framing helpers (boundary component B1).
//!
//! Grounded in `original_source/trunk/src/app/srs_app_rtsp.cpp`'s
//! `avc->mux_avc2flv` / `aac->mux_aac2flv` calls: these are pure functions
//! that wrap already-muxed AVC/AAC payloads in the FLV tag-body format
//! RTMP carries them in (audio message type 0x08, video 0x09). No I/O, no
//! RTMP control-plane — that's [`crate::rtmp::client`]'s job.

/// Video frame type (FLV `VIDEODATA.FrameType`, 4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Key = 1,
    Inter = 2,
}

/// Video `AVCPacketType` (FLV `AVCVIDEODATA.AVCPacketType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    SequenceHeader = 0,
    Nalu = 1,
}

/// One AVC codec id (7) FLV video tag body: frame-type/codec byte,
/// packet-type byte, 24-bit composition time (`pts - dts` in ms, always 0
/// here per the `dts == pts` approximation this port preserves, §9), then
/// the AVC payload (either an AVCDecoderConfigurationRecord or a
/// length-prefixed NALU stream).
pub fn mux_video_tag(frame_type: VideoFrameType, packet_type: AvcPacketType, cts_ms: i32, avc_payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + avc_payload.len());
    out.push(((frame_type as u8) << 4) | 0x07); // codec id 7 = AVC
    out.push(packet_type as u8);
    let cts = cts_ms.to_be_bytes();
    out.extend_from_slice(&cts[1..4]); // 24-bit signed composition time
    out.extend_from_slice(avc_payload);
    out
}

/// AAC `SoundFormat` (10) FLV audio tag body: sound-format/rate/size/type
/// byte, `AACPacketType` byte, then the raw AAC payload (either the AAC
/// specific config or one raw AAC frame).
pub fn mux_audio_tag(codec: &super::aac::AacCodec, aac_packet_type: u8, raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + raw.len());
    let sound_format: u8 = 10; // AAC
    let byte0 = (sound_format << 4) | (codec.sound_rate_flag() << 2) | (1 << 1) | codec.sound_type_flag();
    out.push(byte0);
    out.push(aac_packet_type);
    out.extend_from_slice(raw);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::aac::AacCodec;

    #[test]
    fn video_tag_header_encodes_frame_and_packet_type() {
        let tag = mux_video_tag(VideoFrameType::Key, AvcPacketType::SequenceHeader, 0, &[1, 2, 3]);
        assert_eq!(tag[0], (1 << 4) | 0x07);
        assert_eq!(tag[1], 0);
        assert_eq!(&tag[5..], &[1, 2, 3]);
    }

    #[test]
    fn audio_tag_header_encodes_aac_format() {
        let codec = AacCodec {
            channels: 2,
            sample_rate: 44100,
        };
        let tag = mux_audio_tag(&codec, 1, &[9, 9]);
        assert_eq!(tag[0] >> 4, 10);
        assert_eq!(tag[1], 1);
        assert_eq!(&tag[2..], &[9, 9]);
    }
}
