//! AAC specific config parsing and raw-frame muxing (boundary component B1).
//!
//! Grounded in `original_source/trunk/src/app/srs_app_rtsp.cpp`'s
//! `write_sequence_header` (decodes the AAC specific config to recover
//! channel count and sample rate) and `write_audio_raw_frame`
//! (`aac->mux_aac2flv`).

use crate::error::{Error, ParseErrorKind};
use crate::media::flv::{self};

/// MPEG-4 `samplingFrequencyIndex` table (ISO/IEC 14496-3), reused verbatim
/// since it's a fixed wire-format constant, not original expression.
pub const SAMPLE_RATE_TABLE: [u32; 16] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0, 0,
    0,
];

/// Decoded fields of a 2-byte MPEG-4 AudioSpecificConfig needed to build
/// the FLV audio sequence header: channel count and sample rate. Object
/// type and GASpecificConfig bits are not needed downstream and dropped.
#[derive(Debug, Clone, Copy)]
pub struct AacCodec {
    pub channels: u8,
    pub sample_rate: u32,
}

impl AacCodec {
    /// Parse the 2-byte AudioSpecificConfig captured from SDP's `config=`
    /// fmtp parameter.
    ///
    /// ```text
    /// byte0: 5 bits object type | 3 bits (high) of sampling freq index
    /// byte1: 1 bit (low) sampling freq index | 4 bits channel config | 3 bits GASpecificConfig
    /// ```
    pub fn parse(config: &[u8]) -> Result<Self, Error> {
        if config.len() < 2 {
            return Err(Error::RtspParse {
                kind: ParseErrorKind::InvalidSdp("AAC specific config shorter than 2 bytes".into()),
            });
        }
        let sample_rate_index = ((config[0] & 0x07) << 1) | (config[1] >> 7);
        let channels = (config[1] >> 3) & 0x0f;
        let sample_rate = SAMPLE_RATE_TABLE
            .get(sample_rate_index as usize)
            .copied()
            .unwrap_or(0);
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// FLV `SoundSize` bit is always 16-bit for AAC in this port.
    pub fn sound_size_flag(&self) -> u8 {
        1
    }

    pub fn sound_type_flag(&self) -> u8 {
        if self.channels == 2 {
            1
        } else {
            0
        }
    }

    /// FLV `SoundRate` (2 bits): only the three rates SRS's original maps
    /// are recognized; anything else keeps the default (5.5kHz flag 0),
    /// matching the original switch's missing `default:` arm — players
    /// derive the real rate from the AAC sequence header regardless.
    pub fn sound_rate_flag(&self) -> u8 {
        match self.sample_rate {
            11025 => 1,
            22050 => 2,
            44100 => 3,
            _ => 0,
        }
    }
}

/// Mux the AAC specific config (as the sequence-header payload) or one raw
/// AAC frame into an FLV audio tag. `aac_packet_type` is 0 for the
/// sequence header, 1 for raw frames (per the FLV `AACPacketType` field).
pub fn mux_aac_to_flv(codec: &AacCodec, aac_packet_type: u8, payload: &[u8]) -> Vec<u8> {
    flv::mux_audio_tag(codec, aac_packet_type, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_asc(object_type: u8, sample_rate_index: u8, channels: u8) -> [u8; 2] {
        let b0 = (object_type << 3) | (sample_rate_index >> 1);
        let b1 = ((sample_rate_index & 0x01) << 7) | (channels << 3);
        [b0, b1]
    }

    #[test]
    fn parses_44100_stereo() {
        let asc = encode_asc(2, 4, 2); // index 4 -> 44100
        let codec = AacCodec::parse(&asc).unwrap();
        assert_eq!(codec.sample_rate, 44100);
        assert_eq!(codec.channels, 2);
        assert_eq!(codec.sound_type_flag(), 1);
        assert_eq!(codec.sound_rate_flag(), 3);
    }

    #[test]
    fn parses_mono_22050() {
        let asc = encode_asc(2, 7, 1); // index 7 -> 22050
        let codec = AacCodec::parse(&asc).unwrap();
        assert_eq!(codec.sample_rate, 22050);
        assert_eq!(codec.sound_type_flag(), 0);
        assert_eq!(codec.sound_rate_flag(), 2);
    }

    #[test]
    fn rejects_short_config() {
        assert!(AacCodec::parse(&[0x12]).is_err());
    }

    #[test]
    fn unmapped_sample_rate_defaults_sound_rate_flag_to_zero() {
        let asc = encode_asc(2, 0, 2); // index 0 -> 96000, not in SRS's switch
        let codec = AacCodec::parse(&asc).unwrap();
        assert_eq!(codec.sound_rate_flag(), 0);
    }
}
