//! H.264 NALU classification and AVC muxing (boundary component B1).
//!
//! Grounded in `original_source/trunk/src/app/srs_app_rtsp.cpp`'s
//! `write_h264_sps_pps` (`avc->mux_sequence_header`) and
//! `write_h264_ipb_frame` (NALU type inspection + `avc->mux_ipb_frame`).
//! Each RTP delivery in this basic payload mode is already one complete
//! NALU (no FU-A defragmentation on the ingest side), so muxing is just
//! framing, not reassembly.

use crate::error::{Error, ParseErrorKind};

/// H.264 NAL unit type (5 bits, ISO/IEC 14496-10 §7.3.1).
const NALU_TYPE_IDR: u8 = 5;

/// Inspect the first NALU byte to classify the frame: type 5 (IDR) is a
/// keyframe, everything else is an inter frame.
pub fn classify_frame(nalu: &[u8]) -> Result<bool, Error> {
    let first = *nalu.first().ok_or_else(|| Error::RtspParse {
        kind: ParseErrorKind::InvalidSdp("empty NALU".into()),
    })?;
    Ok((first & 0x1f) == NALU_TYPE_IDR)
}

/// Build an AVCDecoderConfigurationRecord from raw SPS/PPS NALUs (each
/// including their 1-byte NAL header).
pub fn mux_sequence_header(sps: &[u8], pps: &[u8]) -> Result<Vec<u8>, Error> {
    if sps.len() < 4 {
        return Err(Error::RemuxMissingSequence("SPS too short".into()));
    }

    let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
    out.push(1); // configurationVersion
    out.push(sps[1]); // AVCProfileIndication
    out.push(sps[2]); // profile_compatibility
    out.push(sps[3]); // AVCLevelIndication
    out.push(0xfc | 0x03); // reserved(6) + lengthSizeMinusOne=3 (4-byte lengths)

    out.push(0xe0 | 0x01); // reserved(3) + numOfSequenceParameterSets=1
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(sps);

    out.push(1); // numOfPictureParameterSets
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(pps);

    Ok(out)
}

/// Frame a single NALU with a 4-byte big-endian length prefix, matching
/// the `lengthSizeMinusOne=3` declared in the sequence header above.
pub fn mux_ipb_frame(nalu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + nalu.len());
    out.extend_from_slice(&(nalu.len() as u32).to_be_bytes());
    out.extend_from_slice(nalu);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_idr_as_keyframe() {
        assert!(classify_frame(&[0x65, 0, 0]).unwrap());
    }

    #[test]
    fn classifies_non_idr_as_inter() {
        assert!(!classify_frame(&[0x41, 0, 0]).unwrap());
    }

    #[test]
    fn classify_rejects_empty_nalu() {
        assert!(classify_frame(&[]).is_err());
    }

    #[test]
    fn sequence_header_embeds_profile_level_and_params() {
        let sps = vec![0x67, 0x42, 0x00, 0x1e, 0xAA, 0xBB];
        let pps = vec![0x68, 0xCE, 0x3C, 0x80];
        let hdr = mux_sequence_header(&sps, &pps).unwrap();

        assert_eq!(hdr[0], 1);
        assert_eq!(hdr[1], 0x42);
        assert_eq!(hdr[2], 0x00);
        assert_eq!(hdr[3], 0x1e);

        let sps_len_offset = 6;
        let sps_len = u16::from_be_bytes([hdr[sps_len_offset], hdr[sps_len_offset + 1]]) as usize;
        assert_eq!(sps_len, sps.len());
        assert_eq!(&hdr[sps_len_offset + 2..sps_len_offset + 2 + sps_len], &sps[..]);
    }

    #[test]
    fn sequence_header_rejects_short_sps() {
        assert!(mux_sequence_header(&[0x67], &[0x68]).is_err());
    }

    #[test]
    fn ipb_frame_is_length_prefixed() {
        let nalu = vec![0x65, 1, 2, 3];
        let framed = mux_ipb_frame(&nalu);
        let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]);
        assert_eq!(len as usize, nalu.len());
        assert_eq!(&framed[4..], &nalu[..]);
    }
}
