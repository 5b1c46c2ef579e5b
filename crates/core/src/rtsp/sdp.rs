//! ANNOUNCE SDP parsing (RFC 4566) — the reverse of the teacher's
//! `protocol::sdp::generate_sdp`, which only ever produced an SDP body for
//! DESCRIBE. Here the session is the one being published *to*, so the SDP
//! arrives as the ANNOUNCE body and must be decoded instead.
//!
//! Extracts, per `m=` section: the RTP payload type, `a=control` track id,
//! `a=rtpmap` codec name/clock rate/channel count, and the codec-specific
//! parameters carried in `a=fmtp` (`sprop-parameter-sets` for H.264,
//! `config` for AAC), following the same attribute conventions the
//! teacher's `media::h264`/`protocol::sdp` use on the generating side.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{Error, ParseErrorKind};

#[derive(Debug, Clone, Default)]
pub struct VideoTrack {
    pub track_id: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct AudioTrack {
    pub track_id: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: u8,
    pub aac_config: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedSdp {
    pub video: Option<VideoTrack>,
    pub audio: Option<AudioTrack>,
}

#[derive(Clone, Copy, PartialEq)]
enum Media {
    None,
    Video,
    Audio,
}

/// Parse an SDP body into its video/audio track descriptions. Unknown or
/// unsupported media sections (e.g. a third `m=` line) are ignored.
pub fn parse(body: &str) -> Result<ParsedSdp, Error> {
    let mut sdp = ParsedSdp::default();
    let mut current = Media::None;
    let mut video_pt: Option<u8> = None;
    let mut audio_pt: Option<u8> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("m=video ") {
            current = Media::Video;
            video_pt = last_whitespace_field(rest).and_then(|s| s.parse().ok());
            sdp.video = video_pt.map(|pt| VideoTrack {
                payload_type: pt,
                ..Default::default()
            });
        } else if let Some(rest) = line.strip_prefix("m=audio ") {
            current = Media::Audio;
            audio_pt = last_whitespace_field(rest).and_then(|s| s.parse().ok());
            sdp.audio = audio_pt.map(|pt| AudioTrack {
                payload_type: pt,
                ..Default::default()
            });
        } else if let Some(rest) = line.strip_prefix("a=control:") {
            match current {
                Media::Video => {
                    if let Some(t) = sdp.video.as_mut() {
                        t.track_id = rest.to_string();
                    }
                }
                Media::Audio => {
                    if let Some(t) = sdp.audio.as_mut() {
                        t.track_id = rest.to_string();
                    }
                }
                Media::None => {}
            }
        } else if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            let Some((pt_str, attrs)) = rest.split_once(' ') else {
                continue;
            };
            let Ok(pt) = pt_str.parse::<u8>() else {
                continue;
            };
            let mut fields = attrs.split('/');
            let _codec_name = fields.next();
            let clock_rate: u32 = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let channels: u8 = fields.next().and_then(|s| s.parse().ok()).unwrap_or(1);

            if current == Media::Video && Some(pt) == video_pt {
                if let Some(t) = sdp.video.as_mut() {
                    t.clock_rate = clock_rate;
                }
            } else if current == Media::Audio && Some(pt) == audio_pt {
                if let Some(t) = sdp.audio.as_mut() {
                    t.clock_rate = clock_rate;
                    t.channels = channels;
                }
            }
        } else if let Some(rest) = line.strip_prefix("a=fmtp:") {
            let Some((_, params)) = rest.split_once(' ') else {
                continue;
            };
            match current {
                Media::Video => {
                    if let Some(t) = sdp.video.as_mut() {
                        apply_video_fmtp(t, params)?;
                    }
                }
                Media::Audio => {
                    if let Some(t) = sdp.audio.as_mut() {
                        apply_audio_fmtp(t, params)?;
                    }
                }
                Media::None => {}
            }
        }
    }

    Ok(sdp)
}

fn last_whitespace_field(s: &str) -> Option<&str> {
    s.split_whitespace().last()
}

fn apply_video_fmtp(track: &mut VideoTrack, params: &str) -> Result<(), Error> {
    for param in params.split(';') {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("sprop-parameter-sets=") {
            let (sps_b64, pps_b64) = value.split_once(',').ok_or_else(|| Error::RtspParse {
                kind: ParseErrorKind::InvalidSdp("sprop-parameter-sets missing comma".into()),
            })?;
            track.sps = BASE64_STANDARD.decode(sps_b64).map_err(|_| Error::RtspParse {
                kind: ParseErrorKind::InvalidSdp("sprop-parameter-sets SPS is not base64".into()),
            })?;
            track.pps = BASE64_STANDARD.decode(pps_b64).map_err(|_| Error::RtspParse {
                kind: ParseErrorKind::InvalidSdp("sprop-parameter-sets PPS is not base64".into()),
            })?;
        }
    }
    Ok(())
}

fn apply_audio_fmtp(track: &mut AudioTrack, params: &str) -> Result<(), Error> {
    for param in params.split(';') {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("config=") {
            track.aac_config = decode_hex(value)?;
        }
    }
    Ok(())
}

fn decode_hex(s: &str) -> Result<Vec<u8>, Error> {
    if s.len() % 2 != 0 {
        return Err(Error::RtspParse {
            kind: ParseErrorKind::InvalidSdp("AAC config hex has odd length".into()),
        });
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| Error::RtspParse {
                kind: ParseErrorKind::InvalidSdp("AAC config is not valid hex".into()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=live\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 96\r\n\
a=control:trackID=0\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAHpZUCg+I,aM48gA==\r\n\
m=audio 0 RTP/AVP 97\r\n\
a=control:trackID=1\r\n\
a=rtpmap:97 MPEG4-GENERIC/44100/2\r\n\
a=fmtp:97 config=1210\r\n";

    #[test]
    fn parses_video_and_audio_tracks() {
        let sdp = parse(SAMPLE).unwrap();
        let video = sdp.video.unwrap();
        assert_eq!(video.track_id, "trackID=0");
        assert_eq!(video.payload_type, 96);
        assert_eq!(video.clock_rate, 90000);
        assert!(!video.sps.is_empty());
        assert!(!video.pps.is_empty());

        let audio = sdp.audio.unwrap();
        assert_eq!(audio.track_id, "trackID=1");
        assert_eq!(audio.clock_rate, 44100);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.aac_config, vec![0x12, 0x10]);
    }

    #[test]
    fn missing_media_sections_yield_none() {
        let sdp = parse("v=0\r\ns=empty\r\n").unwrap();
        assert!(sdp.video.is_none());
        assert!(sdp.audio.is_none());
    }

    #[test]
    fn rejects_malformed_aac_config_hex() {
        let bad = SAMPLE.replace("config=1210", "config=zz");
        assert!(parse(&bad).is_err());
    }
}
