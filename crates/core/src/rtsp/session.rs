//! RTSP publish session state machine (C8, §4.8).
//!
//! Grounded in `original_source/trunk/src/app/srs_app_rtsp.cpp`'s
//! `SrsRtspConn`: OPTIONS → ANNOUNCE → SETUP(video) → SETUP(audio) →
//! RECORD, one TCP connection per publisher, two UDP RTP receivers bound
//! during SETUP.
//!
//! Split in two here, unlike the original's single `SrsRtspConn`: the
//! [`conn::Connection<H>`](crate::conn::Connection) wrapper this port's
//! accept loop uses holds its handler behind a plain `Mutex<H>`, held for
//! the whole duration of each `do_cycle` call (including its blocking
//! socket read). A literal `Weak<RtspSession>` handed to the RTP receiver
//! threads would make every RTP packet wait on that mutex — up to the
//! read-deadline — before it could even look at media state. [`SessionCore`]
//! carries only the state the RTP receivers and the RTSP request loop both
//! need, behind its own mutex, so the two never contend on the TCP-layer lock.
//! `RtspSession` is the `ConnectionHandler`; `SessionCore` is the `RtpSink`.

use std::io::{BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;

use crate::conn::ConnectionHandler;
use crate::coroutine::CancelToken;
use crate::error::{Error, ParseErrorKind};
use crate::media::aac::AacCodec;
use crate::media::avcache::AvAlignmentCache;
use crate::media::jitter::JitterCorrector;
use crate::media::rtp::{RtpPacket, RtpSink, UdpRtpReceiver};
use crate::rtsp::caster::CasterShared;
use crate::rtsp::request::{ReadOutcome, RtspRequest};
use crate::rtsp::response::RtspResponse;
use crate::rtsp::sdp::{self, AudioTrack, VideoTrack};
use crate::rtsp::transmux::Transmuxer;

const VIDEO_STREAM_ID: i32 = 0;
const AUDIO_STREAM_ID: i32 = 1;
/// RTSP's RTP clock here is always the standard 90kHz video timebase (the
/// original's `/ 90` conversions assume it throughout); audio shares it
/// rather than its own sample-rate clock, matching the original's jitter
/// and alignment math exactly.
const CLOCK_TO_MS: i64 = 90;
const SOCKET_POLL_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStage {
    AwaitOptions,
    AwaitAnnounce,
    AwaitSetup,
    Recording,
}

/// Media-plane state reachable from the RTP receiver threads: jitter
/// correction, A/V alignment, and the transmuxer (§4.6, §4.7, §4.9).
struct MediaState {
    video_jitter: JitterCorrector,
    audio_jitter: JitterCorrector,
    avcache: AvAlignmentCache,
    aac_codec: AacCodec,
    transmux: Transmuxer,
}

impl MediaState {
    /// Open the publish and send the sequence headers on first use,
    /// mirroring the original's `connect()` being idempotent and called at
    /// the top of every RTP delivery.
    fn ensure_started(&mut self, sps: &[u8], pps: &[u8], aac_config: &[u8]) -> Result<(), Error> {
        if self.transmux.is_connected() {
            return Ok(());
        }
        let pts_ms = (self.video_jitter.timestamp() / CLOCK_TO_MS) as u32;
        self.transmux.write_sequence_header(sps, pps, &self.aac_codec, aac_config, pts_ms)
    }

    fn on_video(&mut self, ts: u32, nalu: &[u8]) -> Result<(), Error> {
        let pts = self.video_jitter.correct(ts as i64);
        // TODO: the original never resolves true B-frame dts; this port
        // preserves the dts == pts approximation rather than inventing one.
        let dts = pts;

        for sample in self.avcache.on_video(dts) {
            self.transmux.write_audio_raw_frame(&self.aac_codec, &sample.frame, sample.timestamp_ms)?;
        }

        let dts_ms = (dts / CLOCK_TO_MS) as u32;
        self.transmux.write_h264_ipb_frame(nalu, dts_ms)
    }

    fn on_audio(&mut self, ts: u32, payload: &[u8]) {
        let dts = self.audio_jitter.correct(ts as i64);
        let frames = extract_aac_frames(payload);
        if !frames.is_empty() {
            self.avcache.on_audio(dts, frames);
        }
    }
}

/// Parse the RFC 3640 (`MPEG4-GENERIC`) AU-header section out of one RTP
/// audio payload and return each access unit's raw bytes. Assumes the
/// 2-byte-per-AU-header form (13-bit size, 3-bit index/index-delta), which
/// is what every encoder this bridges against emits for one-AU-per-header
/// framing.
fn extract_aac_frames(payload: &[u8]) -> Vec<Vec<u8>> {
    if payload.len() < 2 {
        return Vec::new();
    }
    let headers_len_bits = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    let headers_len_bytes = headers_len_bits.div_ceil(8);
    let headers_start = 2;
    let headers_end = headers_start + headers_len_bytes;
    if payload.len() < headers_end {
        return Vec::new();
    }

    let sizes: Vec<usize> = payload[headers_start..headers_end]
        .chunks_exact(2)
        .map(|c| (u16::from_be_bytes([c[0], c[1]]) >> 3) as usize)
        .collect();

    let mut frames = Vec::with_capacity(sizes.len());
    let mut offset = headers_end;
    for size in sizes {
        if offset + size > payload.len() {
            break;
        }
        frames.push(payload[offset..offset + size].to_vec());
        offset += size;
    }
    frames
}

/// The `RtpSink` side of a session: reachable concurrently from up to two
/// RTP receiver threads, independent of the RTSP TCP loop's own lock.
pub struct SessionCore {
    media: Mutex<MediaState>,
    sps: Vec<u8>,
    pps: Vec<u8>,
    aac_config: Vec<u8>,
    /// Set when a transmux write fails; the RTSP loop checks this each
    /// cycle and exits, matching "send failures close the outbound publish
    /// and propagate; the session then exits and the manager cleans up."
    failed: AtomicBool,
}

impl SessionCore {
    fn new(video: &VideoTrack, audio: &AudioTrack, transmux: Transmuxer) -> Result<Arc<Self>, Error> {
        let aac_codec = AacCodec::parse(&audio.aac_config)?;
        Ok(Arc::new(Self {
            media: Mutex::new(MediaState {
                video_jitter: JitterCorrector::new(),
                audio_jitter: JitterCorrector::new(),
                avcache: AvAlignmentCache::new(),
                aac_codec,
                transmux,
            }),
            sps: video.sps.clone(),
            pps: video.pps.clone(),
            aac_config: audio.aac_config.clone(),
            failed: AtomicBool::new(false),
        }))
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn fail(&self, err: &Error) {
        tracing::warn!(error = %err, "transmux failed, session will close");
        self.failed.store(true, Ordering::SeqCst);
    }
}

impl RtpSink for SessionCore {
    fn on_rtp_packet(&self, stream_id: i32, packet: RtpPacket) {
        let mut media = self.media.lock().unwrap();
        if let Err(e) = media.ensure_started(&self.sps, &self.pps, &self.aac_config) {
            drop(media);
            self.fail(&e);
            return;
        }

        let result = match stream_id {
            VIDEO_STREAM_ID => media.on_video(packet.timestamp, &packet.payload),
            AUDIO_STREAM_ID => {
                media.on_audio(packet.timestamp, &packet.payload);
                Ok(())
            }
            _ => Ok(()),
        };
        drop(media);

        if let Err(e) = result {
            self.fail(&e);
        }
    }
}

/// Parse `rtsp://host[:port]/app/stream[.sdp]` into `(app, stream)`. The
/// last path segment is the stream name (`.sdp` stripped); everything
/// before it is the app, defaulting to `live` for a bare one-segment path.
fn split_app_stream(uri: &str) -> (String, String) {
    let path = uri
        .split_once("://")
        .and_then(|(_, rest)| rest.split_once('/'))
        .map(|(_, path)| path)
        .unwrap_or("");
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.split_last() {
        Some((stream, app_segments)) if !app_segments.is_empty() => {
            (app_segments.join("/"), stream.trim_end_matches(".sdp").to_string())
        }
        Some((stream, _)) => ("live".to_string(), stream.trim_end_matches(".sdp").to_string()),
        None => ("live".to_string(), String::new()),
    }
}

fn generate_session_id() -> String {
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// The `ConnectionHandler` side of a session: owns the TCP socket and all
/// negotiation-only state, touched exclusively inside serialized
/// `do_cycle` calls.
pub struct RtspSession {
    id: u32,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    buf: String,
    stage: SessionStage,
    session_id: String,
    shared: Arc<CasterShared>,
    video_track: Option<VideoTrack>,
    audio_track: Option<AudioTrack>,
    app: String,
    stream: String,
    core: Option<Arc<SessionCore>>,
    video_ports: Option<(u16, u16)>,
    audio_ports: Option<(u16, u16)>,
    video_rtp: Option<UdpRtpReceiver>,
    audio_rtp: Option<UdpRtpReceiver>,
}

impl RtspSession {
    pub fn new(id: u32, stream: TcpStream, shared: Arc<CasterShared>) -> Result<Self, Error> {
        stream.set_read_timeout(Some(SOCKET_POLL_TIMEOUT)).map_err(|e| Error::SocketCreate(e.to_string()))?;
        let writer = stream.try_clone().map_err(Error::Io)?;
        Ok(Self {
            id,
            reader: BufReader::new(stream),
            writer,
            buf: String::new(),
            stage: SessionStage::AwaitOptions,
            session_id: generate_session_id(),
            shared,
            video_track: None,
            audio_track: None,
            app: String::new(),
            stream: String::new(),
            core: None,
            video_ports: None,
            audio_ports: None,
            video_rtp: None,
            audio_rtp: None,
        })
    }

    fn handle_request(&mut self, req: RtspRequest, cancel: &CancelToken) -> Result<RtspResponse, Error> {
        match req.method.as_str() {
            "OPTIONS" => self.handle_options(),
            "ANNOUNCE" => self.handle_announce(&req),
            "SETUP" => self.handle_setup(&req, cancel),
            "RECORD" => self.handle_record(&req),
            "TEARDOWN" => self.handle_teardown(),
            _ => Ok(RtspResponse::method_not_allowed()),
        }
    }

    fn handle_options(&mut self) -> Result<RtspResponse, Error> {
        if self.stage != SessionStage::AwaitOptions {
            return Ok(RtspResponse::method_not_allowed());
        }
        self.stage = SessionStage::AwaitAnnounce;
        Ok(RtspResponse::ok().add_header("Public", "OPTIONS, ANNOUNCE, SETUP, RECORD, TEARDOWN"))
    }

    fn handle_announce(&mut self, req: &RtspRequest) -> Result<RtspResponse, Error> {
        if self.stage != SessionStage::AwaitAnnounce {
            return Ok(RtspResponse::method_not_allowed());
        }
        let parsed = sdp::parse(&req.body)?;
        let video = parsed.video.ok_or_else(|| Error::RtspParse {
            kind: ParseErrorKind::InvalidSdp("ANNOUNCE missing video track".into()),
        })?;
        let audio = parsed.audio.ok_or_else(|| Error::RtspParse {
            kind: ParseErrorKind::InvalidSdp("ANNOUNCE missing audio track".into()),
        })?;

        let (app, stream) = split_app_stream(&req.uri);
        self.app = app;
        self.stream = stream;

        let transmux = Transmuxer::new(
            self.shared.output_url_template.clone(),
            self.app.clone(),
            self.stream.clone(),
            self.shared.rtmp_connect_timeout,
            self.shared.rtmp_send_pulse,
        );
        self.core = Some(SessionCore::new(&video, &audio, transmux)?);
        self.video_track = Some(video);
        self.audio_track = Some(audio);

        self.stage = SessionStage::AwaitSetup;
        Ok(RtspResponse::ok())
    }

    /// Route a SETUP to the video or audio slot by matching its URI's
    /// trailing track id against the ANNOUNCE-parsed tracks (mirroring
    /// `original_source`'s `req->stream_id == video_id` check), not by SETUP
    /// call order — a client may legally SETUP audio before video.
    fn handle_setup(&mut self, req: &RtspRequest, cancel: &CancelToken) -> Result<RtspResponse, Error> {
        if self.stage != SessionStage::AwaitSetup {
            return Ok(RtspResponse::method_not_allowed());
        }

        let track_id = req.track_id().ok_or_else(|| Error::RtspParse {
            kind: ParseErrorKind::InvalidSdp("SETUP URI carries no track id".into()),
        })?;
        let video_track_id = self.video_track.as_ref().map(|t| t.track_id.as_str());
        let audio_track_id = self.audio_track.as_ref().map(|t| t.track_id.as_str());

        let expect_video = if self.video_rtp.is_none() && Some(track_id) == video_track_id {
            true
        } else if self.audio_rtp.is_none() && Some(track_id) == audio_track_id {
            false
        } else {
            return Ok(RtspResponse::bad_request());
        };

        let transport = req.get_header("Transport").ok_or_else(|| {
            Error::RtspTransportMissing("SETUP with no Transport header".into())
        })?;
        let client_ports = parse_client_port(transport)
            .ok_or_else(|| Error::RtspTransportMissing(format!("unparseable Transport: {transport}")))?;

        let (server_lo, server_hi) = self.shared.port_pool.alloc()?;
        let core = self.core.clone().ok_or_else(|| Error::RtspParse {
            kind: ParseErrorKind::InvalidSdp("SETUP before ANNOUNCE".into()),
        })?;
        let sink: std::sync::Weak<dyn RtpSink> = Arc::downgrade(&core) as std::sync::Weak<dyn RtpSink>;

        if expect_video {
            let receiver = UdpRtpReceiver::bind(server_lo, VIDEO_STREAM_ID, sink, cancel.clone())?;
            self.video_rtp = Some(receiver);
            self.video_ports = Some((server_lo, server_hi));
        } else {
            let receiver = UdpRtpReceiver::bind(server_lo, AUDIO_STREAM_ID, sink, cancel.clone())?;
            self.audio_rtp = Some(receiver);
            self.audio_ports = Some((server_lo, server_hi));
        }

        self.stage = if self.video_rtp.is_some() && self.audio_rtp.is_some() {
            SessionStage::Recording
        } else {
            SessionStage::AwaitSetup
        };
        Ok(RtspResponse::ok()
            .add_header("Session", &self.session_id)
            .add_header(
                "Transport",
                &format!(
                    "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                    client_ports.0, client_ports.1, server_lo, server_hi
                ),
            ))
    }

    fn handle_record(&mut self, req: &RtspRequest) -> Result<RtspResponse, Error> {
        if self.stage != SessionStage::Recording {
            return Ok(RtspResponse::method_not_allowed());
        }
        if let Some(session) = req.get_header("Session") {
            if session != self.session_id {
                return Ok(RtspResponse::bad_request());
            }
        }
        Ok(RtspResponse::ok().add_header("Session", &self.session_id))
    }

    fn handle_teardown(&mut self) -> Result<RtspResponse, Error> {
        Ok(RtspResponse::ok().add_header("Session", &self.session_id))
    }

    fn free_ports(&mut self) {
        if let Some((lo, hi)) = self.video_ports.take() {
            self.shared.port_pool.free(lo, hi);
        }
        if let Some((lo, hi)) = self.audio_ports.take() {
            self.shared.port_pool.free(lo, hi);
        }
    }
}

fn parse_client_port(transport: &str) -> Option<(u16, u16)> {
    transport
        .split(';')
        .find_map(|field| field.strip_prefix("client_port="))
        .and_then(|range| range.split_once('-'))
        .and_then(|(lo, hi)| Some((lo.parse().ok()?, hi.parse().ok()?)))
}

impl ConnectionHandler for RtspSession {
    fn id(&self) -> u32 {
        self.id
    }

    fn do_cycle(&mut self, cancel: &CancelToken) -> Result<(), Error> {
        if let Some(core) = &self.core {
            if core.failed() {
                return Err(Error::RemuxMissingSequence("transmux failed, closing RTSP session".into()));
            }
        }

        match RtspRequest::try_read(&mut self.reader, &mut self.buf)? {
            ReadOutcome::WouldBlock => Ok(()),
            ReadOutcome::Closed => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "client closed RTSP connection",
            ))),
            ReadOutcome::Request(req) => {
                let cseq = req.cseq().map(str::to_string);
                let is_teardown = req.method == "TEARDOWN";
                let response = match self.handle_request(req, cancel) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "rtsp request failed");
                        RtspResponse::bad_request()
                    }
                };
                let response = match cseq {
                    Some(c) => response.add_header("CSeq", &c),
                    None => response,
                };
                self.writer.write_all(response.serialize().as_bytes()).map_err(Error::Io)?;
                if is_teardown {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "session torn down by client",
                    )));
                }
                Ok(())
            }
        }
    }
}

impl Drop for RtspSession {
    fn drop(&mut self) {
        self.free_ports();
    }
}
