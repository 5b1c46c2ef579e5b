//! Integration test: full RTSP publish handshake ANNOUNCE → SETUP → RECORD,
//! followed by RTP ingest for both tracks, verified end-to-end against a
//! minimal fake RTMP peer standing in for the outbound publish target.
//!
//! Mirrors the teacher's own fixed-port, manual-TCP-client integration test
//! shape, extended with a UDP RTP sender and a hand-rolled RTMP server
//! stub (just enough handshake/connect/createStream/publish to let the
//! transmuxer proceed) since there is no outside RTMP server to publish to
//! in a test environment.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use castbridge::rtmp::amf::{self, AmfValue};
use castbridge::{Caster, Config};

fn rtsp_request(stream: &mut TcpStream, request: &str) -> std::io::Result<String> {
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut response = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        response.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    if let Some(len) = response
        .lines()
        .find(|l| l.to_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        if len > 0 {
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;
            response.push_str(&String::from_utf8_lossy(&body));
        }
    }

    Ok(response)
}

fn header_value<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}:");
    response
        .lines()
        .find(|l| l.to_lowercase().starts_with(&prefix.to_lowercase()))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim())
}

fn server_port_from_transport(transport: &str) -> u16 {
    transport
        .split(';')
        .find_map(|f| f.strip_prefix("server_port="))
        .and_then(|r| r.split_once('-'))
        .map(|(lo, _)| lo.parse().unwrap())
        .expect("Transport header missing server_port")
}

fn rtp_datagram(seq: u16, ts: u32, payload_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 12 + payload.len()];
    buf[0] = 0x80;
    buf[1] = 0x80 | payload_type; // marker set: every delivery here is one complete access unit
    buf[2..4].copy_from_slice(&seq.to_be_bytes());
    buf[4..8].copy_from_slice(&ts.to_be_bytes());
    buf[8..12].copy_from_slice(&0x1234_5678u32.to_be_bytes());
    buf[12..].copy_from_slice(payload);
    buf
}

fn aac_au(frame: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x00, 0x10];
    payload.extend_from_slice(&((frame.len() as u16) << 3).to_be_bytes());
    payload.extend_from_slice(frame);
    payload
}

struct RtmpMessage {
    type_id: u8,
    timestamp: u32,
    payload: Vec<u8>,
}

/// Read one RTMP command/media message in the same (fmt=0, csid=3) shape
/// `RtmpClient::write_message` always emits, since this stub never needs to
/// understand any other chunk format.
fn read_client_message(socket: &mut TcpStream) -> std::io::Result<(u8, u32, Vec<u8>)> {
    let mut first = [0u8; 1];
    socket.read_exact(&mut first)?;
    let mut hdr = [0u8; 11];
    socket.read_exact(&mut hdr)?;
    let ts = u32::from_be_bytes([0, hdr[0], hdr[1], hdr[2]]);
    let len = u32::from_be_bytes([0, hdr[3], hdr[4], hdr[5]]) as usize;
    let type_id = hdr[6];
    let mut payload = vec![0u8; len];
    socket.read_exact(&mut payload)?;
    Ok((type_id, ts, payload))
}

fn write_server_message(socket: &mut TcpStream, type_id: u8, stream_id: u32, payload: &[u8]) -> std::io::Result<()> {
    let mut header = Vec::with_capacity(12 + payload.len());
    header.push(3); // fmt=0, csid=3
    header.extend_from_slice(&0u32.to_be_bytes()[1..]); // timestamp
    header.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
    header.push(type_id);
    header.extend_from_slice(&stream_id.to_le_bytes());
    header.extend_from_slice(payload);
    socket.write_all(&header)
}

/// Minimal RTMP server stub: simple handshake, accepts `connect` /
/// `createStream` / `publish`, then forwards every subsequent audio/video
/// message to `tx` until `expected` have arrived.
fn spawn_fake_rtmp_server(expected: usize) -> (u16, mpsc::Receiver<Vec<RtmpMessage>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().expect("rtmp stub accept");
        socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut c0 = [0u8; 1];
        socket.read_exact(&mut c0).unwrap();
        let mut c1 = vec![0u8; 1536];
        socket.read_exact(&mut c1).unwrap();
        socket.write_all(&[3]).unwrap();
        socket.write_all(&vec![0u8; 1536]).unwrap();
        socket.write_all(&vec![0u8; 1536]).unwrap();
        let mut c2 = vec![0u8; 1536];
        socket.read_exact(&mut c2).unwrap();

        let mut collected = Vec::new();
        loop {
            let (type_id, ts, payload) = read_client_message(&mut socket).expect("rtmp stub read");
            match type_id {
                1 => continue, // Set Chunk Size, ignored
                20 => {
                    let (name, txn, _args) = amf::decode_command(&payload).expect("decode command");
                    match name.as_str() {
                        "connect" => {
                            let body = amf::encode_command("_result", txn, AmfValue::Object(vec![]), &[]);
                            write_server_message(&mut socket, 20, 0, &body).unwrap();
                        }
                        "createStream" => {
                            let body =
                                amf::encode_command("_result", txn, AmfValue::Null, &[AmfValue::Number(1.0)]);
                            write_server_message(&mut socket, 20, 0, &body).unwrap();
                        }
                        "publish" => {
                            let body = amf::encode_command(
                                "onStatus",
                                0.0,
                                AmfValue::Null,
                                &[AmfValue::Object(vec![(
                                    "level".into(),
                                    AmfValue::String("status".into()),
                                )])],
                            );
                            write_server_message(&mut socket, 20, 1, &body).unwrap();
                        }
                        _ => {}
                    }
                }
                8 | 9 => {
                    collected.push(RtmpMessage { type_id, timestamp: ts, payload });
                    if collected.len() >= expected {
                        let _ = tx.send(collected);
                        return;
                    }
                }
                _ => {}
            }
        }
    });

    (port, rx)
}

const RTSP_BIND: &str = "127.0.0.1:18556";

#[test]
fn announce_setup_record_and_rtp_ingest_reach_outbound_rtmp() {
    let (rtmp_port, rtmp_rx) = spawn_fake_rtmp_server(5);

    let mut config = Config::default();
    config.rtsp_listen_addr = RTSP_BIND.to_string();
    config.output_url_template = format!("rtmp://127.0.0.1:{rtmp_port}/[app]/[stream]");
    config.rtp_port_min = 19000;
    config.rtp_port_max = 19020;

    let caster = Arc::new(Caster::new(&config));
    caster.start().expect("caster start");

    let addr = RTSP_BIND.to_socket_addrs().unwrap().next().unwrap();
    let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect to caster");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.set_write_timeout(Some(Duration::from_secs(2))).unwrap();

    let base_uri = "rtsp://127.0.0.1:18556/live/mystream";

    let opt_resp = rtsp_request(&mut stream, &format!("OPTIONS {base_uri} RTSP/1.0\r\nCSeq: 1\r\n\r\n")).unwrap();
    assert!(opt_resp.starts_with("RTSP/1.0 200 OK"), "OPTIONS failed: {opt_resp}");
    assert!(header_value(&opt_resp, "Public").is_some());

    let sdp_body = "v=0\r\n\
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
    let announce_req = format!(
        "ANNOUNCE {base_uri} RTSP/1.0\r\nCSeq: 2\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
        sdp_body.len(),
        sdp_body
    );
    let announce_resp = rtsp_request(&mut stream, &announce_req).unwrap();
    assert!(announce_resp.starts_with("RTSP/1.0 200 OK"), "ANNOUNCE failed: {announce_resp}");

    let setup_video_req = format!(
        "SETUP {base_uri}/trackID=0 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port=6000-6001\r\n\r\n"
    );
    let setup_video_resp = rtsp_request(&mut stream, &setup_video_req).unwrap();
    assert!(setup_video_resp.starts_with("RTSP/1.0 200 OK"), "SETUP video failed: {setup_video_resp}");
    let video_server_port = server_port_from_transport(header_value(&setup_video_resp, "Transport").unwrap());
    let session_id = header_value(&setup_video_resp, "Session").unwrap().to_string();

    let setup_audio_req = format!(
        "SETUP {base_uri}/trackID=1 RTSP/1.0\r\nCSeq: 4\r\nTransport: RTP/AVP;unicast;client_port=6002-6003\r\n\r\n"
    );
    let setup_audio_resp = rtsp_request(&mut stream, &setup_audio_req).unwrap();
    assert!(setup_audio_resp.starts_with("RTSP/1.0 200 OK"), "SETUP audio failed: {setup_audio_resp}");
    let audio_server_port = server_port_from_transport(header_value(&setup_audio_resp, "Transport").unwrap());

    let record_req = format!("RECORD {base_uri} RTSP/1.0\r\nCSeq: 5\r\nSession: {session_id}\r\n\r\n");
    let record_resp = rtsp_request(&mut stream, &record_req).unwrap();
    assert!(record_resp.starts_with("RTSP/1.0 200 OK"), "RECORD failed: {record_resp}");

    let rtp_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let video_dest = ("127.0.0.1", video_server_port);
    let audio_dest = ("127.0.0.1", audio_server_port);

    let idr_nalu = [0x65u8, 1, 2, 3, 4];
    let inter_nalu = [0x41u8, 9, 9];
    let aac_frame = [7u8, 7, 7];

    rtp_socket.send_to(&rtp_datagram(1, 1000, 96, &idr_nalu), video_dest).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    rtp_socket.send_to(&rtp_datagram(1, 1000, 97, &aac_au(&aac_frame)), audio_dest).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    rtp_socket.send_to(&rtp_datagram(2, 2800, 96, &inter_nalu), video_dest).unwrap();

    let messages = rtmp_rx.recv_timeout(Duration::from_secs(5)).expect("rtmp messages");
    assert_eq!(messages.len(), 5);

    // video sequence header, audio sequence header
    assert_eq!(messages[0].type_id, 9);
    assert_eq!(messages[0].payload[1], 0); // AvcPacketType::SequenceHeader
    assert_eq!(messages[1].type_id, 8);
    assert_eq!(messages[1].payload[1], 0); // AAC sequence header

    // first video frame (keyframe, dts 0)
    assert_eq!(messages[2].type_id, 9);
    assert_eq!(messages[2].payload[0] >> 4, 1); // VideoFrameType::Key
    assert_eq!(messages[2].payload[1], 1); // AvcPacketType::Nalu
    assert_eq!(messages[2].timestamp, 0);

    // audio raw frame, flushed once the second video tick supersedes it
    assert_eq!(messages[3].type_id, 8);
    assert_eq!(messages[3].payload[1], 1); // raw AAC packet type
    assert_eq!(&messages[3].payload[2..], &aac_frame);
    assert_eq!(messages[3].timestamp, 0); // interpolated to the pending group's own dts

    // second video frame (inter, dts 20ms at the 90kHz RTP clock)
    assert_eq!(messages[4].type_id, 9);
    assert_eq!(messages[4].payload[0] >> 4, 2); // VideoFrameType::Inter
    assert_eq!(messages[4].timestamp, 20);

    caster.stop();
}

/// Same handshake, but the client SETUPs audio before video — legal per RFC
/// 2326 and done by some real publishers. Routing must follow the SETUP
/// URI's track id, not call order, or audio RTP would land on the slot
/// video was bound to (and vice versa).
#[test]
fn setup_order_does_not_affect_track_routing() {
    let (rtmp_port, rtmp_rx) = spawn_fake_rtmp_server(3);

    let mut config = Config::default();
    config.rtsp_listen_addr = "127.0.0.1:18557".to_string();
    config.output_url_template = format!("rtmp://127.0.0.1:{rtmp_port}/[app]/[stream]");
    config.rtp_port_min = 19100;
    config.rtp_port_max = 19120;

    let caster = Arc::new(Caster::new(&config));
    caster.start().expect("caster start");

    let addr = config.rtsp_listen_addr.to_socket_addrs().unwrap().next().unwrap();
    let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect to caster");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.set_write_timeout(Some(Duration::from_secs(2))).unwrap();

    let base_uri = "rtsp://127.0.0.1:18557/live/mystream";

    rtsp_request(&mut stream, &format!("OPTIONS {base_uri} RTSP/1.0\r\nCSeq: 1\r\n\r\n")).unwrap();

    let sdp_body = "v=0\r\n\
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
    let announce_req = format!(
        "ANNOUNCE {base_uri} RTSP/1.0\r\nCSeq: 2\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
        sdp_body.len(),
        sdp_body
    );
    let announce_resp = rtsp_request(&mut stream, &announce_req).unwrap();
    assert!(announce_resp.starts_with("RTSP/1.0 200 OK"), "ANNOUNCE failed: {announce_resp}");

    // Audio (trackID=1) first.
    let setup_audio_req = format!(
        "SETUP {base_uri}/trackID=1 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port=6002-6003\r\n\r\n"
    );
    let setup_audio_resp = rtsp_request(&mut stream, &setup_audio_req).unwrap();
    assert!(setup_audio_resp.starts_with("RTSP/1.0 200 OK"), "SETUP audio failed: {setup_audio_resp}");
    let audio_server_port = server_port_from_transport(header_value(&setup_audio_resp, "Transport").unwrap());
    let session_id = header_value(&setup_audio_resp, "Session").unwrap().to_string();

    // Video (trackID=0) second.
    let setup_video_req = format!(
        "SETUP {base_uri}/trackID=0 RTSP/1.0\r\nCSeq: 4\r\nTransport: RTP/AVP;unicast;client_port=6000-6001\r\n\r\n"
    );
    let setup_video_resp = rtsp_request(&mut stream, &setup_video_req).unwrap();
    assert!(setup_video_resp.starts_with("RTSP/1.0 200 OK"), "SETUP video failed: {setup_video_resp}");
    let video_server_port = server_port_from_transport(header_value(&setup_video_resp, "Transport").unwrap());

    let record_req = format!("RECORD {base_uri} RTSP/1.0\r\nCSeq: 5\r\nSession: {session_id}\r\n\r\n");
    let record_resp = rtsp_request(&mut stream, &record_req).unwrap();
    assert!(record_resp.starts_with("RTSP/1.0 200 OK"), "RECORD failed: {record_resp}");

    let rtp_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let idr_nalu = [0x65u8, 1, 2, 3, 4];

    // Send video to the port returned by the *second* SETUP call; if
    // routing still went by call order this would be mistaken for audio.
    rtp_socket
        .send_to(&rtp_datagram(1, 1000, 96, &idr_nalu), ("127.0.0.1", video_server_port))
        .unwrap();

    let messages = rtmp_rx.recv_timeout(Duration::from_secs(5)).expect("rtmp messages");
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].type_id, 9); // video sequence header
    assert_eq!(messages[1].type_id, 8); // audio sequence header
    assert_eq!(messages[2].type_id, 9); // the video frame just sent, correctly routed
    assert_eq!(messages[2].payload[0] >> 4, 1); // VideoFrameType::Key
    assert_eq!(messages[2].payload[1], 1); // AvcPacketType::Nalu

    let _ = audio_server_port;
    caster.stop();
}
