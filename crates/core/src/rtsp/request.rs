//! RTSP request parsing (RFC 2326 §6), extended with a `Content-Length`
//! body read for ANNOUNCE's SDP payload — the teacher's `protocol::request`
//! explicitly left body parsing unimplemented since its DESCRIBE-only
//! server never received one.

use std::io::BufRead;

use crate::error::{Error, ParseErrorKind};

/// A parsed RTSP request: request line, headers, and (if `Content-Length`
/// was present) the body read exactly to length.
#[derive(Debug)]
pub struct RtspRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Outcome of one read attempt against a socket with a read deadline:
/// a full request, "no complete request yet, try again", or a clean close.
pub enum ReadOutcome {
    Request(RtspRequest),
    WouldBlock,
    Closed,
}

impl RtspRequest {
    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// CSeq header value, echoed in every response (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// The URI's trailing path segment. SETUP's URI is the ANNOUNCE base URI
    /// with the track's `a=control` value appended (RFC 2326 §C.1.1) — e.g.
    /// `rtsp://host/app/stream/trackID=0` yields `Some("trackID=0")`, the
    /// same form `sdp::VideoTrack`/`AudioTrack` store as `track_id`.
    pub fn track_id(&self) -> Option<&str> {
        self.uri.rsplit('/').next().filter(|s| !s.is_empty())
    }

    fn content_length(&self) -> usize {
        self.get_header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Attempt to read one request from `reader`, accumulating partial
    /// progress into `buf` across calls so a read-deadline timeout never
    /// loses bytes already read (per `BufRead::read_line`'s guarantee that
    /// bytes read before an I/O error remain in the destination buffer).
    pub fn try_read<R: BufRead>(reader: &mut R, buf: &mut String) -> Result<ReadOutcome, Error> {
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    return if buf.is_empty() {
                        Ok(ReadOutcome::Closed)
                    } else {
                        Err(Error::RtspParse {
                            kind: ParseErrorKind::EmptyRequest,
                        })
                    };
                }
                Ok(_) => {
                    let is_blank = line == "\r\n" || line == "\n";
                    buf.push_str(&line);
                    if is_blank {
                        break;
                    }
                }
                Err(e) if is_read_timeout(&e) => return Ok(ReadOutcome::WouldBlock),
                Err(e) => return Err(Error::Io(e)),
            }
        }

        let request = Self::parse_head(buf)?;
        let content_length = request.content_length();
        let request = if content_length > 0 {
            let mut body_buf = vec![0u8; content_length];
            std::io::Read::read_exact(reader, &mut body_buf).map_err(Error::Io)?;
            let body = String::from_utf8(body_buf).map_err(|_| Error::RtspParse {
                kind: ParseErrorKind::InvalidSdp("body is not valid UTF-8".into()),
            })?;
            RtspRequest { body, ..request }
        } else {
            request
        };

        buf.clear();
        Ok(ReadOutcome::Request(request))
    }

    fn parse_head(raw: &str) -> Result<Self, Error> {
        let mut lines = raw.lines();

        let request_line = lines.next().ok_or(Error::RtspParse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(Error::RtspParse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon = line.find(':').ok_or(Error::RtspParse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push((line[..colon].trim().to_string(), line[colon + 1..].trim().to_string()));
        }

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers,
            body: String::new(),
        })
    }
}

fn is_read_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_options_request() {
        let raw = "OPTIONS rtsp://localhost:554/live RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let mut reader = Cursor::new(raw.as_bytes());
        let mut buf = String::new();
        match RtspRequest::try_read(&mut reader, &mut buf).unwrap() {
            ReadOutcome::Request(req) => {
                assert_eq!(req.method, "OPTIONS");
                assert_eq!(req.cseq(), Some("1"));
            }
            _ => panic!("expected a request"),
        }
    }

    #[test]
    fn reads_announce_body_by_content_length() {
        let body = "v=0\r\ns=stream\r\n";
        let raw = format!(
            "ANNOUNCE rtsp://localhost:554/live.sdp RTSP/1.0\r\nCSeq: 2\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let mut reader = Cursor::new(raw.as_bytes());
        let mut buf = String::new();
        match RtspRequest::try_read(&mut reader, &mut buf).unwrap() {
            ReadOutcome::Request(req) => {
                assert_eq!(req.method, "ANNOUNCE");
                assert_eq!(req.body, body);
            }
            _ => panic!("expected a request"),
        }
    }

    #[test]
    fn closed_on_immediate_eof() {
        let mut reader = Cursor::new(&b""[..]);
        let mut buf = String::new();
        assert!(matches!(
            RtspRequest::try_read(&mut reader, &mut buf).unwrap(),
            ReadOutcome::Closed
        ));
    }

    #[test]
    fn rejects_malformed_request_line() {
        let mut reader = Cursor::new(&b"GARBAGE\r\n\r\n"[..]);
        let mut buf = String::new();
        assert!(RtspRequest::try_read(&mut reader, &mut buf).is_err());
    }

    #[test]
    fn track_id_is_uri_trailing_segment() {
        let raw = "SETUP rtsp://localhost:554/live/mystream/trackID=1 RTSP/1.0\r\nCSeq: 3\r\n\r\n";
        let mut reader = Cursor::new(raw.as_bytes());
        let mut buf = String::new();
        match RtspRequest::try_read(&mut reader, &mut buf).unwrap() {
            ReadOutcome::Request(req) => assert_eq!(req.track_id(), Some("trackID=1")),
            _ => panic!("expected a request"),
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 9\r\n\r\n";
        let mut reader = Cursor::new(raw.as_bytes());
        let mut buf = String::new();
        match RtspRequest::try_read(&mut reader, &mut buf).unwrap() {
            ReadOutcome::Request(req) => assert_eq!(req.get_header("CSeq"), Some("9")),
            _ => panic!("expected a request"),
        }
    }
}
