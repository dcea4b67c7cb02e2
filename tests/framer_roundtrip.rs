//! Framer / parser integration tests
//!
//! Frames built by a [`Framer`] are fed through a [`Parser`] the way a
//! peer would see them, across every supported version.

use bytes::Bytes;
use spdy_mux::parser::Parser;
use spdy_mux::protocol::frames::{
    DataFrame, Frame, GoawayFrame, HeadersKind, PingFrame, RstStreamFrame, WindowUpdateFrame,
};
use spdy_mux::protocol::{
    Dialect, FrameDecoder, Framer, HeaderPair, Protocol, PushHead, RequestHead, ResponseHead,
    Settings, Version, CONNECTION_PREFACE,
};
use spdy_mux::{Headers, RstCode};

const VERSIONS: [Version; 4] = [
    Version::Spdy2,
    Version::Spdy3,
    Version::Spdy31,
    Version::Http2,
];

/// Client-side framer and the server-side parser that reads it
fn client_to_server(version: Version) -> (Framer, Parser) {
    let ours = HeaderPair::new(version, true);
    let theirs = HeaderPair::new(version, true);
    let framer = Framer::new(version, ours.compressor);
    let mut parser = Parser::new(Protocol::new(version), true);
    parser.set_decoder(FrameDecoder::new(version, true, theirs.decompressor));
    if version == Version::Http2 {
        parser.feed(Bytes::from_static(CONNECTION_PREFACE));
    }
    (framer, parser)
}

/// Server-side framer and the client-side parser that reads it
fn server_to_client(version: Version) -> (Framer, Parser) {
    let ours = HeaderPair::new(version, true);
    let theirs = HeaderPair::new(version, true);
    let framer = Framer::new(version, ours.compressor);
    let mut parser = Parser::new(Protocol::new(version), false);
    parser.set_decoder(FrameDecoder::new(version, false, theirs.decompressor));
    (framer, parser)
}

/// PING payload as each dialect carries it
fn ping_payload(version: Version, id: u8) -> Bytes {
    match version.dialect() {
        Dialect::Spdy => Bytes::from(vec![0, 0, 0, id]),
        Dialect::Http2 => Bytes::from(vec![0, 0, 0, 0, 0, 0, 0, id]),
    }
}

fn next(parser: &mut Parser) -> Frame {
    parser.next_frame().unwrap().unwrap()
}

#[test]
fn test_request_headers_are_canonical() {
    for version in VERSIONS {
        let (mut framer, mut parser) = client_to_server(version);
        let wire = framer
            .request_frame(&RequestHead {
                id: 1,
                priority: 2,
                method: "POST".into(),
                path: "/submit".into(),
                host: Some("example.com".into()),
                scheme: Some("http".into()),
                headers: Headers::from([
                    ("Content-Type", "text/plain"),
                    ("Connection", "keep-alive"),
                    ("Transfer-Encoding", "chunked"),
                ]),
                fin: false,
            })
            .unwrap();
        parser.feed(wire);

        let Frame::Headers(f) = next(&mut parser) else {
            panic!("{}: expected HEADERS", version);
        };
        assert_eq!(f.stream_id, 1);
        assert!(!f.fin);
        assert_eq!(f.headers.get(":method"), Some("POST"), "{}", version);
        assert_eq!(f.headers.get(":path"), Some("/submit"), "{}", version);
        assert_eq!(f.headers.get(":authority"), Some("example.com"), "{}", version);
        assert_eq!(f.headers.get(":scheme"), Some("http"), "{}", version);
        assert_eq!(f.headers.get("content-type"), Some("text/plain"));
        assert!(!f.headers.contains("connection"), "{}", version);
        assert!(!f.headers.contains("transfer-encoding"), "{}", version);
        assert!(!f.headers.contains(":version"), "{}", version);

        if version.dialect() == spdy_mux::Dialect::Spdy {
            assert_eq!(f.kind, HeadersKind::Request);
        }
        // Fits the two priority bits of SPDY/2 as well
        assert_eq!(f.priority, 2, "{}", version);
    }
}

#[test]
fn test_session_byte_at_a_time() {
    for version in VERSIONS {
        let (mut framer, mut parser) = client_to_server(version);
        let mut settings = Settings::new();
        settings.max_concurrent_streams = Some(100);

        let mut wire = Vec::new();
        wire.extend_from_slice(&framer.settings_frame(&settings));
        wire.extend_from_slice(
            &framer
                .request_frame(&RequestHead {
                    id: 1,
                    priority: 3,
                    method: "GET".into(),
                    path: "/".into(),
                    host: None,
                    scheme: None,
                    headers: Headers::new(),
                    fin: false,
                })
                .unwrap(),
        );
        wire.extend_from_slice(&framer.data_frame(1, b"hello", true).unwrap());
        wire.extend_from_slice(&framer.ping_frame(&[0, 0, 0, 1], false));
        wire.extend_from_slice(&framer.rst_frame(1, RstCode::Cancel));
        wire.extend_from_slice(&framer.goaway_frame(0, 0));

        let mut frames = Vec::new();
        for byte in wire {
            parser.feed(Bytes::copy_from_slice(&[byte]));
            while let Some(frame) = parser.next_frame().unwrap() {
                frames.push(frame);
            }
        }

        let names: Vec<&str> = frames.iter().map(Frame::name).collect();
        assert_eq!(
            names,
            vec!["SETTINGS", "HEADERS", "DATA", "PING", "RST_STREAM", "GOAWAY"],
            "{}",
            version
        );
        match &frames[2] {
            Frame::Data(f) => {
                assert_eq!(&f.data[..], b"hello");
                assert!(f.fin);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        match &frames[0] {
            Frame::Settings(f) => assert_eq!(f.settings.max_concurrent_streams, Some(100)),
            other => panic!("unexpected frame {:?}", other),
        }
        assert_eq!(
            frames[3],
            Frame::Ping(PingFrame {
                opaque: ping_payload(version, 1),
                ack: false,
            }),
            "{}",
            version
        );
        assert_eq!(
            frames[4],
            Frame::RstStream(RstStreamFrame {
                stream_id: 1,
                code: RstCode::Cancel.to_wire(version.dialect()),
            }),
            "{}",
            version
        );
        assert_eq!(
            frames[5],
            Frame::Goaway(GoawayFrame {
                last_stream_id: 0,
                code: 0,
                debug_data: Bytes::new(),
            }),
            "{}",
            version
        );
        assert_eq!(parser.buffered(), 0);
    }
}

#[test]
fn test_response_status_per_dialect() {
    for version in VERSIONS {
        let ours = HeaderPair::new(version, true);
        let theirs = HeaderPair::new(version, true);
        let mut framer = Framer::new(version, ours.compressor);
        let mut parser = Parser::new(Protocol::new(version), false);
        parser.set_decoder(FrameDecoder::new(version, false, theirs.decompressor));

        parser.feed(
            framer
                .response_frame(&ResponseHead {
                    id: 1,
                    status: 404,
                    reason: None,
                    headers: Headers::from([("X-Reason", "missing")]),
                    fin: true,
                })
                .unwrap(),
        );
        let Frame::Headers(f) = next(&mut parser) else {
            panic!("{}: expected HEADERS", version);
        };
        assert!(f.fin);
        assert_eq!(f.headers.get("x-reason"), Some("missing"));
        let status = f.headers.get(":status").unwrap();
        match version {
            Version::Http2 => assert_eq!(status, "404"),
            _ => assert_eq!(status, "404 Not Found"),
        }
    }
}

#[test]
fn test_control_frames_keep_their_fields() {
    for version in VERSIONS {
        let (mut framer, mut parser) = client_to_server(version);
        let dialect = version.dialect();

        let mut settings = Settings::new();
        settings.max_concurrent_streams = Some(100);
        settings.initial_window_size = Some(32768);
        parser.feed(framer.settings_frame(&settings));
        let Frame::Settings(f) = next(&mut parser) else {
            panic!("{}: expected SETTINGS", version);
        };
        assert!(!f.ack);
        assert_eq!(f.settings.max_concurrent_streams, Some(100), "{}", version);
        // SPDY/2 has no flow control to configure
        let window = if version == Version::Spdy2 {
            None
        } else {
            Some(32768)
        };
        assert_eq!(f.settings.initial_window_size, window, "{}", version);

        parser.feed(framer.window_update_frame(1, 4096));
        parser.feed(framer.window_update_frame(0, 65536));
        assert_eq!(
            next(&mut parser),
            Frame::WindowUpdate(WindowUpdateFrame {
                stream_id: 1,
                delta: 4096,
            })
        );
        assert_eq!(
            next(&mut parser),
            Frame::WindowUpdate(WindowUpdateFrame {
                stream_id: 0,
                delta: 65536,
            })
        );

        parser.feed(framer.ping_frame(&ping_payload(version, 5), false));
        assert_eq!(
            next(&mut parser),
            Frame::Ping(PingFrame {
                opaque: ping_payload(version, 5),
                ack: false,
            }),
            "{}",
            version
        );

        parser.feed(framer.rst_frame(3, RstCode::RefusedStream));
        let Frame::RstStream(f) = next(&mut parser) else {
            panic!("{}: expected RST_STREAM", version);
        };
        assert_eq!(f.stream_id, 3);
        assert_eq!(RstCode::from_wire(dialect, f.code), RstCode::RefusedStream);

        parser.feed(framer.goaway_frame(7, 1));
        assert_eq!(
            next(&mut parser),
            Frame::Goaway(GoawayFrame {
                last_stream_id: 7,
                code: 1,
                debug_data: Bytes::new(),
            }),
            "{}",
            version
        );

        parser.feed(framer.data_frame(3, b"abc", false).unwrap());
        parser.feed(framer.data_frame(3, b"", true).unwrap());
        assert_eq!(
            next(&mut parser),
            Frame::Data(DataFrame {
                stream_id: 3,
                data: Bytes::from_static(b"abc"),
                fin: false,
            })
        );
        assert_eq!(
            next(&mut parser),
            Frame::Data(DataFrame {
                stream_id: 3,
                data: Bytes::new(),
                fin: true,
            })
        );
        assert_eq!(parser.next_frame().unwrap(), None);
        assert_eq!(parser.buffered(), 0);
    }
}

#[test]
fn test_push_announcement_per_dialect() {
    for version in VERSIONS {
        let (mut framer, mut parser) = server_to_client(version);
        let frames = framer
            .push_frame(&PushHead {
                id: 2,
                parent: 1,
                priority: 3,
                method: "GET".into(),
                path: "/style.css".into(),
                host: Some("example.com".into()),
                scheme: None,
                status: 200,
                headers: Headers::from([("Content-Type", "text/css")]),
            })
            .unwrap();
        for frame in frames {
            parser.feed(frame);
        }

        let Frame::PushPromise(promise) = next(&mut parser) else {
            panic!("{}: expected a push", version);
        };
        assert_eq!(promise.stream_id, 1, "{}", version);
        assert_eq!(promise.promised_id, 2, "{}", version);
        assert_eq!(promise.priority, 3, "{}", version);
        assert!(!promise.fin);
        assert_eq!(promise.path.as_deref(), Some("/style.css"));
        assert_eq!(promise.headers.get(":method"), Some("GET"));
        assert_eq!(promise.headers.get(":authority"), Some("example.com"));

        // HTTP/2 carries the response on the promised stream
        let response = match version.dialect() {
            Dialect::Spdy => promise.headers,
            Dialect::Http2 => {
                let Frame::Headers(f) = next(&mut parser) else {
                    panic!("expected HEADERS on the promised stream");
                };
                assert_eq!(f.stream_id, 2);
                assert!(!f.fin);
                f.headers
            }
        };
        assert_eq!(response.get("content-type"), Some("text/css"), "{}", version);
        assert!(response.get(":status").unwrap().starts_with("200"), "{}", version);
        assert_eq!(parser.next_frame().unwrap(), None);
    }
}
