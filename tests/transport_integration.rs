//! Transport integration tests
//!
//! A client and a server session talk over loopback TCP.

use spdy_mux::{
    CompressionPool, ConnectionBuilder, Event, Headers, RequestOptions, Session, Version,
};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

fn serve_one(listener: TcpListener, pool: Arc<CompressionPool>, version: Version) {
    let (socket, _) = listener.accept().unwrap();
    let connection = ConnectionBuilder::new().server().version(version).build(pool);
    let mut session = Session::from_tcp_stream(connection, socket).unwrap();

    // The client may reset the socket once it has its response
    while let Ok(Some(event)) = session.next_event() {
        match event {
            Event::Stream(request) => {
                let mut stream = session.connection_mut().stream(request.id).unwrap();
                stream.respond(200, Headers::from([("x-path", request.path.as_str())]));
                stream.write(vec![b'z'; 100_000]);
            }
            Event::End { id } => {
                if let Some(mut stream) = session.connection_mut().stream(id) {
                    stream.end_with("done");
                }
            }
            _ => {}
        }
    }
}

fn round_trip(version: Version) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let pool = Arc::new(CompressionPool::default());

    let server_pool = pool.clone();
    let server = thread::spawn(move || serve_one(listener, server_pool, version));

    let connection = ConnectionBuilder::new().client().version(version).build(pool);
    let mut session = Session::connect(addr, connection).unwrap();
    let id = session
        .connection_mut()
        .request(RequestOptions::new("GET", "/big").host("localhost").end_stream())
        .unwrap();

    let mut status = None;
    let mut received = 0;
    loop {
        match session.next_event().unwrap() {
            Some(Event::Response(response)) => {
                assert_eq!(response.headers.get("x-path"), Some("/big"));
                status = Some(response.status);
            }
            Some(Event::Data { data, .. }) => received += data.len(),
            Some(Event::StreamClosed { id: closed }) if closed == id => break,
            Some(Event::StreamError { error, .. }) => panic!("stream failed: {}", error),
            Some(_) => {}
            None => panic!("connection closed early"),
        }
    }
    assert_eq!(status, Some(200));
    assert_eq!(received, 100_000 + 4);

    session.shutdown().unwrap();
    server.join().unwrap();
}

#[test]
fn test_spdy3_over_tcp() {
    round_trip(Version::Spdy3);
}

#[test]
fn test_spdy31_over_tcp() {
    round_trip(Version::Spdy31);
}

#[test]
fn test_http2_over_tcp() {
    round_trip(Version::Http2);
}
