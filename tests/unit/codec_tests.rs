//! Bridge NDJSON framing.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use mph_session::rpc::codec::{BridgeCodec, MAX_LINE_BYTES};
use mph_session::AppError;

#[test]
fn complete_line_is_decoded_without_newline() {
    let mut codec = BridgeCodec::new();
    let mut buf = BytesMut::from("{\"id\":1,\"result\":true}\n");

    let line = codec.decode(&mut buf).unwrap();
    assert_eq!(line.as_deref(), Some("{\"id\":1,\"result\":true}"));
}

#[test]
fn partial_line_waits_for_newline() {
    let mut codec = BridgeCodec::new();
    let mut buf = BytesMut::from("{\"id\":1,");

    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    buf.extend_from_slice(b"\"result\":null}\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap().as_deref(),
        Some("{\"id\":1,\"result\":null}")
    );
}

#[test]
fn batched_lines_are_decoded_in_order() {
    let mut codec = BridgeCodec::new();
    let mut buf = BytesMut::from("first\nsecond\n");

    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("first"));
    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("second"));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn overlong_line_is_rejected() {
    let mut codec = BridgeCodec::new();
    let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_BYTES + 1].as_slice());

    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, AppError::Io(ref msg) if msg.starts_with("line too long")));
}

#[test]
fn encoding_appends_newline() {
    let mut codec = BridgeCodec::new();
    let mut buf = BytesMut::new();

    codec.encode("{\"id\":7}".to_owned(), &mut buf).unwrap();
    assert_eq!(&buf[..], b"{\"id\":7}\n");
}

#[test]
fn unterminated_last_line_is_returned_at_eof() {
    let mut codec = BridgeCodec::new();
    let mut buf = BytesMut::from("{\"id\":2,\"result\":\"bye\"}");

    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    assert_eq!(
        codec.decode_eof(&mut buf).unwrap().as_deref(),
        Some("{\"id\":2,\"result\":\"bye\"}")
    );
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
}
