//! Frame codec: the 9-byte header plus typed payload variants from RFC 9113
//! §4, §6. See `header` for the header layout and `payload` for the per-type
//! bodies.

mod header;
mod payload;

pub use header::{FrameHeader, HEADER_LEN};
pub use payload::{error_type_or_unknown, FramePayload, PriorityInfo};

/// The 24-byte magic that opens every HTTP/2 connection.
/// https://httpwg.org/specs/rfc7540.html#ConnectionHeader
pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{DataFlags, HeadersFlags};
    use crate::types::{FrameDecodeError, FrameType};
    use bytes::{Bytes, BytesMut};

    fn roundtrip(stream_id: u32, payload: &FramePayload) -> (FrameHeader, FramePayload) {
        let mut body = BytesMut::new();
        let flags = payload.write(&mut body);
        let header = FrameHeader::new(body.len() as u32, payload.frame_type(), flags, stream_id);

        let mut wire = BytesMut::new();
        header.write(&mut wire);
        wire.extend_from_slice(&body);

        let mut cur = &wire[..];
        let parsed_header = FrameHeader::parse(&mut cur).unwrap();
        let parsed_payload = FramePayload::parse(
            parsed_header.typ,
            parsed_header.flags,
            parsed_header.stream_id,
            Bytes::copy_from_slice(cur),
        )
        .unwrap();
        (parsed_header, parsed_payload)
    }

    #[test]
    fn data_roundtrip() {
        let payload = FramePayload::Data {
            end_stream: true,
            pad_len: None,
            data: Bytes::from_static(b"hello"),
        };
        let (header, parsed) = roundtrip(1, &payload);
        assert_eq!(header.stream_id, 1);
        assert_eq!(header.flags, DataFlags::END_STREAM.bits());
        assert_eq!(parsed, payload);
    }

    #[test]
    fn data_padded_roundtrip() {
        let payload = FramePayload::Data {
            end_stream: false,
            pad_len: Some(3),
            data: Bytes::from_static(b"hi"),
        };
        let (_, parsed) = roundtrip(1, &payload);
        assert_eq!(parsed, payload);
    }

    #[test]
    fn headers_with_priority_roundtrip() {
        let payload = FramePayload::Headers {
            end_stream: true,
            end_headers: true,
            pad_len: Some(2),
            priority: Some(PriorityInfo {
                exclusive: true,
                dependency: 5,
                weight: 200,
            }),
            block_fragment: Bytes::from_static(b"fragment"),
        };
        let (header, parsed) = roundtrip(3, &payload);
        assert_eq!(
            header.flags,
            HeadersFlags::END_STREAM.bits()
                | HeadersFlags::END_HEADERS.bits()
                | HeadersFlags::PADDED.bits()
                | HeadersFlags::PRIORITY.bits()
        );
        assert_eq!(parsed, payload);
    }

    #[test]
    fn settings_roundtrip() {
        let payload = FramePayload::Settings {
            ack: false,
            params: vec![(0x1, 4096), (0x4, 65535)],
        };
        let (_, parsed) = roundtrip(0, &payload);
        assert_eq!(parsed, payload);
    }

    #[test]
    fn settings_ack_must_be_empty() {
        let err = FramePayload::parse(FrameType::Settings as u8, 0x1, 0, Bytes::from_static(b"junk")).unwrap_err();
        assert!(matches!(err, FrameDecodeError::SettingsAckNotEmpty));
    }

    #[test]
    fn settings_unaligned_length_is_rejected() {
        let err = FramePayload::parse(FrameType::Settings as u8, 0, 0, Bytes::from_static(b"123")).unwrap_err();
        assert!(matches!(err, FrameDecodeError::SettingsNotAligned(3)));
    }

    #[test]
    fn priority_wrong_size_is_rejected() {
        let err = FramePayload::parse(FrameType::Priority as u8, 0, 3, Bytes::from_static(b"abcdef")).unwrap_err();
        assert!(matches!(
            err,
            FrameDecodeError::WrongFixedLength { frame: "PRIORITY", expected: 5, got: 6 }
        ));
    }

    #[test]
    fn window_update_zero_increment_is_rejected() {
        let err = FramePayload::parse(FrameType::WindowUpdate as u8, 0, 1, Bytes::from_static(&[0, 0, 0, 0])).unwrap_err();
        assert!(matches!(err, FrameDecodeError::ZeroWindowIncrement));
    }

    #[test]
    fn unknown_frame_type_is_preserved_for_ignoring() {
        let payload = FramePayload::parse(0x42, 0, 1, Bytes::from_static(b"???")).unwrap();
        assert_eq!(payload, FramePayload::Unknown { typ: 0x42, payload: Bytes::from_static(b"???") });
    }

    #[test]
    fn ping_roundtrip() {
        let payload = FramePayload::Ping {
            ack: true,
            data: *b"ABCDEFGH",
        };
        let (_, parsed) = roundtrip(0, &payload);
        assert_eq!(parsed, payload);
    }

    #[test]
    fn goaway_roundtrip() {
        let payload = FramePayload::GoAway {
            last_stream_id: 17,
            error_code: 1,
            debug_data: Bytes::from_static(b"bye"),
        };
        let (_, parsed) = roundtrip(0, &payload);
        assert_eq!(parsed, payload);
    }
}
