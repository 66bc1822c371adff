//! IO layer: a buffered framed reader/writer over an abstract transport
//! (`tokio::io::AsyncRead + AsyncWrite`), with a scratch buffer sized to the
//! largest frame this endpoint will accept. Spec §2.1/§6 "transport
//! interface". Split into [`FramedReader`]/[`FramedWriter`] halves (via
//! [`split_framed`]) so the connection manager's reader and writer tasks (§5)
//! can each own their half without sharing a lock.

use crate::error::{classify_frame_decode_error, H2Error};
use crate::frame::{FrameHeader, FramePayload, CONNECTION_PREFACE, HEADER_LEN};
use crate::types::{ErrorType, StreamId};
use bytes::BytesMut;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// A parsed frame: header plus typed payload.
#[derive(Debug)]
pub struct ReadFrame {
    pub header: FrameHeader,
    pub payload: FramePayload,
}

/// The read half of a framed transport.
pub struct FramedReader<R> {
    io: R,
    /// MAX_FRAME_SIZE this endpoint advertises to its peer; frames longer
    /// than this are a connection error (§4.1).
    max_frame_size: u32,
    read_scratch: BytesMut,
}

/// The write half of a framed transport.
pub struct FramedWriter<W> {
    io: W,
    write_scratch: BytesMut,
}

/// Splits an owned bidirectional transport into independent framed halves,
/// one per the connection manager's reader-task/writer-task split (spec §5).
pub fn split_framed<T>(io: T, max_frame_size: u32) -> (FramedReader<ReadHalf<T>>, FramedWriter<WriteHalf<T>>)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (rh, wh) = split(io);
    (FramedReader::new(rh, max_frame_size), FramedWriter::new(wh))
}

impl<R> FramedReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(io: R, max_frame_size: u32) -> Self {
        Self {
            io,
            max_frame_size,
            read_scratch: BytesMut::with_capacity(max_frame_size as usize + HEADER_LEN),
        }
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    pub async fn read_preface(&mut self) -> Result<(), H2Error> {
        let mut buf = [0u8; CONNECTION_PREFACE.len()];
        self.io.read_exact(&mut buf).await?;
        if &buf != CONNECTION_PREFACE {
            return Err(H2Error::connection(ErrorType::ProtocolError, "client connection preface mismatch"));
        }
        Ok(())
    }

    /// Reads one frame. Returns `Ok(None)` on a clean EOF between frames
    /// (nothing read yet), `Err` on a malformed header/payload or a
    /// mid-frame EOF.
    pub async fn read_frame(&mut self) -> Result<Option<ReadFrame>, H2Error> {
        let mut header_buf = [0u8; HEADER_LEN];
        if let Err(err) = self.io.read_exact(&mut header_buf).await {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(err.into());
        }
        let mut cur = &header_buf[..];
        let header = FrameHeader::parse(&mut cur).map_err(|err| classify_frame_decode_error(err, 0))?;

        if header.length > self.max_frame_size {
            return Err(H2Error::connection(
                ErrorType::FrameSizeError,
                format!("frame length {} exceeds advertised MAX_FRAME_SIZE {}", header.length, self.max_frame_size),
            ));
        }

        self.read_scratch.clear();
        self.read_scratch.resize(header.length as usize, 0);
        self.io.read_exact(&mut self.read_scratch).await?;
        let payload_bytes = self.read_scratch.split().freeze();

        let payload = FramePayload::parse(header.typ, header.flags, header.stream_id, payload_bytes)
            .map_err(|err| classify_frame_decode_error(err, header.stream_id))?;

        Ok(Some(ReadFrame { header, payload }))
    }
}

impl<W> FramedWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(io: W) -> Self {
        Self { io, write_scratch: BytesMut::new() }
    }

    pub async fn write_preface(&mut self) -> Result<(), H2Error> {
        self.io.write_all(CONNECTION_PREFACE).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Serializes and writes one frame for `stream_id`.
    pub async fn write_frame(&mut self, stream_id: StreamId, payload: &FramePayload) -> Result<(), H2Error> {
        self.write_scratch.clear();
        let flags = payload.write(&mut self.write_scratch);
        let header = FrameHeader::new(self.write_scratch.len() as u32, payload.frame_type(), flags, stream_id);

        let mut head_buf = [0u8; HEADER_LEN];
        {
            let mut head_slice = &mut head_buf[..];
            header.write(&mut head_slice);
        }
        self.io.write_all(&head_buf).await?;
        self.io.write_all(&self.write_scratch).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), H2Error> {
        self.io.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), H2Error> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameType;
    use bytes::Bytes;

    #[tokio::test]
    async fn preface_then_settings_round_trips_through_a_duplex_pipe() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (_client_reader, mut client_writer) = split_framed(client_io, 16_384);
        let (mut server_reader, _server_writer) = split_framed(server_io, 16_384);

        client_writer.write_preface().await.unwrap();
        server_reader.read_preface().await.unwrap();

        let settings = FramePayload::Settings { ack: false, params: vec![(0x4, 65_535)] };
        client_writer.write_frame(0, &settings).await.unwrap();
        let frame = server_reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.header.known_type(), Some(FrameType::Settings));
        assert_eq!(frame.payload, settings);
    }

    #[tokio::test]
    async fn oversized_frame_is_a_connection_error() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (_client_reader, mut client_writer) = split_framed(client_io, 16_384);
        let (mut server_reader, _server_writer) = split_framed(server_io, 16);

        let data = FramePayload::Data {
            end_stream: true,
            pad_len: None,
            data: Bytes::from_static(b"this is far longer than 16 bytes"),
        };
        client_writer.write_frame(1, &data).await.unwrap();
        let err = server_reader.read_frame().await.unwrap_err();
        assert_eq!(err.code(), ErrorType::FrameSizeError);
    }

    #[tokio::test]
    async fn unknown_frame_type_is_parsed_not_rejected() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (_client_reader, mut client_writer) = split_framed(client_io, 16_384);
        let (mut server_reader, _server_writer) = split_framed(server_io, 16_384);

        let unknown = FramePayload::Unknown { typ: 0x42, payload: Bytes::from_static(b"???") };
        client_writer.write_frame(1, &unknown).await.unwrap();
        let frame = server_reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.header.known_type(), None);
        assert_eq!(frame.payload, unknown);
    }
}
