//! The connection manager: preface exchange, SETTINGS handshake, the
//! multiplexed reader/writer task pair and their mailbox, frame dispatch,
//! and the GOAWAY/RST_STREAM error mapping from spec §4.5/§7.
//!
//! Grounded on the teacher's `connection.rs` (overall responsibilities: own
//! the socket, hand frames to streams, gate "ready" on the SETTINGS
//! handshake) and `stream_coordinator.rs` (a stream table keyed by id,
//! allocated by role), re-architected per spec §5 from OS threads + a
//! `Mutex<Socket>` + `Condvar` onto two cooperative tokio tasks (reader,
//! writer) coordinated by a bounded `mpsc` mailbox, since the distilled
//! spec's Design Notes explicitly call for that rearchitecture
//! ("coroutine-style streaming reads/writes" → bounded queues).

use crate::config::Config;
use crate::error::H2Error;
use crate::flow::{RecvWindow, Window};
use crate::frame::{error_type_or_unknown, FramePayload, PriorityInfo};
use crate::hpack;
use crate::io::{split_framed, FramedReader, FramedWriter};
use crate::request::Request;
use crate::response::Response;
use crate::settings::Settings;
use crate::stream::{Continuing, Stream, StreamState};
use crate::types::{ErrorType, FrameType, Headers, StreamId};
use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, error, trace, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration};

/// Which side of the connection this endpoint plays, per spec §3 ("Connection:
/// identifier (role: client|server)"). Governs stream-id parity and who sends
/// the preface first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Connection lifecycle, spec §3: the preface/SETTINGS handshake itself
/// happens synchronously in [`Connection::establish`] before any `Shared`
/// exists, so the tracked states start at `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Open,
    GoingAway,
    Closed,
}

/// One request that has fully arrived on a peer-initiated stream (server
/// role): headers plus the buffered body, paired with the stream id a
/// response must be sent back on.
#[derive(Debug)]
pub struct IncomingRequest {
    pub stream_id: StreamId,
    pub headers: Headers,
    pub body: Bytes,
}

/// Work enqueued onto the writer task's mailbox (spec §5). The writer owns
/// the HPACK encoder and the connection's send-side flow-control bookkeeping
/// exclusively; nothing else touches them.
enum WriteCommand {
    Headers {
        stream_id: StreamId,
        headers: Headers,
        end_stream: bool,
    },
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
    WindowUpdate {
        stream_id: StreamId,
        increment: u32,
    },
    RstStream {
        stream_id: StreamId,
        error: ErrorType,
    },
    Settings {
        params: Vec<(u16, u32)>,
    },
    SettingsAck,
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: StreamId,
        error: ErrorType,
        debug: String,
    },
    Shutdown,
}

/// State shared between the reader and writer tasks, and with the handle
/// held by the application. Everything in here is reached through `Arc` and
/// internally synchronized (`DashMap`, atomics) so neither task ever blocks
/// the other except at transport I/O, per spec §5.
struct Shared {
    role: Role,
    config: Config,
    streams: DashMap<StreamId, Stream>,
    remote_settings: std::sync::Mutex<Settings>,
    /// The local settings this endpoint advertised; becomes authoritative
    /// once the peer ACKs it (spec §4.6 "local settings").
    local_settings: std::sync::Mutex<Settings>,
    conn_send_window: std::sync::Mutex<Window>,
    conn_recv_window: std::sync::Mutex<RecvWindow>,
    next_local_stream_id: AtomicU32,
    highest_peer_stream_id: AtomicU32,
    state: std::sync::Mutex<ConnState>,
    /// Fulfilled when a client-initiated stream's response is fully
    /// assembled, or dropped with an error on RST_STREAM/connection close.
    pending_responses: DashMap<StreamId, oneshot::Sender<Result<Response, H2Error>>>,
    /// Woken any time a send-side window grows, so a writer blocked on
    /// insufficient flow-control credit can recheck it.
    window_notify: Notify,
    /// The nonce and send time of a PING this endpoint sent and has not yet
    /// seen acked; checked by the writer's keepalive ticker against
    /// `Config::ping_timeout` to detect a dead peer (spec §5 idle/PING
    /// timeouts).
    outstanding_ping: std::sync::Mutex<Option<([u8; 8], std::time::Instant)>>,
    /// Updated whenever the reader task successfully parses a frame; checked
    /// by the writer's idle ticker against `Config::idle_timeout` (spec §5).
    last_activity: std::sync::Mutex<std::time::Instant>,
}

impl Shared {
    fn is_local_stream(&self, stream_id: StreamId) -> bool {
        let parity = stream_id % 2;
        match self.role {
            Role::Client => parity == 1,
            Role::Server => parity == 0,
        }
    }

    fn allocate_stream_id(&self) -> StreamId {
        self.next_local_stream_id.fetch_add(2, Ordering::SeqCst)
    }
}

/// A running connection: a handle applications use to issue requests (client
/// role) or answer accepted ones (server role). Cloning shares the same
/// underlying reader/writer tasks.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    mailbox: mpsc::Sender<WriteCommand>,
    urgent: mpsc::Sender<WriteCommand>,
}

/// Join handles for a connection's background tasks, plus the inbound
/// request stream for a server-role connection. Dropping this without
/// awaiting it still leaves the connection running; it exists so callers can
/// detect the reader/writer tasks exiting (connection closed).
pub struct ConnectionDriver {
    pub incoming: mpsc::Receiver<IncomingRequest>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ConnectionDriver {
    /// Waits for both the reader and writer tasks to exit, i.e. for the
    /// connection to fully close.
    pub async fn closed(self) {
        let _ = self.reader.await;
        let _ = self.writer.await;
    }
}

impl Connection {
    /// Performs the preface + SETTINGS handshake (spec §4.5) and spawns the
    /// reader/writer task pair. `T` stands in for the spec §6 transport
    /// interface; TLS/ALPN negotiation already happened before this is
    /// called, exactly as the teacher's `client.rs`/`socket.rs` perform it
    /// ahead of handing the socket to the connection engine.
    pub async fn establish<T>(io: T, role: Role, config: Config) -> Result<(Self, ConnectionDriver), H2Error>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, mut writer) = split_framed(io, config.max_frame_size);

        match role {
            Role::Client => {
                writer.write_preface().await?;
            }
            Role::Server => {
                reader.read_preface().await?;
            }
        }

        let mut local_settings = Settings::defaults();
        local_settings.set(crate::types::SettingsParameter::HeaderTableSize, config.header_table_size)?;
        local_settings.set(
            crate::types::SettingsParameter::EnablePush,
            if config.enable_push { 1 } else { 0 },
        )?;
        local_settings.set(crate::types::SettingsParameter::MaxConcurrentStreams, config.max_concurrent_streams)?;
        local_settings.set(crate::types::SettingsParameter::InitialWindowSize, config.initial_window_size)?;
        local_settings.set(crate::types::SettingsParameter::MaxFrameSize, config.max_frame_size)?;
        local_settings.set(crate::types::SettingsParameter::MaxHeaderListSize, config.max_header_list_size)?;

        writer
            .write_frame(0, &FramePayload::Settings { ack: false, params: local_settings.to_wire_params() })
            .await?;
        writer.flush().await?;

        let next_local_stream_id = match role {
            Role::Client => 1,
            Role::Server => 2,
        };

        let shared = Arc::new(Shared {
            role,
            streams: DashMap::new(),
            remote_settings: std::sync::Mutex::new(Settings::defaults()),
            local_settings: std::sync::Mutex::new(local_settings),
            conn_send_window: std::sync::Mutex::new(Window::new(65_535)),
            // The connection-level window is fixed at the RFC default; unlike
            // per-stream windows it is never affected by
            // SETTINGS_INITIAL_WINDOW_SIZE (§6.9.2).
            conn_recv_window: std::sync::Mutex::new(RecvWindow::new(65_535)),
            next_local_stream_id: AtomicU32::new(next_local_stream_id),
            highest_peer_stream_id: AtomicU32::new(0),
            state: std::sync::Mutex::new(ConnState::Open),
            pending_responses: DashMap::new(),
            window_notify: Notify::new(),
            outstanding_ping: std::sync::Mutex::new(None),
            last_activity: std::sync::Mutex::new(std::time::Instant::now()),
            config,
        });

        let (mailbox_tx, mailbox_rx) = mpsc::channel(64);
        let (urgent_tx, urgent_rx) = mpsc::channel(16);
        let (incoming_tx, incoming_rx) = mpsc::channel(64);

        let writer_shared = shared.clone();
        let writer_handle = tokio::spawn(async move {
            writer_loop(writer_shared, writer, mailbox_rx, urgent_rx).await;
        });

        let reader_shared = shared.clone();
        let reader_mailbox = urgent_tx.clone();
        let reader_handle =
            tokio::spawn(async move { reader_loop(reader_shared, reader, reader_mailbox, incoming_tx).await });

        let connection = Self { shared, mailbox: mailbox_tx, urgent: urgent_tx };
        let driver = ConnectionDriver { incoming: incoming_rx, reader: reader_handle, writer: writer_handle };
        Ok((connection, driver))
    }

    /// Client role: sends `request` as HEADERS (+ DATA if it has a body) on
    /// a freshly-allocated odd stream id and awaits the full response.
    pub async fn request(&self, request: Request) -> Result<Response, H2Error> {
        if *self.shared.state.lock().unwrap() != ConnState::Open {
            return Err(H2Error::connection(ErrorType::RefusedStream, "connection is closing"));
        }
        let stream_id = self.shared.allocate_stream_id();
        self.shared.streams.insert(
            stream_id,
            Stream::new(
                self.shared.remote_settings.lock().unwrap().initial_window_size(),
                self.shared.local_settings.lock().unwrap().initial_window_size(),
            ),
        );

        let (tx, rx) = oneshot::channel();
        self.shared.pending_responses.insert(stream_id, tx);

        let end_stream = request.body.is_empty();
        self.mailbox
            .send(WriteCommand::Headers { stream_id, headers: request.headers, end_stream })
            .await
            .map_err(|_| H2Error::connection(ErrorType::InternalError, "connection writer task gone"))?;
        if !end_stream {
            self.mailbox
                .send(WriteCommand::Data { stream_id, data: request.body, end_stream: true })
                .await
                .map_err(|_| H2Error::connection(ErrorType::InternalError, "connection writer task gone"))?;
        }

        rx.await.map_err(|_| H2Error::connection(ErrorType::InternalError, "response channel dropped"))?
    }

    /// Server role: answers a previously accepted [`IncomingRequest`].
    pub async fn respond(&self, stream_id: StreamId, headers: Headers, body: Bytes) -> Result<(), H2Error> {
        let end_stream = body.is_empty();
        self.mailbox
            .send(WriteCommand::Headers { stream_id, headers, end_stream })
            .await
            .map_err(|_| H2Error::connection(ErrorType::InternalError, "connection writer task gone"))?;
        if !end_stream {
            self.mailbox
                .send(WriteCommand::Data { stream_id, data: body, end_stream: true })
                .await
                .map_err(|_| H2Error::connection(ErrorType::InternalError, "connection writer task gone"))?;
        }
        Ok(())
    }

    /// Spec §4.5's GOAWAY paragraph, made an explicit operation (SPEC_FULL
    /// §10): stop accepting new streams, announce the highest stream id this
    /// endpoint has processed, and let existing streams finish naturally.
    pub async fn graceful_shutdown(&self) {
        *self.shared.state.lock().unwrap() = ConnState::GoingAway;
        let last = self.shared.highest_peer_stream_id.load(Ordering::SeqCst);
        let _ = self
            .urgent
            .send(WriteCommand::GoAway { last_stream_id: last, error: ErrorType::NoError, debug: String::new() })
            .await;
    }
}

async fn reader_loop<R>(
    shared: Arc<Shared>,
    mut reader: FramedReader<R>,
    urgent: mpsc::Sender<WriteCommand>,
    incoming: mpsc::Sender<IncomingRequest>,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = hpack::Decoder::with_size(shared.local_settings.lock().unwrap().header_table_size() as usize);
    decoder.set_max_header_list_size(shared.config.max_header_list_size_limit());
    // (stream id, is push-promise, end_stream) carried over from the initial
    // HEADERS/PUSH_PROMISE frame while its header block is still being
    // assembled across CONTINUATION frames.
    let mut continuation_expected: Option<(StreamId, bool, bool)> = None;

    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                handle_fatal(&shared, &urgent, err).await;
                break;
            }
        };
        *shared.last_activity.lock().unwrap() = std::time::Instant::now();

        if let Some((expected_stream, _, _)) = continuation_expected {
            let is_continuation =
                frame.header.known_type() == Some(FrameType::Continuation) && frame.header.stream_id == expected_stream;
            if !is_continuation {
                handle_fatal(
                    &shared,
                    &urgent,
                    H2Error::connection(ErrorType::ProtocolError, "expected CONTINUATION on the same stream"),
                )
                .await;
                break;
            }
        }

        let result = dispatch(&shared, &urgent, &incoming, &mut decoder, &mut continuation_expected, frame).await;
        if let Err(err) = result {
            if err.is_connection_fatal() {
                handle_fatal(&shared, &urgent, err).await;
                break;
            }
            if let H2Error::Stream { stream_id, code, .. } = err {
                warn!("stream {stream_id} error: {code:?}");
                let _ = urgent.send(WriteCommand::RstStream { stream_id, error: code }).await;
                if let Some(mut stream) = shared.streams.get_mut(&stream_id) {
                    stream.state = StreamState::Closed;
                    stream.closed_at = Some(std::time::Instant::now());
                }
                fail_pending(&shared, stream_id, code);
            }
        }
    }

    fail_all_pending(&shared, ErrorType::InternalError);
}

async fn handle_fatal(shared: &Arc<Shared>, urgent: &mpsc::Sender<WriteCommand>, err: H2Error) {
    error!("connection error: {err}");
    *shared.state.lock().unwrap() = ConnState::Closed;
    let last = shared.highest_peer_stream_id.load(Ordering::SeqCst);
    let _ = urgent
        .send(WriteCommand::GoAway { last_stream_id: last, error: err.code(), debug: err.to_string() })
        .await;
    let _ = urgent.send(WriteCommand::Shutdown).await;
    fail_all_pending(shared, err.code());
}

fn fail_pending(shared: &Arc<Shared>, stream_id: StreamId, code: ErrorType) {
    if let Some((_, tx)) = shared.pending_responses.remove(&stream_id) {
        let _ = tx.send(Err(H2Error::stream(stream_id, code, "stream reset")));
    }
}

fn fail_all_pending(shared: &Arc<Shared>, code: ErrorType) {
    fail_pending_above(shared, 0, code);
}

/// Fails every pending response on a stream id strictly greater than
/// `watermark`; `watermark = 0` fails all of them (connection teardown).
fn fail_pending_above(shared: &Arc<Shared>, watermark: StreamId, code: ErrorType) {
    let ids: Vec<StreamId> = shared
        .pending_responses
        .iter()
        .map(|e| *e.key())
        .filter(|id| *id > watermark)
        .collect();
    for id in ids {
        if let Some((_, tx)) = shared.pending_responses.remove(&id) {
            debug!("failing pending response on stream {id} with {code:?}");
            let _ = tx.send(Err(H2Error::connection(code, "connection closed")));
        }
    }
}

async fn dispatch(
    shared: &Arc<Shared>,
    urgent: &mpsc::Sender<WriteCommand>,
    incoming: &mpsc::Sender<IncomingRequest>,
    decoder: &mut hpack::Decoder,
    continuation_expected: &mut Option<(StreamId, bool, bool)>,
    frame: crate::io::ReadFrame,
) -> Result<(), H2Error> {
    let stream_id = frame.header.stream_id;
    match frame.payload {
        FramePayload::Settings { ack, params } => {
            if ack {
                trace!("peer acked our SETTINGS");
                return Ok(());
            }
            let mut remote = shared.remote_settings.lock().unwrap();
            let old_initial = remote.initial_window_size();
            let mut initial_changed = false;
            for (id, value) in params {
                if let Some(changed) = remote.apply(id, value)? {
                    if changed == crate::types::SettingsParameter::InitialWindowSize {
                        initial_changed = true;
                    }
                }
            }
            let new_initial = remote.initial_window_size();
            drop(remote);
            if initial_changed {
                let delta = new_initial as i64 - old_initial as i64;
                apply_initial_window_delta_to_streams(shared, delta)?;
            }
            urgent
                .send(WriteCommand::SettingsAck)
                .await
                .map_err(|_| H2Error::connection(ErrorType::InternalError, "writer gone"))?;
            Ok(())
        }
        FramePayload::Ping { ack, data } => {
            if ack {
                let mut outstanding = shared.outstanding_ping.lock().unwrap();
                if matches!(*outstanding, Some((nonce, _)) if nonce == data) {
                    *outstanding = None;
                }
            } else {
                urgent
                    .send(WriteCommand::Ping { ack: true, data })
                    .await
                    .map_err(|_| H2Error::connection(ErrorType::InternalError, "writer gone"))?;
            }
            Ok(())
        }
        FramePayload::GoAway { last_stream_id, error_code, debug_data } => {
            *shared.state.lock().unwrap() = ConnState::GoingAway;
            let code = error_type_or_unknown(error_code);
            if !debug_data.is_empty() {
                debug!("peer GOAWAY debug: {}", String::from_utf8_lossy(&debug_data));
            }
            warn!("peer sent GOAWAY(last={last_stream_id}, error={code:?})");
            // Only streams above the announced watermark were never processed
            // by the peer (§6.8); streams at or below it may still complete
            // normally and are left alone.
            fail_pending_above(shared, last_stream_id, code);
            Ok(())
        }
        FramePayload::WindowUpdate { increment } => {
            if stream_id == 0 {
                shared.conn_send_window.lock().unwrap().apply_increment(increment.get())?;
                shared.window_notify.notify_waiters();
            } else {
                validate_stream_known(shared, stream_id)?;
                let mut stream = shared
                    .streams
                    .get_mut(&stream_id)
                    .ok_or_else(|| H2Error::connection(ErrorType::ProtocolError, "window update for unknown stream"))?;
                stream.validate_recv(stream_id, FrameType::WindowUpdate)?;
                stream.send_window.apply_increment(increment.get())?;
                shared.window_notify.notify_waiters();
            }
            Ok(())
        }
        FramePayload::Priority(info) => {
            if let Some(mut stream) = shared.streams.get_mut(&stream_id) {
                stream.priority = Some(info);
            } else {
                shared.streams.entry(stream_id).or_insert_with(|| {
                    let mut s = Stream::new(65_535, 65_535);
                    s.priority = Some(info);
                    s
                });
            }
            Ok(())
        }
        FramePayload::ResetStream { error_code } => {
            let mut stream = shared
                .streams
                .get_mut(&stream_id)
                .ok_or_else(|| H2Error::connection(ErrorType::ProtocolError, "RST_STREAM on unknown stream"))?;
            stream.transition(stream_id, true, FrameType::ResetStream, false, false, false)?;
            drop(stream);
            fail_pending(shared, stream_id, error_type_or_unknown(error_code));
            Ok(())
        }
        FramePayload::Data { end_stream, pad_len, data } => {
            on_data(shared, urgent, incoming, stream_id, data, pad_len, end_stream).await
        }
        FramePayload::Headers { end_stream, end_headers, priority, block_fragment, .. } => {
            on_headers(
                shared,
                urgent,
                incoming,
                decoder,
                continuation_expected,
                stream_id,
                end_stream,
                end_headers,
                priority,
                block_fragment,
                false,
            )
            .await
        }
        FramePayload::PushPromise { end_headers, promised_stream_id, block_fragment, .. } => {
            if !shared.config.enable_push || shared.role != Role::Client {
                urgent
                    .send(WriteCommand::RstStream { stream_id: promised_stream_id, error: ErrorType::RefusedStream })
                    .await
                    .ok();
                return Ok(());
            }
            on_headers(
                shared,
                urgent,
                incoming,
                decoder,
                continuation_expected,
                promised_stream_id,
                false,
                end_headers,
                None,
                block_fragment,
                true,
            )
            .await
        }
        FramePayload::Continuation { end_headers, block_fragment } => {
            let (expected_stream, is_push, end_stream) = continuation_expected
                .ok_or_else(|| H2Error::connection(ErrorType::ProtocolError, "unexpected CONTINUATION"))?;
            on_headers(
                shared,
                urgent,
                incoming,
                decoder,
                continuation_expected,
                expected_stream,
                end_stream,
                end_headers,
                None,
                block_fragment,
                is_push,
            )
            .await
        }
        FramePayload::Unknown { typ, .. } => {
            trace!("ignoring unknown frame type 0x{typ:x}");
            Ok(())
        }
    }
}

fn validate_stream_known(shared: &Arc<Shared>, stream_id: StreamId) -> Result<(), H2Error> {
    if !shared.streams.contains_key(&stream_id) {
        return Err(H2Error::connection(ErrorType::ProtocolError, "frame for a stream that was never opened"));
    }
    Ok(())
}

/// Applies a SETTINGS_INITIAL_WINDOW_SIZE change to every active stream's
/// send window by the signed delta between the old and new advertised
/// values, per RFC 9113 §6.9.2.
fn apply_initial_window_delta_to_streams(shared: &Arc<Shared>, delta: i64) -> Result<(), H2Error> {
    if delta == 0 {
        return Ok(());
    }
    for mut entry in shared.streams.iter_mut() {
        let stream = entry.value_mut();
        if !stream.is_closed() {
            stream.send_window.apply_initial_window_delta(delta)?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn on_headers(
    shared: &Arc<Shared>,
    urgent: &mpsc::Sender<WriteCommand>,
    incoming: &mpsc::Sender<IncomingRequest>,
    decoder: &mut hpack::Decoder,
    continuation_expected: &mut Option<(StreamId, bool, bool)>,
    stream_id: StreamId,
    end_stream: bool,
    end_headers: bool,
    priority: Option<PriorityInfo>,
    block_fragment: Bytes,
    is_push: bool,
) -> Result<(), H2Error> {
    if stream_id == 0 {
        return Err(H2Error::connection(ErrorType::ProtocolError, "HEADERS on stream 0"));
    }

    let is_new_stream = !shared.streams.contains_key(&stream_id);

    // Stream id parity and monotonicity, RFC 9113 §5.1.1: a stream initiated
    // by the peer (a request HEADERS, or a PUSH_PROMISE's promised id, which
    // the peer also numbers out of its own space) must use the peer's
    // parity and must be numerically greater than every stream id the peer
    // has opened so far. Checked before `highest_peer_stream_id` is updated,
    // so the comparison is against the watermark as of the previous stream.
    if is_new_stream {
        if shared.is_local_stream(stream_id) {
            return Err(H2Error::connection(
                ErrorType::ProtocolError,
                format!("peer opened stream {stream_id}, which belongs to this endpoint's own numbering space"),
            ));
        }
        let highest = shared.highest_peer_stream_id.load(Ordering::SeqCst);
        if stream_id <= highest {
            return Err(H2Error::connection(
                ErrorType::ProtocolError,
                format!("peer reused or decreased stream id {stream_id}, highest seen so far was {highest}"),
            ));
        }
    }
    shared.highest_peer_stream_id.fetch_max(stream_id, Ordering::SeqCst);

    // MAX_CONCURRENT_STREAMS (spec §4.6/§7): only gates genuinely new,
    // peer-initiated request streams, not pushes (reserved via a different
    // mechanism) or streams this endpoint already knows about.
    if is_new_stream && !is_push && !shared.is_local_stream(stream_id) {
        let max = shared.local_settings.lock().unwrap().max_concurrent_streams();
        let active = shared
            .streams
            .iter()
            .filter(|e| !shared.is_local_stream(*e.key()) && !e.value().is_closed())
            .count() as u32;
        if active >= max {
            return Err(H2Error::stream(stream_id, ErrorType::RefusedStream, "MAX_CONCURRENT_STREAMS exceeded"));
        }
    }

    let remote_initial = shared.remote_settings.lock().unwrap().initial_window_size();
    let local_initial = shared.local_settings.lock().unwrap().initial_window_size();
    let mut entry = shared
        .streams
        .entry(stream_id)
        .or_insert_with(|| Stream::new(remote_initial, local_initial));

    if let Some(p) = priority {
        entry.priority = Some(p);
    }
    entry.header_block.extend_from_slice(&block_fragment);

    let ty = if is_push { FrameType::PushPromise } else { FrameType::Headers };
    entry.validate_recv(stream_id, ty)?;
    entry.transition(stream_id, true, ty, end_headers, end_stream, is_push)?;

    if !end_headers {
        entry.continuing = Some(if is_push { Continuing::PushPromise } else { Continuing::Headers });
        *continuation_expected = Some((stream_id, is_push, end_stream));
        return Ok(());
    }
    *continuation_expected = None;
    entry.continuing = None;

    let block = std::mem::take(&mut entry.header_block);
    let decoded = decoder.decode(&block).map_err(|err| map_hpack_error(shared, stream_id, &err))?;
    let headers: Headers = decoded
        .into_iter()
        .map(|(k, v)| (String::from_utf8_lossy(&k).into_owned(), String::from_utf8_lossy(&v).into_owned()))
        .collect();

    // Push scheduling itself is delegated (spec §1 Non-goals); the engine
    // only decides whether to keep the reservation or cancel it up front.
    if is_push && !shared.config.push_policy.accept(&headers) {
        entry.state = StreamState::Closed;
        entry.closed_at = Some(std::time::Instant::now());
        drop(entry);
        let _ = urgent.send(WriteCommand::RstStream { stream_id, error: ErrorType::Cancel }).await;
        return Ok(());
    }

    if shared.is_local_stream(stream_id) {
        entry.response_headers = headers;
    } else {
        entry.request_headers = headers;
    }

    if end_stream {
        finish_stream(shared, incoming, stream_id, &mut entry);
    }
    Ok(())
}

/// Maps an HPACK decode failure to the error severity spec §4.2 assigns it:
/// every failure is a connection-level COMPRESSION_ERROR except a header
/// list that exceeds MAX_HEADER_LIST_SIZE, which honors the configured
/// [`HeaderListOverflowPolicy`](crate::config::HeaderListOverflowPolicy).
fn map_hpack_error(shared: &Arc<Shared>, stream_id: StreamId, err: &hpack::HpackError) -> H2Error {
    if matches!(err, hpack::HpackError::HeaderListTooLarge { .. }) {
        if let crate::config::HeaderListOverflowPolicy::RefusedStream = shared.config.header_list_overflow_policy {
            return H2Error::stream(stream_id, ErrorType::RefusedStream, err.to_string());
        }
    }
    H2Error::connection(ErrorType::CompressionError, err.to_string())
}

async fn on_data(
    shared: &Arc<Shared>,
    urgent: &mpsc::Sender<WriteCommand>,
    incoming: &mpsc::Sender<IncomingRequest>,
    stream_id: StreamId,
    data: Bytes,
    pad_len: Option<u8>,
    end_stream: bool,
) -> Result<(), H2Error> {
    if stream_id == 0 {
        return Err(H2Error::connection(ErrorType::ProtocolError, "DATA on stream 0"));
    }
    // Flow control is debited for the full frame payload, not just the body:
    // the Pad Length byte and the padding itself both count (RFC 9113 §6.9.1).
    let n = data.len() as u32 + pad_len.map_or(0, |p| 1 + p as u32);
    let conn_increment = shared.conn_recv_window.lock().unwrap().on_data_received(n);

    let stream_increment = {
        let mut entry = shared
            .streams
            .get_mut(&stream_id)
            .ok_or_else(|| H2Error::stream(stream_id, ErrorType::StreamClosed, "DATA on unknown stream"))?;
        entry.validate_recv(stream_id, FrameType::Data)?;
        entry.transition(stream_id, true, FrameType::Data, false, end_stream, false)?;
        let increment = entry.recv_window.on_data_received(n);
        entry.body.extend_from_slice(&data);

        if end_stream {
            finish_stream(shared, incoming, stream_id, &mut entry);
        }
        increment
    };

    if let Some(increment) = conn_increment {
        let _ = urgent.send(WriteCommand::WindowUpdate { stream_id: 0, increment }).await;
    }
    if let Some(increment) = stream_increment {
        let _ = urgent.send(WriteCommand::WindowUpdate { stream_id, increment }).await;
    }
    Ok(())
}

fn finish_stream(shared: &Arc<Shared>, incoming: &mpsc::Sender<IncomingRequest>, stream_id: StreamId, stream: &mut Stream) {
    let body = std::mem::take(&mut stream.body).freeze();
    if shared.is_local_stream(stream_id) {
        if let Some((_, tx)) = shared.pending_responses.remove(&stream_id) {
            let response = Response { request_id: stream_id as usize, headers: stream.response_headers.clone(), body };
            let _ = tx.send(Ok(response));
        }
    } else {
        let headers = stream.request_headers.clone();
        let tx = incoming.clone();
        tokio::spawn(async move {
            let _ = tx.send(IncomingRequest { stream_id, headers, body }).await;
        });
    }
}

async fn writer_loop<W>(
    shared: Arc<Shared>,
    mut writer: FramedWriter<W>,
    mut mailbox: mpsc::Receiver<WriteCommand>,
    mut urgent: mpsc::Receiver<WriteCommand>,
) where
    W: AsyncWrite + Unpin,
{
    let mut encoder = hpack::Encoder::with_size(shared.config.header_table_size as usize);
    let mut ping_ticker = match shared.config.ping_interval {
        Some(interval_duration) => Some(interval(interval_duration)),
        None => None,
    };
    // Checked against `last_activity` every tick rather than driving the
    // close off tick *count*, so a shorter-than-timeout first tick (tokio's
    // `interval` fires immediately) never closes a freshly-opened connection.
    let mut idle_ticker = shared.config.idle_timeout.map(interval);

    loop {
        let (command, close_after) = tokio::select! {
            biased;
            Some(cmd) = urgent.recv() => (cmd, false),
            Some(cmd) = mailbox.recv() => (cmd, false),
            _ = tick(&mut ping_ticker) => {
                let overdue = shared
                    .outstanding_ping
                    .lock()
                    .unwrap()
                    .map(|(_, sent_at)| sent_at.elapsed() >= shared.config.ping_timeout)
                    .unwrap_or(false);
                if overdue {
                    warn!("peer did not ack the last keepalive PING within the configured timeout, closing connection");
                    let last = shared.highest_peer_stream_id.load(Ordering::SeqCst);
                    let timeout = WriteCommand::GoAway { last_stream_id: last, error: ErrorType::SettingsTimeout, debug: "ping timeout".into() };
                    (timeout, true)
                } else if shared.outstanding_ping.lock().unwrap().is_some() {
                    // Previous ping is still in flight and not yet overdue; skip
                    // sending another one this tick.
                    continue;
                } else {
                    (WriteCommand::Ping { ack: false, data: ping_nonce(&shared) }, false)
                }
            }
            _ = tick(&mut idle_ticker) => {
                let idle_for = shared.last_activity.lock().unwrap().elapsed();
                let Some(timeout) = shared.config.idle_timeout else { continue };
                if idle_for < timeout {
                    continue;
                }
                warn!("connection idle for {idle_for:?}, exceeding the configured idle timeout, closing");
                let last = shared.highest_peer_stream_id.load(Ordering::SeqCst);
                let goaway = WriteCommand::GoAway {
                    last_stream_id: last,
                    error: ErrorType::NoError,
                    debug: "idle timeout".into(),
                };
                (goaway, true)
            }
            else => break,
        };

        let is_shutdown = matches!(command, WriteCommand::Shutdown);
        if let Err(err) = handle_write_command(&shared, &mut writer, &mut encoder, command).await {
            error!("writer task I/O error: {err}");
            break;
        }
        if is_shutdown || close_after {
            break;
        }
    }

    let _ = writer.flush().await;
    let _ = writer.shutdown().await;
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn ping_nonce(shared: &Arc<Shared>) -> [u8; 8] {
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut data = [0u8; 8];
    data[..4].copy_from_slice(&n.to_be_bytes());
    *shared.outstanding_ping.lock().unwrap() = Some((data, std::time::Instant::now()));
    data
}

async fn handle_write_command<W>(
    shared: &Arc<Shared>,
    writer: &mut FramedWriter<W>,
    encoder: &mut hpack::Encoder,
    command: WriteCommand,
) -> Result<(), H2Error>
where
    W: AsyncWrite + Unpin,
{
    match command {
        WriteCommand::Headers { stream_id, headers, end_stream } => {
            let wire = encoder.encode(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            let max = shared.remote_settings.lock().unwrap().max_frame_size() as usize;
            write_header_block(writer, stream_id, wire, end_stream, max).await
        }
        WriteCommand::Data { stream_id, data, end_stream } => write_data(shared, writer, stream_id, data, end_stream).await,
        WriteCommand::WindowUpdate { stream_id, increment } => {
            writer
                .write_frame(stream_id, &FramePayload::WindowUpdate { increment: std::num::NonZeroU32::new(increment).unwrap() })
                .await
        }
        WriteCommand::RstStream { stream_id, error } => {
            writer.write_frame(stream_id, &FramePayload::ResetStream { error_code: error as u32 }).await
        }
        WriteCommand::Settings { params } => writer.write_frame(0, &FramePayload::Settings { ack: false, params }).await,
        WriteCommand::SettingsAck => writer.write_frame(0, &FramePayload::Settings { ack: true, params: Vec::new() }).await,
        WriteCommand::Ping { ack, data } => writer.write_frame(0, &FramePayload::Ping { ack, data }).await,
        WriteCommand::GoAway { last_stream_id, error, debug } => {
            writer
                .write_frame(
                    0,
                    &FramePayload::GoAway {
                        last_stream_id,
                        error_code: error as u32,
                        debug_data: Bytes::from(debug.into_bytes()),
                    },
                )
                .await
        }
        WriteCommand::Shutdown => Ok(()),
    }?;
    writer.flush().await
}

async fn write_header_block<W>(
    writer: &mut FramedWriter<W>,
    stream_id: StreamId,
    wire: Bytes,
    end_stream: bool,
    max_frame_size: usize,
) -> Result<(), H2Error>
where
    W: AsyncWrite + Unpin,
{
    if wire.len() <= max_frame_size {
        return writer
            .write_frame(
                stream_id,
                &FramePayload::Headers { end_stream, end_headers: true, pad_len: None, priority: None, block_fragment: wire },
            )
            .await;
    }

    let mut chunks = wire.chunks(max_frame_size);
    let first = chunks.next().expect("non-empty wire already checked above");
    writer
        .write_frame(
            stream_id,
            &FramePayload::Headers {
                end_stream,
                end_headers: false,
                pad_len: None,
                priority: None,
                block_fragment: Bytes::copy_from_slice(first),
            },
        )
        .await?;

    let rest: Vec<&[u8]> = chunks.collect();
    for (i, chunk) in rest.iter().enumerate() {
        let end_headers = i == rest.len() - 1;
        writer
            .write_frame(
                stream_id,
                &FramePayload::Continuation { end_headers, block_fragment: Bytes::copy_from_slice(chunk) },
            )
            .await?;
    }
    Ok(())
}

async fn write_data<W>(
    shared: &Arc<Shared>,
    writer: &mut FramedWriter<W>,
    stream_id: StreamId,
    data: Bytes,
    end_stream: bool,
) -> Result<(), H2Error>
where
    W: AsyncWrite + Unpin,
{
    let max_frame_size = shared.remote_settings.lock().unwrap().max_frame_size() as usize;
    let mut offset = 0usize;
    if data.is_empty() {
        return writer.write_frame(stream_id, &FramePayload::Data { end_stream, pad_len: None, data }).await;
    }
    while offset < data.len() {
        let remaining = data.len() - offset;
        let budget = wait_for_window(shared, stream_id, remaining.min(max_frame_size) as u32).await?;
        let chunk = data.slice(offset..offset + budget as usize);
        offset += budget as usize;
        let is_last = offset == data.len();
        writer
            .write_frame(
                stream_id,
                &FramePayload::Data { end_stream: end_stream && is_last, pad_len: None, data: chunk },
            )
            .await?;
    }
    Ok(())
}

/// Blocks the writer task until at least `want` bytes (capped to what the
/// connection and stream windows allow) may legally be sent, per spec §4.4:
/// "a sender MUST NOT send DATA when either window is <= 0".
async fn wait_for_window(shared: &Arc<Shared>, stream_id: StreamId, want: u32) -> Result<u32, H2Error> {
    loop {
        let conn_avail = shared.conn_send_window.lock().unwrap().available();
        let stream_avail = shared
            .streams
            .get(&stream_id)
            .map(|s| s.send_window.available())
            .unwrap_or(0);
        let budget = want.min(conn_avail).min(stream_avail);
        if budget > 0 {
            shared.conn_send_window.lock().unwrap().consume(budget);
            if let Some(mut stream) = shared.streams.get_mut(&stream_id) {
                stream.send_window.consume(budget);
            }
            return Ok(budget);
        }
        let notified = shared.window_notify.notified();
        tokio::select! {
            _ = notified => {}
            _ = sleep(Duration::from_millis(200)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a bare `Shared` without going through `Connection::establish`'s
    /// socket handshake, so dispatch helpers can be exercised directly.
    fn test_shared(role: Role) -> Arc<Shared> {
        Arc::new(Shared {
            role,
            config: Config::default(),
            streams: DashMap::new(),
            remote_settings: std::sync::Mutex::new(Settings::defaults()),
            local_settings: std::sync::Mutex::new(Settings::defaults()),
            conn_send_window: std::sync::Mutex::new(Window::new(65_535)),
            conn_recv_window: std::sync::Mutex::new(RecvWindow::new(65_535)),
            next_local_stream_id: AtomicU32::new(if role == Role::Client { 1 } else { 2 }),
            highest_peer_stream_id: AtomicU32::new(0),
            state: std::sync::Mutex::new(ConnState::Open),
            pending_responses: DashMap::new(),
            window_notify: Notify::new(),
            outstanding_ping: std::sync::Mutex::new(None),
            last_activity: std::sync::Mutex::new(std::time::Instant::now()),
        })
    }

    #[tokio::test]
    async fn padded_data_debits_the_pad_length_byte_and_padding_from_both_windows() {
        let shared = test_shared(Role::Server);
        shared.streams.insert(1, Stream::new(65_535, 65_535));
        let (urgent_tx, _urgent_rx) = mpsc::channel(4);
        let (incoming_tx, _incoming_rx) = mpsc::channel(4);

        // 5 bytes of body, 10 bytes of padding: the wire payload the peer's
        // own send window was debited for is 1 (pad length byte) + 5 + 10 = 16.
        on_data(&shared, &urgent_tx, &incoming_tx, 1, Bytes::from_static(b"hello"), Some(10), false)
            .await
            .unwrap();

        assert_eq!(shared.conn_recv_window.lock().unwrap().window().value(), 65_535 - 16);
        assert_eq!(shared.streams.get(&1).unwrap().recv_window.window().value(), 65_535 - 16);
    }

    #[tokio::test]
    async fn unpadded_data_only_debits_the_body_length() {
        let shared = test_shared(Role::Server);
        shared.streams.insert(1, Stream::new(65_535, 65_535));
        let (urgent_tx, _urgent_rx) = mpsc::channel(4);
        let (incoming_tx, _incoming_rx) = mpsc::channel(4);

        on_data(&shared, &urgent_tx, &incoming_tx, 1, Bytes::from_static(b"hello"), None, false)
            .await
            .unwrap();

        assert_eq!(shared.conn_recv_window.lock().unwrap().window().value(), 65_535 - 5);
    }

    async fn call_on_headers(
        shared: &Arc<Shared>,
        stream_id: StreamId,
    ) -> Result<(), H2Error> {
        let (urgent_tx, _urgent_rx) = mpsc::channel(4);
        let (incoming_tx, _incoming_rx) = mpsc::channel(4);
        let mut decoder = hpack::Decoder::with_size(4096);
        let mut continuation_expected = None;
        on_headers(
            shared,
            &urgent_tx,
            &incoming_tx,
            &mut decoder,
            &mut continuation_expected,
            stream_id,
            true,
            true,
            None,
            Bytes::new(),
            false,
        )
        .await
    }

    #[tokio::test]
    async fn peer_stream_ids_must_strictly_increase() {
        let shared = test_shared(Role::Server);
        call_on_headers(&shared, 3).await.unwrap();
        let err = call_on_headers(&shared, 1).await.unwrap_err();
        assert!(err.is_connection_fatal());
        assert_eq!(err.code(), ErrorType::ProtocolError);
    }

    #[tokio::test]
    async fn peer_opening_a_stream_id_from_this_endpoints_own_parity_is_rejected() {
        let shared = test_shared(Role::Server);
        // Server-owned ids are even; a peer (client) HEADERS must never land
        // on one.
        let err = call_on_headers(&shared, 2).await.unwrap_err();
        assert!(err.is_connection_fatal());
        assert_eq!(err.code(), ErrorType::ProtocolError);
    }
}
