use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gw_protocol::{self, peek_variant_and_direction, Direction, Variant, HEADER_LEN, MAX_FRAME_LEN};
use gw_repo::{cmd_log, Repository};
use gw_session::{ConnHandle, RegisterOutcome, SessionStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConnError;
use crate::metrics::Metrics;
use crate::registry::ConnRegistry;
use crate::router::ProtoRouter;

#[derive(Debug, Clone)]
pub struct ConnConfig {
    pub detect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub write_queue_depth: usize,
    pub max_decode_errors: u32,
}

impl Default for ConnConfig {
    fn default() -> Self {
        ConnConfig {
            detect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(90),
            write_timeout: Duration::from_secs(10),
            write_queue_depth: 64,
            max_decode_errors: 5,
        }
    }
}

/// Observability-only state machine, mirrored by log fields at every
/// transition. `Active` and `Writing` aren't mutually exclusive in practice
/// (the writer task runs concurrently with the read loop) but a connection
/// is only ever reported as one or the other at a time for a simple gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Accepted,
    Detecting,
    Registered,
    Active,
    Writing,
    Closing,
    Closed,
}

/// Why the read loop stopped, distinguishing a caller-initiated shutdown
/// (not a signal of anything wrong with the device) from a clean TCP close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    GracefulShutdown,
    Eof,
}

static NEXT_CONN_HANDLE: AtomicU32 = AtomicU32::new(1);

fn next_conn_handle() -> ConnHandle {
    ConnHandle(u64::from(NEXT_CONN_HANDLE.fetch_add(1, Ordering::Relaxed)))
}

/// One accepted TCP connection: protocol detection, frame read loop, and a
/// writer task fed by a bounded channel, generalized from a one-way event
/// fanout to a full duplex request/ack conversation.
#[derive(Clone)]
pub struct ConnHandler {
    repo: Repository,
    session_store: Arc<dyn SessionStore>,
    router: Arc<ProtoRouter>,
    registry: ConnRegistry,
    metrics: Arc<Metrics>,
    config: ConnConfig,
    instance_id: Arc<str>,
}

impl ConnHandler {
    pub fn new(
        repo: Repository,
        session_store: Arc<dyn SessionStore>,
        router: Arc<ProtoRouter>,
        registry: ConnRegistry,
        metrics: Arc<Metrics>,
        config: ConnConfig,
        instance_id: Arc<str>,
    ) -> Self {
        ConnHandler {
            repo,
            session_store,
            router,
            registry,
            metrics,
            config,
            instance_id,
        }
    }

    /// Drives one connection to completion. Never propagates an error to the
    /// caller — every failure path logs and falls through to cleanup, since
    /// the listener's accept loop has nothing useful to do with a per-
    /// connection error beyond what's already been logged here.
    pub async fn run(self, stream: TcpStream, shutdown: CancellationToken) {
        let mut state = ConnState::Accepted;
        self.metrics.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.metrics.connections_active.fetch_add(1, Ordering::Relaxed);

        if let Err(err) = self.run_inner(stream, &shutdown, &mut state).await {
            debug!(?state, error = %err, "connection closed");
        }
        self.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    async fn run_inner(&self, mut stream: TcpStream, shutdown: &CancellationToken, state: &mut ConnState) -> Result<(), ConnError> {
        *state = ConnState::Detecting;
        let (variant, direction) = self.detect(&mut stream).await?;
        if direction != Direction::Uplink {
            // A downlink-direction magic arriving first means the peer isn't
            // a device at all (or is replaying captured traffic); nothing
            // useful to do but close.
            return Err(ConnError::UnrecognizedProtocol);
        }

        let conn_handle = next_conn_handle();
        let (mut read_half, write_half) = stream.into_split();
        let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>(self.config.write_queue_depth);
        let writer_handle = tokio::spawn(writer_loop(write_half, write_rx, self.config.write_timeout));

        let mut phy_id: Option<String> = None;
        let mut decode_errors: u32 = 0;
        *state = ConnState::Active;

        let loop_result = self
            .read_loop(&mut read_half, variant, conn_handle, shutdown, &write_tx, &mut phy_id, &mut decode_errors, state)
            .await;

        *state = ConnState::Closing;
        if let Some(id) = &phy_id {
            self.registry.unregister_if_current(id, &write_tx).await;
        }
        drop(write_tx);
        let _ = writer_handle.await;
        drop(read_half);

        // Graceful shutdown (our own cancellation token) isn't a drop signal;
        // an EOF, read error, or decode-error close all are, per §4.4.
        let was_anomalous = !matches!(loop_result, Ok(CloseReason::GracefulShutdown));
        if was_anomalous {
            if let Some(id) = &phy_id {
                if let Err(err) = self.session_store.record_tcp_drop(id, Utc::now()).await {
                    warn!(phy_id = %id, error = %err, "record_tcp_drop failed");
                }
            }
        }
        *state = ConnState::Closed;
        loop_result.map(|_| ())
    }

    #[allow(clippy::too_many_arguments)]
    async fn read_loop(
        &self,
        read_half: &mut OwnedReadHalf,
        variant: Variant,
        conn_handle: ConnHandle,
        shutdown: &CancellationToken,
        write_tx: &mpsc::Sender<Vec<u8>>,
        phy_id: &mut Option<String>,
        decode_errors: &mut u32,
        state: &mut ConnState,
    ) -> Result<CloseReason, ConnError> {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    return Ok(CloseReason::GracefulShutdown);
                }
                frame_bytes = read_one_frame(read_half, self.config.read_timeout) => {
                    match frame_bytes? {
                        None => return Ok(CloseReason::Eof),
                        Some(buf) => {
                            self.handle_raw_frame(&buf, variant, conn_handle, write_tx, phy_id, decode_errors, state).await?;
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_raw_frame(
        &self,
        buf: &[u8],
        variant: Variant,
        conn_handle: ConnHandle,
        write_tx: &mpsc::Sender<Vec<u8>>,
        phy_id: &mut Option<String>,
        decode_errors: &mut u32,
        state: &mut ConnState,
    ) -> Result<(), ConnError> {
        match gw_protocol::decode(buf) {
            Ok(frame) => {
                *decode_errors = 0;
                self.metrics.frames_decoded.fetch_add(1, Ordering::Relaxed);
                let id = frame.gateway_id.to_hex();

                if phy_id.as_deref() != Some(id.as_str()) {
                    self.on_first_frame(&id, conn_handle, write_tx).await;
                    *phy_id = Some(id.clone());
                    *state = ConnState::Registered;
                }

                let now = Utc::now();
                if let Err(err) = self.session_store.touch_heartbeat(&id, now).await {
                    warn!(phy_id = %id, error = %err, "touch_heartbeat failed");
                }

                let mut ctx = self.repo.ctx();
                if let Ok(device_id) = gw_repo::devices::ensure_device(&mut ctx, &id, protocol_kind(variant), now).await {
                    let _ = cmd_log::append_cmd_log(
                        &mut ctx,
                        Some(device_id),
                        "uplink",
                        i32::from(frame.command),
                        i64::from(frame.sequence),
                        &hex_encode(buf),
                        true,
                        None,
                    )
                    .await;
                }

                self.router.dispatch(frame, id, write_tx.clone()).await;
                Ok(())
            }
            Err(err) => {
                *decode_errors += 1;
                self.metrics.frames_decode_failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, decode_errors = *decode_errors, "frame decode failed");

                // The gateway ID lives inside the frame we just failed to
                // decode. If this connection already identified itself on an
                // earlier frame, attribute the row to that device; otherwise
                // there's no identity to attribute it to yet and the row is
                // logged with no device_id rather than dropped.
                let mut ctx = self.repo.ctx();
                let device_id = match phy_id.as_deref() {
                    Some(id) => gw_repo::devices::find_by_phy_id(&mut ctx, id).await.ok().flatten().map(|device| device.id),
                    None => None,
                };
                let reason = err.to_string();
                let _ = cmd_log::append_cmd_log(&mut ctx, device_id, "uplink", 0, 0, &hex_encode(buf), false, Some(reason.as_str())).await;

                if *decode_errors >= self.config.max_decode_errors {
                    self.metrics.connections_closed_decode_errors.fetch_add(1, Ordering::Relaxed);
                    return Err(ConnError::TooManyDecodeErrors(*decode_errors));
                }
                Ok(())
            }
        }
    }

    async fn detect(&self, stream: &mut TcpStream) -> Result<(Variant, Direction), ConnError> {
        let mut magic = [0u8; HEADER_LEN];
        let read = tokio::time::timeout(self.config.detect_timeout, stream.peek(&mut magic))
            .await
            .map_err(|_| ConnError::DetectTimeout)?
            .map_err(ConnError::Read)?;
        if read < 2 {
            return Err(ConnError::UnrecognizedProtocol);
        }
        peek_variant_and_direction([magic[0], magic[1]]).ok_or(ConnError::UnrecognizedProtocol)
    }

    async fn on_first_frame(&self, phy_id: &str, conn_handle: ConnHandle, write_tx: &mpsc::Sender<Vec<u8>>) {
        self.registry.register(phy_id, write_tx.clone()).await;
        match self.session_store.register(phy_id, &self.instance_id, conn_handle, Utc::now()).await {
            Ok(RegisterOutcome::TookOver { previous_instance_id }) => {
                info!(phy_id, previous_instance_id, "session taken over from another instance");
            }
            Ok(RegisterOutcome::Fresh) => {}
            Err(err) => warn!(phy_id, error = %err, "session register failed"),
        }
    }
}

fn protocol_kind(variant: Variant) -> &'static str {
    match variant {
        Variant::Standard => "standard",
        Variant::Compact => "compact",
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Reads one complete frame (header through tail) off `stream`, using the
/// 2-byte length field that's common to every variant. A `read_timeout`
/// elapsing with no bytes at all is reported as a clean EOF from the
/// caller's point of view only at the very start of a frame; partway
/// through one it's a hard read error.
async fn read_one_frame(stream: &mut OwnedReadHalf, read_timeout: Duration) -> Result<Option<Vec<u8>>, ConnError> {
    let mut header = [0u8; HEADER_LEN];
    match tokio::time::timeout(read_timeout, stream.read_exact(&mut header)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Ok(Err(err)) => return Err(ConnError::Read(err)),
        Err(_) => return Ok(None),
    }

    let declared_len = u16::from_be_bytes([header[2], header[3]]);
    let total_len = gw_protocol::frame_total_len(declared_len);
    if total_len > MAX_FRAME_LEN || total_len < HEADER_LEN {
        // Let decode() produce the canonical ErrLength rather than trying to
        // read an attacker-controlled remainder; hand back just the header
        // plus one dummy byte so decode() has a self-consistent (too-short)
        // buffer to reject.
        let mut buf = header.to_vec();
        buf.push(0);
        return Ok(Some(buf));
    }

    let mut rest = vec![0u8; total_len - HEADER_LEN];
    tokio::time::timeout(read_timeout, stream.read_exact(&mut rest))
        .await
        .map_err(|_| ConnError::Read(std::io::Error::new(std::io::ErrorKind::TimedOut, "read deadline exceeded")))?
        .map_err(ConnError::Read)?;

    let mut buf = header.to_vec();
    buf.extend_from_slice(&rest);
    Ok(Some(buf))
}

async fn writer_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>, write_timeout: Duration) {
    while let Some(bytes) = rx.recv().await {
        match tokio::time::timeout(write_timeout, writer.write_all(&bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(error = %err, "write failed, closing connection");
                break;
            }
            Err(_) => {
                warn!("write deadline exceeded, closing connection");
                break;
            }
        }
    }
}
