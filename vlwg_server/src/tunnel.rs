//! Tunnel engine (C5): the per-connection state machine described by the
//! `Await-Header -> Dialing -> Streaming` diagram, plus the one-shot
//! fallback paths. The engine is transport-agnostic on both sides: the
//! WebSocket-facing glue lives in `routes::gateway`, and the outbound
//! socket is a type parameter so the state machine can be driven in
//! tests against `tokio::io::duplex` halves instead of real TCP.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use vlwg_common::{header, Command, ErrorKind};

use crate::dialer::dns::DnsChannel;
use crate::dialer::DialError;
use crate::identity::IdentityStore;

const READ_BUF_SIZE: usize = 16 * 1024;

/// Monotonic counters for one session (spec §3 `TunnelSession.stats`).
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub packets_up: u64,
    pub packets_down: u64,
}

/// Why a session ended, for logging and for the gateway's WebSocket
/// close code (spec §7).
#[derive(Debug)]
pub enum CloseReason {
    Rejected(ErrorKind),
    Aborted(ErrorKind),
    Terminated,
}

pub struct TunnelOutcome {
    pub reason: CloseReason,
    pub stats: SessionStats,
}

impl CloseReason {
    /// The WebSocket close code to send the peer, per spec §7. A clean
    /// shutdown with no underlying error closes as RFC 6455 1000.
    pub fn close_code(&self) -> u16 {
        match self {
            CloseReason::Rejected(reason) | CloseReason::Aborted(reason) => reason.close_code(),
            CloseReason::Terminated => 1000,
        }
    }
}

enum StreamEnd {
    UpstreamClosed,
    UpstreamError(std::io::Error),
    DownstreamClosed,
    DownstreamError(std::io::Error),
    PeerGone,
    Idle,
}

/// Drives one tunnel session to completion.
///
/// `first_chunk` is the early-data payload (possibly empty); when empty
/// the engine waits on `inbound_rx` for the first chunk, bounded by
/// `header_timeout`. `dial` is called with `(address, port)` for both
/// the primary destination and, at most once, the fallback.
pub async fn run_session<D, Fut, O>(
    first_chunk: Vec<u8>,
    mut inbound_rx: mpsc::Receiver<Vec<u8>>,
    downstream_tx: mpsc::Sender<Vec<u8>>,
    identity: &IdentityStore,
    dial: D,
    fallback_address: Option<&str>,
    header_timeout: Duration,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
) -> TunnelOutcome
where
    D: Fn(String, u16) -> Fut,
    Fut: std::future::Future<Output = Result<O, DialError>>,
    O: AsyncRead + AsyncWrite + Unpin,
{
    let chunk = if first_chunk.is_empty() {
        match tokio::time::timeout(header_timeout, inbound_rx.recv()).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) | Err(_) => {
                return TunnelOutcome {
                    reason: CloseReason::Rejected(ErrorKind::MalformedHeader(
                        vlwg_common::error::MalformedReason::HeaderTimeout,
                    )),
                    stats: SessionStats::default(),
                }
            }
        }
    } else {
        first_chunk
    };

    let request = match header::parse(&chunk) {
        Ok(req) => req,
        Err(e) => {
            return TunnelOutcome {
                reason: CloseReason::Rejected(e.into()),
                stats: SessionStats::default(),
            }
        }
    };

    if !identity.is_authorized(&request.identifier).await {
        return TunnelOutcome {
            reason: CloseReason::Rejected(ErrorKind::AuthRejected),
            stats: SessionStats::default(),
        };
    }

    let residual = chunk[request.payload_offset..].to_vec();

    // The header codec only lets UDP through on port 53 (spec §4.1); that
    // narrow case is framed per the DNS-over-UDP convention instead of
    // running through the TCP-oriented pump below.
    if request.command == Command::Udp {
        return run_dns_session(
            &request,
            &residual,
            inbound_rx,
            downstream_tx,
            connect_timeout,
            idle_timeout,
        )
        .await;
    }

    let response_header = header::build_response_header(request.version);

    let primary = dial_and_prime(&dial, &request.address, request.port, connect_timeout, &residual).await;

    let mut outbound = match primary {
        Ok(socket) => socket,
        Err(dial_err) => {
            let Some(fallback_host) = fallback_address else {
                return TunnelOutcome {
                    reason: CloseReason::Aborted(ErrorKind::DialFailed(dial_err.to_string())),
                    stats: SessionStats::default(),
                };
            };
            match dial_and_prime(&dial, fallback_host, request.port, connect_timeout, &residual).await {
                Ok(socket) => socket,
                Err(fallback_err) => {
                    return TunnelOutcome {
                        reason: CloseReason::Aborted(ErrorKind::DialFailed(fallback_err.to_string())),
                        stats: SessionStats::default(),
                    }
                }
            }
        }
    };

    let mut stats = SessionStats::default();
    let mut fallback_attempted = false;

    loop {
        let (round_stats, has_incoming, end) = stream_loop(
            &mut outbound,
            &mut inbound_rx,
            &downstream_tx,
            response_header,
            idle_timeout,
        )
        .await;
        stats.bytes_up += round_stats.bytes_up;
        stats.bytes_down += round_stats.bytes_down;
        stats.packets_up += round_stats.packets_up;
        stats.packets_down += round_stats.packets_down;

        let should_retry_fallback = matches!(end, StreamEnd::DownstreamClosed | StreamEnd::DownstreamError(_))
            && !has_incoming
            && !fallback_attempted;

        if !should_retry_fallback {
            let reason = match end {
                StreamEnd::UpstreamError(e) | StreamEnd::DownstreamError(e) => {
                    CloseReason::Aborted(ErrorKind::TransportError(e.to_string()))
                }
                StreamEnd::Idle => {
                    CloseReason::Aborted(ErrorKind::TransportError("idle timeout".to_string()))
                }
                StreamEnd::UpstreamClosed | StreamEnd::DownstreamClosed | StreamEnd::PeerGone => {
                    CloseReason::Terminated
                }
            };
            return TunnelOutcome { reason, stats };
        }

        fallback_attempted = true;
        let Some(fallback_host) = fallback_address else {
            return TunnelOutcome {
                reason: CloseReason::Terminated,
                stats,
            };
        };

        // Buffered-but-unconsumed upstream chunks from the dead session
        // are discarded (spec §4.5): we do not carry `inbound_rx`'s
        // backlog forward, we simply keep reading from it afresh.
        match dial_and_prime(&dial, fallback_host, request.port, connect_timeout, &residual).await {
            Ok(socket) => outbound = socket,
            Err(_) => return TunnelOutcome {
                reason: CloseReason::Terminated,
                stats,
            },
        }
    }
}

/// Dial `address:port` and write the residual payload. A dial timeout,
/// a connect error, or a write failure are all reported uniformly; the
/// caller decides whether to fall back.
async fn dial_and_prime<D, Fut, O>(
    dial: &D,
    address: &str,
    port: u16,
    connect_timeout: Duration,
    residual: &[u8],
) -> Result<O, DialError>
where
    D: Fn(String, u16) -> Fut,
    Fut: std::future::Future<Output = Result<O, DialError>>,
    O: AsyncRead + AsyncWrite + Unpin,
{
    let mut socket = match tokio::time::timeout(connect_timeout, dial(address.to_string(), port)).await {
        Ok(result) => result?,
        Err(_) => return Err(DialError::Timeout),
    };

    if !residual.is_empty() {
        socket.write_all(residual).await?;
    }

    Ok(socket)
}

/// DNS-over-UDP specialisation (spec §4.4): frames queries/responses
/// with the 2-byte length prefix instead of pumping a raw byte duplex.
async fn run_dns_session(
    request: &header::VlessRequest,
    residual: &[u8],
    mut inbound_rx: mpsc::Receiver<Vec<u8>>,
    downstream_tx: mpsc::Sender<Vec<u8>>,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
) -> TunnelOutcome {
    let channel = match DnsChannel::connect(&request.address, request.port, connect_timeout).await {
        Ok(channel) => channel,
        Err(e) => {
            return TunnelOutcome {
                reason: CloseReason::Aborted(ErrorKind::DialFailed(e.to_string())),
                stats: SessionStats::default(),
            }
        }
    };

    let mut stats = SessionStats::default();
    if !residual.is_empty() {
        if let Err(e) = channel.send_framed(residual).await {
            return TunnelOutcome {
                reason: CloseReason::Aborted(ErrorKind::TransportError(e.to_string())),
                stats,
            };
        }
    }

    let mut response_pending = Some(header::build_response_header(request.version));
    let mut deadline = idle_timeout.map(|d| Instant::now() + d);

    loop {
        let idle_sleep = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            maybe_chunk = inbound_rx.recv() => {
                match maybe_chunk {
                    Some(bytes) => {
                        if let Err(e) = channel.send_framed(&bytes).await {
                            return TunnelOutcome {
                                reason: CloseReason::Aborted(ErrorKind::TransportError(e.to_string())),
                                stats,
                            };
                        }
                        stats.bytes_up += bytes.len() as u64;
                        stats.packets_up += 1;
                        deadline = idle_timeout.map(|d| Instant::now() + d);
                    }
                    None => return TunnelOutcome { reason: CloseReason::Terminated, stats },
                }
            }

            recv_result = channel.recv_framed() => {
                match recv_result {
                    Ok(mut framed) => {
                        let mut out = Vec::with_capacity(framed.len() + 2);
                        if let Some(header) = response_pending.take() {
                            out.extend_from_slice(&header);
                        }
                        out.append(&mut framed);
                        stats.bytes_down += out.len() as u64;
                        stats.packets_down += 1;
                        if downstream_tx.send(out).await.is_err() {
                            return TunnelOutcome { reason: CloseReason::Terminated, stats };
                        }
                        deadline = idle_timeout.map(|d| Instant::now() + d);
                    }
                    Err(e) => {
                        return TunnelOutcome {
                            reason: CloseReason::Aborted(ErrorKind::TransportError(e.to_string())),
                            stats,
                        }
                    }
                }
            }

            _ = idle_sleep, if deadline.is_some() => {
                return TunnelOutcome { reason: CloseReason::Terminated, stats };
            }
        }
    }
}

/// Runs the full-duplex byte pump until either side ends. Prepends the
/// (not-yet-sent) response header to the first downstream chunk.
async fn stream_loop<O: AsyncRead + AsyncWrite + Unpin>(
    outbound: &mut O,
    inbound_rx: &mut mpsc::Receiver<Vec<u8>>,
    downstream_tx: &mpsc::Sender<Vec<u8>>,
    response_header: [u8; 2],
    idle_timeout: Option<Duration>,
) -> (SessionStats, bool, StreamEnd) {
    let (mut read_half, mut write_half) = tokio::io::split(&mut *outbound);
    let mut stats = SessionStats::default();
    let mut has_incoming = false;
    let mut response_pending = Some(response_header);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut deadline = idle_timeout.map(|d| Instant::now() + d);

    loop {
        let idle_sleep = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            maybe_chunk = inbound_rx.recv() => {
                match maybe_chunk {
                    Some(bytes) => {
                        if let Err(e) = write_half.write_all(&bytes).await {
                            return (stats, has_incoming, StreamEnd::UpstreamError(e));
                        }
                        stats.bytes_up += bytes.len() as u64;
                        stats.packets_up += 1;
                        deadline = idle_timeout.map(|d| Instant::now() + d);
                    }
                    None => return (stats, has_incoming, StreamEnd::UpstreamClosed),
                }
            }

            read_result = read_half.read(&mut buf) => {
                match read_result {
                    Ok(0) => return (stats, has_incoming, StreamEnd::DownstreamClosed),
                    Ok(n) => {
                        has_incoming = true;
                        let mut out = Vec::with_capacity(n + 2);
                        if let Some(header) = response_pending.take() {
                            out.extend_from_slice(&header);
                        }
                        out.extend_from_slice(&buf[..n]);
                        if downstream_tx.send(out).await.is_err() {
                            return (stats, has_incoming, StreamEnd::PeerGone);
                        }
                        stats.bytes_down += n as u64;
                        stats.packets_down += 1;
                        deadline = idle_timeout.map(|d| Instant::now() + d);
                    }
                    Err(e) => return (stats, has_incoming, StreamEnd::DownstreamError(e)),
                }
            }

            _ = idle_sleep, if deadline.is_some() => {
                return (stats, has_incoming, StreamEnd::Idle);
            }
        }
    }
}
