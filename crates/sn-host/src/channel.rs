//! Dispatch channels: the duplex host↔worker communication path.
//!
//! One candidate out, one observation back, per exchange, as line-delimited
//! JSON over TCP.  The transport guarantees neither ordering across
//! reconnects nor exactly-once delivery; stale reports are filtered here by
//! candidate id and anything unmatched upstream is discarded by the
//! coordinator's dispatch records.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sn_types::{
    Candidate, CandidateId, ChannelError, Observation, RecvError, WireMessage, WorkerDescriptor,
};

/// Duplex channel to one connected worker.
pub struct DispatchChannel {
    worker: String,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    reader: tokio::sync::Mutex<Lines<BufReader<OwnedReadHalf>>>,
}

impl DispatchChannel {
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Transmit one candidate to the worker.
    pub async fn send(&self, candidate: &Candidate) -> Result<(), ChannelError> {
        self.send_message(&WireMessage::Dispatch {
            candidate: candidate.clone(),
        })
        .await
    }

    /// Ask the worker to exit after its current exchange.
    pub async fn send_shutdown(&self) -> Result<(), ChannelError> {
        self.send_message(&WireMessage::Shutdown).await
    }

    async fn send_message(&self, message: &WireMessage) -> Result<(), ChannelError> {
        let line = message.to_line()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Wait for the observation answering candidate `expected`.
    ///
    /// Reports for other candidates are duplicate or stale deliveries from
    /// an earlier timed-out dispatch; they are logged and discarded without
    /// ending the wait.  Returns [`RecvError::Timeout`] when the deadline
    /// elapses, distinct from a broken channel.
    pub async fn receive(
        &self,
        expected: CandidateId,
        timeout: Duration,
    ) -> Result<Observation, RecvError> {
        let deadline = Instant::now() + timeout;
        let mut reader = self.reader.lock().await;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RecvError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            let line = match tokio::time::timeout(remaining, reader.next_line()).await {
                Err(_) => {
                    return Err(RecvError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
                Ok(Err(e)) => return Err(ChannelError::Io(e).into()),
                Ok(Ok(None)) => return Err(ChannelError::Closed.into()),
                Ok(Ok(Some(line))) => line,
            };

            match WireMessage::from_line(&line).map_err(ChannelError::Codec)? {
                WireMessage::Report { observation } if observation.candidate_id == expected => {
                    return Ok(observation);
                }
                WireMessage::Report { observation } => {
                    warn!(
                        worker = %self.worker,
                        candidate = observation.candidate_id,
                        expected,
                        "discarding stale observation"
                    );
                }
                other => {
                    return Err(ChannelError::UnexpectedMessage {
                        message: format!("{other:?}"),
                    }
                    .into());
                }
            }
        }
    }
}

/// Accepts worker connections and hands completed handshakes to the
/// coordinator.
pub struct ChannelServer {
    listener: TcpListener,
    handshake_timeout: Duration,
}

/// A worker connection that completed its Hello handshake.
pub struct WorkerConnection {
    pub descriptor: WorkerDescriptor,
    pub channel: Arc<DispatchChannel>,
}

impl ChannelServer {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handshake_timeout: Duration::from_secs(10),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop.  Runs until the receiving side of `connections` drops.
    pub async fn run(self, connections: mpsc::Sender<WorkerConnection>) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            debug!(peer = %peer, "incoming worker connection");

            let connections = connections.clone();
            let handshake_timeout = self.handshake_timeout;
            tokio::spawn(async move {
                match Self::handshake(stream, handshake_timeout).await {
                    Ok(connection) => {
                        info!(
                            worker = %connection.descriptor.address,
                            category = %connection.descriptor.category,
                            "worker connected"
                        );
                        if connections.send(connection).await.is_err() {
                            debug!("coordinator gone, dropping connection");
                        }
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "worker handshake failed"),
                }
            });
        }
    }

    async fn handshake(
        stream: TcpStream,
        timeout: Duration,
    ) -> Result<WorkerConnection, ChannelError> {
        let (read_half, write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let line = match tokio::time::timeout(timeout, lines.next_line()).await {
            Err(_) => return Err(ChannelError::Closed),
            Ok(Err(e)) => return Err(ChannelError::Io(e)),
            Ok(Ok(None)) => return Err(ChannelError::Closed),
            Ok(Ok(Some(line))) => line,
        };

        match WireMessage::from_line(&line).map_err(ChannelError::Codec)? {
            WireMessage::Hello { address, category } => {
                let channel = DispatchChannel {
                    worker: address.clone(),
                    writer: tokio::sync::Mutex::new(write_half),
                    reader: tokio::sync::Mutex::new(lines),
                };
                Ok(WorkerConnection {
                    descriptor: WorkerDescriptor::new(address, category),
                    channel: Arc::new(channel),
                })
            }
            other => Err(ChannelError::UnexpectedMessage {
                message: format!("{other:?}"),
            }),
        }
    }
}
