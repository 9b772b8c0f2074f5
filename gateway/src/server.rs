//! UDP accounting server
//!
//! Receives datagrams on the accounting port and hands each one to the
//! orchestrator on its own task, so a slow publish never holds up the
//! receive loop. Acknowledgements go back to the source address from the
//! same socket.

use crate::accounting::{AccountingOrchestrator, PacketOutcome};
use crate::codec::packet::MAX_PACKET_LEN;
use crate::error::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Default wait for in-flight packets after shutdown
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// UDP server for RADIUS accounting
pub struct AccountingServer {
    socket: Arc<UdpSocket>,
    orchestrator: Arc<AccountingOrchestrator>,
    drain_timeout: Duration,
}

impl AccountingServer {
    /// Bind the accounting socket
    pub async fn bind(addr: SocketAddr, orchestrator: Arc<AccountingOrchestrator>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "Accounting server bound");
        Ok(Self {
            socket: Arc::new(socket),
            orchestrator,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }

    /// How long `run_until` waits for in-flight packets once shutdown fires
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until `shutdown` resolves, then drain in-flight packets
    ///
    /// Packets still running after the drain timeout are aborted and
    /// logged; the NAS retransmits them.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut buf = vec![0u8; MAX_PACKET_LEN];
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, source)) => self.dispatch(&mut in_flight, buf[..len].to_vec(), source),
                        Err(e) => {
                            warn!(error = %e, "Failed to receive accounting datagram");
                        }
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Packet task ended abnormally");
                    }
                }
                _ = &mut shutdown => {
                    info!("Accounting server stopping");
                    break;
                }
            }
        }

        self.drain(in_flight).await;
        Ok(())
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }
        info!(in_flight = in_flight.len(), "Waiting for in-flight packets");

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                aborted = in_flight.len(),
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "In-flight packets did not finish before shutdown, aborting"
            );
            in_flight.abort_all();
        }
    }

    fn dispatch(&self, in_flight: &mut JoinSet<()>, datagram: Vec<u8>, source: SocketAddr) {
        let socket = Arc::clone(&self.socket);
        let orchestrator = Arc::clone(&self.orchestrator);

        in_flight.spawn(async move {
            match orchestrator.handle_packet(&datagram, source).await {
                PacketOutcome::Acknowledged(response) => {
                    if let Err(e) = socket.send_to(&response, source).await {
                        error!(%source, error = %e, "Failed to send Accounting-Response");
                    }
                }
                PacketOutcome::Dropped(reason) => {
                    debug!(%source, reason = reason.as_str(), "No response sent");
                }
            }
        });
    }
}
