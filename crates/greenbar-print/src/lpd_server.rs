// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// LPD listener: accepts connections on the configured port (default 515)
// and drives each one through the receive-job exchange.
//
// Every connection runs in its own task.  Nothing outside the connection is
// touched until the queue resolves to an account, and no counter moves until
// both files of a job have arrived.  A connection that closes or stalls
// mid-job loses only its own partial job.
//
// Once a job is complete it is run through the pipeline on the connection's
// own task, so a sender waiting for a render slot simply stops being read.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use greenbar_core::config::{DEFAULT_LPD_PORT, ServerConfig};
use greenbar_core::error::{GreenbarError, Result};
use greenbar_core::types::{JobOutcome, ServerStatus};

use crate::lpd::{
    ACK_OK, ACK_REJECT, DaemonCommand, ReceivedFile, SessionState, SubCommand, parse_daemon_command,
    parse_subcommand, read_command_line, read_payload,
};
use crate::pipeline::JobPipeline;
use crate::resolver::QueueResolver;

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Largest control or data file a client may announce.
    pub max_job_bytes: usize,
    /// How long a single read may stall before the connection is dropped.
    pub receive_timeout: Duration,
}

impl From<&ServerConfig> for ConnectionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_job_bytes: config.max_job_bytes,
            receive_timeout: Duration::from_secs(config.receive_timeout_secs),
        }
    }
}

/// State shared by every connection task.
struct SharedState {
    resolver: QueueResolver,
    pipeline: Arc<JobPipeline>,
    limits: ConnectionLimits,
    active_connections: Arc<AtomicU32>,
}

/// The LPD print server.
pub struct LpdServer {
    bind_address: IpAddr,
    port: u16,
    local_addr: Option<SocketAddr>,
    status: ServerStatus,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
}

impl LpdServer {
    /// Create a stopped server for `port` (515 when `None`) on all
    /// interfaces.
    pub fn new(port: Option<u16>) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: port.unwrap_or(DEFAULT_LPD_PORT),
            local_addr: None,
            status: ServerStatus::Stopped,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Wait up to `grace` for open connections to finish.
    ///
    /// Returns `false` if some were still open when `grace` ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        while self.active_connections() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    /// Bind the listener and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns `PrintServer` if the address is in use or cannot be bound.
    pub async fn start(
        &mut self,
        resolver: QueueResolver,
        pipeline: Arc<JobPipeline>,
        limits: ConnectionLimits,
    ) -> Result<()> {
        if self.status == ServerStatus::Running {
            debug!(port = self.port, "LPD server already running");
            return Ok(());
        }

        self.status = ServerStatus::Starting;

        let bind_addr = SocketAddr::new(self.bind_address, self.port);
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                self.status = ServerStatus::Error;
                return Err(GreenbarError::PrintServer(format!("bind {bind_addr}: {e}")));
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| GreenbarError::PrintServer(format!("local address: {e}")))?;
        self.local_addr = Some(local_addr);

        info!(addr = %local_addr, "LPD server listening");

        let shutdown = Arc::clone(&self.shutdown_signal);
        let shared = Arc::new(SharedState {
            resolver,
            pipeline,
            limits,
            active_connections: Arc::clone(&self.active_connections),
        });

        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, shared).await;
        });

        self.task_handle = Some(handle);
        self.status = ServerStatus::Running;
        Ok(())
    }

    /// Stop accepting connections.  Connections already open run to
    /// completion; [`drain`](Self::drain) waits for them.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        info!(port = self.port, "stopping LPD server");
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| GreenbarError::PrintServer(format!("task join: {e}")))?;
        }

        self.status = ServerStatus::Stopped;
        self.local_addr = None;
        info!(port = self.port, "LPD server stopped");
        Ok(())
    }

    async fn accept_loop(listener: TcpListener, shutdown: Arc<Notify>, shared: Arc<SharedState>) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "incoming LPD connection");
                            let state = Arc::clone(&shared);
                            state.active_connections.fetch_add(1, Ordering::Relaxed);
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, peer_addr, &state).await {
                                    warn!(peer = %peer_addr, error = %e, "connection aborted");
                                }
                                state.active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    /// Run one connection until the client closes it or breaks protocol.
    async fn handle_connection<S>(stream: S, peer: SocketAddr, state: &SharedState) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let timeout = state.limits.receive_timeout;
        let mut reader = BufReader::new(stream);

        let Some(line) = with_timeout(timeout, read_command_line(&mut reader)).await? else {
            debug!(peer = %peer, "connection closed before any command");
            return Ok(());
        };
        let queue = match parse_daemon_command(&line) {
            Ok(DaemonCommand::ReceiveJob { queue }) => queue,
            Err(e) => {
                reply(reader.get_mut(), ACK_REJECT).await?;
                return Err(e);
            }
        };

        let account = match state.resolver.resolve(&queue).await {
            Ok(account) => account,
            Err(e) => {
                info!(peer = %peer, error = %e, "queue refused");
                reply(reader.get_mut(), ACK_REJECT).await?;
                return Err(e);
            }
        };
        reply(reader.get_mut(), ACK_OK).await?;

        let mut session = SessionState::AwaitQueue.queue_accepted(queue)?;

        loop {
            let Some(line) = with_timeout(timeout, read_command_line(&mut reader)).await? else {
                if session.has_partial_job() {
                    info!(peer = %peer, email = %account.email, "connection closed mid-job; partial job discarded");
                }
                return Ok(());
            };

            let command = match parse_subcommand(&line, state.limits.max_job_bytes) {
                Ok(c) => c,
                Err(e) => {
                    reply(reader.get_mut(), ACK_REJECT).await?;
                    return Err(e);
                }
            };

            match command {
                SubCommand::Abort => {
                    session = session.aborted()?;
                    debug!(peer = %peer, "job aborted by client");
                    reply(reader.get_mut(), ACK_OK).await?;
                }
                SubCommand::File { kind, len, name } => {
                    reply(reader.get_mut(), ACK_OK).await?;
                    let bytes = with_timeout(timeout, read_payload(&mut reader, len)).await?;
                    session = match session.file_received(kind, ReceivedFile { name, bytes }) {
                        Ok(next) => next,
                        Err(e) => {
                            reply(reader.get_mut(), ACK_REJECT).await?;
                            return Err(e);
                        }
                    };
                    reply(reader.get_mut(), ACK_OK).await?;

                    session = match session.take_job() {
                        Ok((job, next)) => {
                            match state.pipeline.process(&account, job).await {
                                Ok(JobOutcome::Printed { job_id, pages, .. }) => {
                                    debug!(peer = %peer, %job_id, pages, "job finished");
                                }
                                Ok(JobOutcome::Dropped { job_id }) => {
                                    debug!(peer = %peer, %job_id, "job dropped");
                                }
                                Err(e) if e.is_admission_rejection() => {
                                    info!(peer = %peer, error = %e, "job not admitted");
                                }
                                Err(e) => {
                                    warn!(peer = %peer, error = %e, "job failed");
                                }
                            }
                            next
                        }
                        Err(waiting) => waiting,
                    };
                }
            }
        }
    }
}

async fn reply<W>(writer: &mut W, status: u8) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[status]).await?;
    writer.flush().await?;
    Ok(())
}

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| GreenbarError::Protocol(format!("no data from client for {}s", limit.as_secs_f32())))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenbar_core::store::AccountStore;
    use tokio::io::{AsyncReadExt, DuplexStream};

    use crate::mailer::tests::RecordingMailer;
    use crate::pipeline::tests::{Harness, harness};

    fn account() -> greenbar_core::types::Account {
        let mut a = greenbar_core::types::Account::new("op@example.com");
        a.verified = true;
        a
    }

    fn limits() -> ConnectionLimits {
        ConnectionLimits {
            max_job_bytes: 64 * 1024,
            receive_timeout: Duration::from_secs(5),
        }
    }

    fn state(h: &Harness, limits: ConnectionLimits) -> Arc<SharedState> {
        Arc::new(SharedState {
            resolver: QueueResolver::new(h.store.clone()),
            pipeline: Arc::clone(&h.pipeline),
            limits,
            active_connections: Arc::new(AtomicU32::new(0)),
        })
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:721".parse().unwrap()
    }

    fn serve(state: Arc<SharedState>) -> (DuplexStream, JoinHandle<Result<()>>) {
        let (client, server) = tokio::io::duplex(256);
        let handle = tokio::spawn(async move { LpdServer::handle_connection(server, peer(), &state).await });
        (client, handle)
    }

    async fn ack(client: &mut DuplexStream) -> u8 {
        let mut b = [0u8; 1];
        client.read_exact(&mut b).await.unwrap();
        b[0]
    }

    async fn send_file(client: &mut DuplexStream, code: u8, name: &str, body: &[u8]) {
        let header = format!("{}{} {name}\n", code as char, body.len());
        client.write_all(header.as_bytes()).await.unwrap();
        assert_eq!(ack(client).await, ACK_OK);
        client.write_all(body).await.unwrap();
        client.write_all(&[0]).await.unwrap();
        assert_eq!(ack(client).await, ACK_OK);
    }

    fn control(job_name: &str) -> Vec<u8> {
        format!("Hhost\nPop\nJ{job_name}\nldfA001host\n").into_bytes()
    }

    async fn open_queue(client: &mut DuplexStream, queue: &str) -> u8 {
        client.write_all(format!("\x02{queue}\n").as_bytes()).await.unwrap();
        ack(client).await
    }

    fn stored(h: &Harness) -> greenbar_core::types::Account {
        h.store.find_by_email("op@example.com").unwrap().unwrap()
    }

    #[test]
    fn default_port_is_515() {
        assert_eq!(LpdServer::new(None).port(), 515);
        assert_eq!(LpdServer::new(Some(1515)).port(), 1515);
    }

    #[test]
    fn initial_status_is_stopped() {
        let server = LpdServer::new(None);
        assert_eq!(server.status(), ServerStatus::Stopped);
        assert_eq!(server.active_connections(), 0);
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn full_job_over_the_wire() {
        let h = harness(account(), 5, RecordingMailer::default());
        let (mut client, handle) = serve(state(&h, limits()));

        assert_eq!(open_queue(&mut client, &h.account.access_key).await, ACK_OK);
        send_file(&mut client, 0x02, "cfA001host", &control("PAYROLL01")).await;
        send_file(&mut client, 0x03, "dfA001host", &b"LINE ONE\nLINE TWO\n".repeat(40)).await;
        drop(client);

        handle.await.unwrap().unwrap();
        assert_eq!(h.renderer.opened(), 1);
        assert_eq!(h.mailer.count(), 1);
        assert_eq!(stored(&h).job_count, 1);
        assert_eq!(stored(&h).page_count, 2);
    }

    #[tokio::test]
    async fn data_file_may_come_first_and_jobs_may_follow() {
        let h = harness(account(), 5, RecordingMailer::default());
        let (mut client, handle) = serve(state(&h, limits()));

        assert_eq!(open_queue(&mut client, &h.account.access_key).await, ACK_OK);
        send_file(&mut client, 0x03, "dfA001host", b"FIRST\n").await;
        send_file(&mut client, 0x02, "cfA001host", &control("ONE")).await;
        send_file(&mut client, 0x02, "cfA001host", &control("TWO")).await;
        send_file(&mut client, 0x03, "dfA001host", b"SECOND\n").await;
        drop(client);

        handle.await.unwrap().unwrap();
        assert_eq!(h.renderer.opened(), 2);
        assert_eq!(stored(&h).job_count, 2);
    }

    #[tokio::test]
    async fn unknown_queue_is_refused() {
        let h = harness(account(), 5, RecordingMailer::default());
        let (mut client, handle) = serve(state(&h, limits()));

        assert_eq!(open_queue(&mut client, "no-such-key").await, ACK_REJECT);
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, GreenbarError::UnknownQueue(_)));
    }

    #[tokio::test]
    async fn disabled_account_is_refused() {
        let mut a = account();
        a.enabled = false;
        let h = harness(a, 5, RecordingMailer::default());
        let (mut client, handle) = serve(state(&h, limits()));

        assert_eq!(open_queue(&mut client, &h.account.access_key).await, ACK_REJECT);
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, GreenbarError::AccountDisabled(_)));
    }

    #[tokio::test]
    async fn interrupted_receipt_mutates_nothing() {
        let h = harness(account(), 5, RecordingMailer::default());
        let (mut client, handle) = serve(state(&h, limits()));

        assert_eq!(open_queue(&mut client, &h.account.access_key).await, ACK_OK);
        send_file(&mut client, 0x02, "cfA001host", &control("PAYROLL01")).await;
        client.write_all(b"\x031000 dfA001host\n").await.unwrap();
        assert_eq!(ack(&mut client).await, ACK_OK);
        client.write_all(b"only a little").await.unwrap();
        drop(client);

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, GreenbarError::Protocol(_)));
        assert_eq!(h.renderer.opened(), 0);
        assert_eq!(stored(&h).job_count, 0);
    }

    #[tokio::test]
    async fn oversized_payload_is_refused() {
        let h = harness(account(), 5, RecordingMailer::default());
        let small = ConnectionLimits {
            max_job_bytes: 1024,
            ..limits()
        };
        let (mut client, handle) = serve(state(&h, small));

        assert_eq!(open_queue(&mut client, &h.account.access_key).await, ACK_OK);
        client.write_all(b"\x035000 dfA001host\n").await.unwrap();
        assert_eq!(ack(&mut client).await, ACK_REJECT);

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, GreenbarError::Protocol(_)));
        assert_eq!(stored(&h).job_count, 0);
    }

    #[tokio::test]
    async fn abort_discards_the_partial_job() {
        let h = harness(account(), 5, RecordingMailer::default());
        let (mut client, handle) = serve(state(&h, limits()));

        assert_eq!(open_queue(&mut client, &h.account.access_key).await, ACK_OK);
        send_file(&mut client, 0x02, "cfA001host", &control("STALE")).await;
        client.write_all(b"\x01\n").await.unwrap();
        assert_eq!(ack(&mut client).await, ACK_OK);

        // A fresh control file is needed after the abort.
        send_file(&mut client, 0x02, "cfA001host", &control("FRESH")).await;
        send_file(&mut client, 0x03, "dfA001host", b"HELLO\n").await;
        drop(client);

        handle.await.unwrap().unwrap();
        assert_eq!(h.renderer.opened(), 1);
        let entries = h.log.lock().unwrap().entries_for_account("op@example.com").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].job_name, "FRESH");
    }

    #[tokio::test]
    async fn stalled_sender_times_out() {
        let h = harness(account(), 5, RecordingMailer::default());
        let quick = ConnectionLimits {
            receive_timeout: Duration::from_millis(100),
            ..limits()
        };
        let (mut client, handle) = serve(state(&h, quick));

        assert_eq!(open_queue(&mut client, &h.account.access_key).await, ACK_OK);
        let err = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("connection was not timed out")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, GreenbarError::Protocol(_)));
        drop(client);
    }

    #[tokio::test]
    async fn rejected_job_keeps_the_connection_open() {
        let h = harness(account(), 1, RecordingMailer::default());
        let (mut client, handle) = serve(state(&h, limits()));

        assert_eq!(open_queue(&mut client, &h.account.access_key).await, ACK_OK);
        for name in ["JOB1", "JOB2"] {
            send_file(&mut client, 0x02, "cfA001host", &control(name)).await;
            send_file(&mut client, 0x03, "dfA001host", b"X\n").await;
        }
        drop(client);

        handle.await.unwrap().unwrap();
        assert_eq!(h.renderer.opened(), 1);
        let entries = h.log.lock().unwrap().entries_for_account("op@example.com").unwrap();
        assert_eq!(entries[1].outcome, "rejected");
    }

    #[tokio::test]
    async fn server_accepts_tcp_connections() {
        let h = harness(account(), 5, RecordingMailer::default());
        let mut server = LpdServer::new(Some(0)).with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST));
        server
            .start(QueueResolver::new(h.store.clone()), Arc::clone(&h.pipeline), limits())
            .await
            .unwrap();
        assert_eq!(server.status(), ServerStatus::Running);

        let addr = server.local_addr().unwrap();
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"\x02no-such-key\n").await.unwrap();
        let mut b = [0u8; 1];
        stream.read_exact(&mut b).await.unwrap();
        assert_eq!(b[0], ACK_REJECT);

        server.stop().await.unwrap();
        assert_eq!(server.status(), ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn drain_waits_for_open_connections() {
        let h = harness(account(), 5, RecordingMailer::default());
        let mut server = LpdServer::new(Some(0)).with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST));
        server
            .start(QueueResolver::new(h.store.clone()), Arc::clone(&h.pipeline), limits())
            .await
            .unwrap();

        let stream = tokio::net::TcpStream::connect(server.local_addr().unwrap())
            .await
            .unwrap();
        for _ in 0..100 {
            if server.active_connections() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.active_connections(), 1);

        server.stop().await.unwrap();
        assert!(!server.drain(Duration::from_millis(100)).await);

        drop(stream);
        assert!(server.drain(Duration::from_secs(5)).await);
        assert_eq!(server.active_connections(), 0);
    }
}
