//! RTSP accept loop and top-level orchestrator.
//!
//! Grounded in `original_source/trunk/src/app/srs_app_rtsp.cpp`'s
//! `SrsRtspCaster::on_tcp_client` (one thread per connection, added to a
//! manager that sweeps removals) and the teacher's own `transport::tcp`
//! accept loop (poll-with-timeout between `accept()` calls so shutdown is
//! observed promptly). The accept loop itself runs as a [`ThreadCoroutine`]
//! so it — and everything it spawns — shares one [`CancelToken`] for
//! process-wide shutdown.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::conn::{Connection, ConnectionManager, RemoveNotify};
use crate::context;
use crate::coroutine::{CancelToken, Coroutine, ThreadCoroutine};
use crate::error::Error;
use crate::rtsp::portpool::PortPool;
use crate::rtsp::session::RtspSession;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Config and shared resources reachable by every session on this caster.
pub struct CasterShared {
    pub output_url_template: String,
    pub rtmp_connect_timeout: Duration,
    pub rtmp_send_pulse: Duration,
    pub port_pool: PortPool,
}

/// Owns the RTSP listen socket and every live publish session.
pub struct Caster {
    listen_addr: String,
    shared: Arc<CasterShared>,
    manager: Arc<ConnectionManager<Connection<RtspSession>>>,
    coroutine: ThreadCoroutine,
}

impl Caster {
    pub fn new(config: &Config) -> Self {
        Self {
            listen_addr: config.rtsp_listen_addr.clone(),
            shared: Arc::new(CasterShared {
                output_url_template: config.output_url_template.clone(),
                rtmp_connect_timeout: config.rtmp_connect_timeout(),
                rtmp_send_pulse: config.rtmp_send_pulse(),
                port_pool: PortPool::new(config.rtp_port_min, config.rtp_port_max),
            }),
            manager: Arc::new(ConnectionManager::new()),
            coroutine: ThreadCoroutine::new("rtsp-caster"),
        }
    }

    /// Start the accept loop. Returns once the listener is bound and the
    /// loop's thread has been spawned — it does not block for the loop's
    /// lifetime.
    pub fn start(self: &Arc<Self>) -> Result<(), Error> {
        let this = self.clone();
        self.coroutine.start_with(Box::new(move |cancel: CancelToken| this.accept_loop(cancel)))
    }

    /// Signal shutdown and join the accept loop. Live sessions observe the
    /// same `CancelToken` on their own next cycle and exit on their own.
    pub fn stop(&self) {
        self.coroutine.stop();
    }

    pub fn connection_count(&self) -> usize {
        self.manager.len()
    }

    fn accept_loop(&self, cancel: CancelToken) -> Result<(), Error> {
        let listener = TcpListener::bind(&self.listen_addr)
            .map_err(|e| Error::SocketCreate(format!("{}: {e}", self.listen_addr)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::SocketCreate(e.to_string()))?;
        tracing::info!(addr = %self.listen_addr, "rtsp caster listening");

        while !cancel.cancelled() {
            self.manager.sweep();

            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "rtsp client connected");
                    if let Err(e) = self.spawn_session(stream, cancel.clone()) {
                        tracing::warn!(error = %e, "failed to start rtsp session");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "rtsp accept error");
                }
            }
        }

        tracing::debug!(live = self.manager.len(), "accept loop exiting, live sessions will self-remove");
        Ok(())
    }

    fn spawn_session(&self, stream: std::net::TcpStream, cancel: CancelToken) -> Result<(), Error> {
        let id = context::generate_id();
        let session = RtspSession::new(id, stream, self.shared.clone())?;
        let conn = Arc::new(Connection::new(session));
        self.manager.add(id, conn.clone());

        let manager: Arc<dyn RemoveNotify> = self.manager.clone();
        std::thread::Builder::new()
            .name(format!("rtsp-conn-{id}"))
            .spawn(move || conn.run(cancel, manager))
            .map_err(|e| Error::TaskCreateFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_and_stops_without_any_connections() {
        let mut config = Config::default();
        config.rtsp_listen_addr = "127.0.0.1:0".to_string();
        let caster = Arc::new(Caster::new(&config));
        caster.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(caster.connection_count(), 0);
        caster.stop();
    }
}
