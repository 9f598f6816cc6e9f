//! TCP listener: accepts connections and runs one session task per client

use crate::classifier::Trainer;
use crate::error::Result;
use crate::observability::ClfMetrics;
use crate::session::{ServiceContext, Session};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct Listener<T: Trainer> {
    listener: TcpListener,
    context: Arc<ServiceContext<T>>,
    metrics: ClfMetrics,
}

impl<T: Trainer> Listener<T> {
    pub async fn bind<A: ToSocketAddrs>(addr: A, context: Arc<ServiceContext<T>>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            context,
            metrics: ClfMetrics::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &Arc<ServiceContext<T>> {
        &self.context
    }

    /// Accept connections until a shutdown signal arrives
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(addr = %self.local_addr()?, "Listening for clients");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let context = Arc::clone(&self.context);
                        let metrics = self.metrics.clone();
                        tokio::spawn(handle_connection(context, metrics, stream, peer));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Listener received shutdown signal");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<T: Trainer>(
    context: Arc<ServiceContext<T>>,
    metrics: ClfMetrics,
    stream: TcpStream,
    peer: SocketAddr,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    metrics.session_opened();
    debug!(peer = %peer, "Session opened");

    let mut session = Session::new(peer.to_string(), Arc::clone(&context));
    let result = session.run(stream).await;
    metrics.session_closed();

    report_session_end(&context, &metrics, &session, &result);
}

fn report_session_end<T: Trainer>(
    context: &ServiceContext<T>,
    metrics: &ClfMetrics,
    session: &Session<T>,
    result: &Result<()>,
) {
    match result {
        Ok(()) => {
            context
                .logger
                .log_session_closed(session.peer(), session.messages(), None);
        }
        Err(e) if e.is_peer_disconnect() => {
            info!(
                peer = %session.peer(),
                messages = session.messages(),
                "Peer disconnected"
            );
        }
        Err(e) => {
            metrics.inc_session_errors(e.kind());
            context.logger.log_session_closed(
                session.peer(),
                session.messages(),
                Some(&e.to_string()),
            );
        }
    }
}
