//! Client-facing accept loop
//!
//! Every client gets its own task, watched by a supervisor that turns panics
//! into [`Error::LibraryBug`]. The backend connection is shared behind a mutex
//! and only touched from blocking tasks.

mod session;

pub use session::ClientSession;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use color_eyre::eyre::eyre;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::BackendConn;
use crate::error::{Error, Result};
use crate::opts::Opts;

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    opts: Opts,
    backend: Arc<Mutex<BackendConn>>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    pub fn new(opts: Opts) -> Self {
        let backend = Arc::new(Mutex::new(BackendConn::new(opts.clone())));
        let (shutdown, _) = watch::channel(false);
        Self {
            opts,
            backend,
            shutdown,
        }
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// The backend connection shared by the server
    pub fn backend(&self) -> Arc<Mutex<BackendConn>> {
        Arc::clone(&self.backend)
    }

    /// Bind `listen_addr` and serve until [`stop`](Self::stop)
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.opts.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve clients from an already bound listener until [`stop`](Self::stop)
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        tracing::info!(
            listen_addr = %listener.local_addr()?,
            backend = %self.opts.backend_addr,
            "proxy listening"
        );

        if let Err(err) = with_backend(&self.backend, BackendConn::reconnect).await {
            tracing::error!(error = %err, "backend unavailable, serving clients anyway");
        }

        let keepalive = tokio::spawn(keepalive(
            Arc::clone(&self.backend),
            self.opts.keepalive_interval,
            self.shutdown.subscribe(),
        ));

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => spawn_session(socket, peer),
                    Err(err) => accept_failed(&err).await,
                },
                _ = async { shutdown.wait_for(|stopped| *stopped).await.map(drop) } => break,
            }
        }

        keepalive.abort();
        tracing::info!("proxy stopped");
        Ok(())
    }

    /// Make [`serve`](Self::serve) return. Running sessions are not interrupted.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

async fn accept_failed(err: &std::io::Error) {
    tracing::warn!(error = %err, backoff = ?ACCEPT_BACKOFF, "accept failed");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

fn spawn_session(socket: TcpStream, peer: SocketAddr) {
    let session = tokio::spawn(ClientSession::new(socket, peer).run());
    tokio::spawn(supervise(peer, session));
}

/// Wait for a session task and log how it ended
///
/// A panic inside the session becomes [`Error::LibraryBug`]. The session's socket
/// is already dropped by then.
pub(crate) async fn supervise(peer: SocketAddr, session: JoinHandle<Result<()>>) -> Result<()> {
    let result = match session.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(Error::LibraryBug(eyre!(
            "session panicked: {}",
            panic_message(&*err.into_panic())
        ))),
        Err(err) => Err(Error::LibraryBug(color_eyre::Report::new(err))),
    };

    match &result {
        Ok(()) => tracing::debug!(%peer, "session ended"),
        Err(err @ Error::LibraryBug(_)) => tracing::error!(%peer, error = ?err, "session crashed"),
        Err(err) => tracing::warn!(%peer, error = %err, "session failed"),
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Run `op` on the shared backend connection from a blocking task
async fn with_backend<T, F>(backend: &Arc<Mutex<BackendConn>>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut BackendConn) -> Result<T> + Send + 'static,
{
    let backend = Arc::clone(backend);
    tokio::task::spawn_blocking(move || {
        let mut conn = backend
            .lock()
            .map_err(|_poisoned| Error::LibraryBug(eyre!("backend connection mutex poisoned")))?;
        op(&mut conn)
    })
    .await
    .map_err(|err| Error::LibraryBug(color_eyre::Report::new(err)))?
}

/// Ping the backend every `interval`, reconnecting once when the ping fails
async fn keepalive(
    backend: Arc<Mutex<BackendConn>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval.is_zero() {
        tracing::debug!("backend keepalive disabled");
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for(|stopped| *stopped) => return,
        }

        if let Err(err) = with_backend(&backend, check_backend).await {
            tracing::warn!(error = %err, "backend keepalive failed");
        }
    }
}

fn check_backend(conn: &mut BackendConn) -> Result<()> {
    if conn.is_busy() {
        return Ok(());
    }
    match conn.ping() {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::info!(error = %err, "backend ping failed, reconnecting");
            conn.reconnect()
        }
    }
}
