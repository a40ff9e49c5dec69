//! Listener for inbound connections.
//!
//! A [`Listener`] binds through a [`TransportBinding`] and hands out
//! [`Connection`]s for peers that completed the handshake. Every accepted
//! connection gets the listener's [`ConnectionOptions`](crate::config::ConnectionOptions).

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ListenerOptions;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::transport::{ListenParams, Side, TransportBinding, TransportListener};

/// Accepts inbound connections.
///
/// Dropping the listener closes it.
pub struct Listener {
    transport: Arc<dyn TransportListener>,
    options: ListenerOptions,
    local_addr: SocketAddr,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl Listener {
    /// Start listening through `binding`.
    pub async fn bind(binding: &dyn TransportBinding, options: ListenerOptions) -> Result<Self> {
        options.validate()?;
        let params = ListenParams {
            listen_addr: options.listen_addr,
            alpn: options.alpn.clone(),
            backlog: options.backlog,
            idle_timeout: options.connection.idle_timeout,
        };
        let transport = binding.listen(params).await?;
        let local_addr = transport.local_addr();
        let (shutdown_tx, _) = watch::channel(false);

        info!(addr = %local_addr, "Listening");
        Ok(Self {
            transport,
            options,
            local_addr,
            closed: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    /// Get the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the listener options.
    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// Wait for the next peer to complete its handshake.
    ///
    /// A call pending when the listener is closed fails with
    /// `OperationAborted`; calls made afterwards fail with `AlreadyDisposed`.
    pub async fn accept_connection(&self) -> Result<Connection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::AlreadyDisposed);
        }
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let aborted = Error::OperationAborted {
            code: self.options.connection.default_close_error_code,
        };

        let transport = tokio::select! {
            biased;

            _ = shutdown_rx.wait_for(|stop| *stop) => return Err(aborted),

            result = self.transport.accept() => match result {
                Ok(transport) => transport,
                Err(_) if self.closed.load(Ordering::Acquire) => return Err(aborted),
                Err(e) => return Err(e),
            },
        };

        debug!(remote = %transport.remote_addr(), "Accepted connection");
        Ok(Connection::establish(
            transport,
            Side::Server,
            self.options.connection.clone(),
        ))
    }

    /// Stop listening. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_tx.send_replace(true);
        self.transport.close();
        info!(addr = %self.local_addr, "Listener closed");
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}
