//! Per-connection event driver.
//!
//! One task per connection consumes [`TransportEvent`]s and applies them to
//! the connection and its streams. It stops when the transport goes away,
//! when the connection terminates, or when the shutdown signal fires.

use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::classify::{Termination, classify};
use crate::stream::StreamShared;
use crate::transport::{StreamId, TransportAction, TransportEvent};

use super::ConnectionInner;
use super::stream_table::RemoteOpen;

pub(super) async fn run(inner: Arc<ConnectionInner>, mut shutdown_rx: watch::Receiver<bool>) {
    drive(&inner, &mut shutdown_rx).await;
    inner.finish_closing();
}

async fn drive(inner: &ConnectionInner, shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        let event = tokio::select! {
            biased;

            _ = shutdown_rx.wait_for(|stop| *stop) => {
                debug!(remote = %inner.remote_addr, "Connection driver shutdown");
                break;
            }

            event = inner.transport.next_event() => event,
        };

        let Some(event) = event else {
            debug!(remote = %inner.remote_addr, "Transport event stream ended");
            inner.terminate(Termination::transport_lost());
            break;
        };

        if inner.handle_event(event).is_break() {
            break;
        }
    }
}

impl ConnectionInner {
    fn handle_event(&self, event: TransportEvent) -> ControlFlow<()> {
        match event {
            TransportEvent::StreamOpened { id } => return self.on_stream_opened(id),
            TransportEvent::StreamData { id, data, fin } => self.on_stream_data(id, data, fin),
            TransportEvent::StreamReset { id, code } => {
                let terminal = classify(&Termination::peer_abort(code));
                self.with_stream(id, |core| {
                    core.record_recv_error(terminal);
                });
                debug!(stream = %id, code, "Peer reset stream");
            }
            TransportEvent::StopSending { id, code } => {
                let terminal = classify(&Termination::peer_abort(code));
                self.with_stream(id, |core| {
                    core.record_send_error(terminal);
                });
                debug!(stream = %id, code, "Peer stopped reading stream");
            }
            TransportEvent::PeerClosed { code } => {
                self.lock().remote_close_code = Some(code);
                self.terminate(Termination::peer_close(code));
                return ControlFlow::Break(());
            }
            TransportEvent::IdleTimeout => {
                self.terminate(Termination::idle_timeout());
                return ControlFlow::Break(());
            }
            TransportEvent::ProtocolViolation { reason } => {
                warn!(remote = %self.remote_addr, %reason, "Transport reported protocol violation");
                self.terminate(Termination::protocol_violation());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn on_stream_opened(&self, id: StreamId) -> ControlFlow<()> {
        let refused = {
            let mut core = self.lock();
            if core.terminal.is_some() {
                return ControlFlow::Continue(());
            }
            match core.streams.register_remote(id) {
                RemoteOpen::New => {}
                RemoteOpen::Duplicate => {
                    drop(core);
                    return self.peer_violation(format!("stream {id} opened twice"));
                }
                RemoteOpen::WrongInitiator => {
                    drop(core);
                    return self.peer_violation(format!(
                        "peer opened stream {id} with our initiator bit"
                    ));
                }
            }

            let shared = Arc::new(StreamShared::new(id, self.side));
            match core.accept_queue.push(shared.clone()) {
                Ok(()) => {
                    core.streams.insert(shared);
                    false
                }
                Err(_) => true,
            }
        };

        if refused {
            let code = self.options.default_stream_error_code;
            warn!(stream = %id, code, "Accept queue full, refusing inbound stream");
            self.lock_stats().record_refused();
            if id.can_send(self.side) {
                self.submit(TransportAction::ResetStream { id, code });
            }
            self.submit(TransportAction::StopSending { id, code });
        } else {
            trace!(stream = %id, "Inbound stream queued");
            self.notify.notify_waiters();
        }
        ControlFlow::Continue(())
    }

    fn on_stream_data(&self, id: StreamId, data: Bytes, fin: bool) {
        let accepted = self.with_stream(id, |core| core.on_data(&data, fin));
        match accepted {
            Some(true) => trace!(stream = %id, bytes = data.len(), fin, "Stream data"),
            Some(false) => trace!(stream = %id, "Dropped data for finished stream"),
            None => trace!(stream = %id, "Dropped data for unknown stream"),
        }
    }

    /// Close the connection after the peer broke the stream rules.
    fn peer_violation(&self, reason: String) -> ControlFlow<()> {
        warn!(remote = %self.remote_addr, %reason, "Peer protocol violation");
        if self.terminate(Termination::protocol_violation()) {
            self.submit(TransportAction::Close {
                code: self.options.default_close_error_code,
            });
        }
        ControlFlow::Break(())
    }

    /// Run `f` on a registered stream and wake its waiters.
    fn with_stream<T>(
        &self,
        id: StreamId,
        f: impl FnOnce(&mut crate::stream::StreamCore) -> T,
    ) -> Option<T> {
        let stream = self.lock().streams.get(id).cloned()?;
        Some(stream.update(f))
    }
}
