use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use futures::FutureExt;
use tokio::{
    signal::unix::{Signal, SignalKind},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Resolves on the first SIGINT or SIGTERM received by the process.
pub struct ShutdownSignal {
    /// A future that resolves when a SIGINT signal is received.
    ctrl_c: Pin<Box<dyn Future<Output = io::Result<()>> + Send>>,
    /// A future that resolves when a SIGTERM signal is received.
    term_signal: Signal,
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal").finish_non_exhaustive()
    }
}

impl ShutdownSignal {
    /// Install the SIGINT and SIGTERM listeners. Must be called inside a tokio
    /// runtime.
    pub fn new() -> io::Result<Self> {
        let ctrl_c = Box::pin(tokio::signal::ctrl_c());
        let term_signal = tokio::signal::unix::signal(SignalKind::terminate())?;
        Ok(Self { ctrl_c, term_signal })
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.ctrl_c.poll_unpin(cx).is_ready() {
            debug!("Received SIGINT signal");
            return Poll::Ready(());
        }

        if this.term_signal.poll_recv(cx).is_ready() {
            debug!("Received SIGTERM signal");
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

/// Cancel `token` when `shutdown` resolves.
///
/// The returned task also exits once `token` is cancelled by someone else, so
/// it never outlives the pipeline it guards.
pub fn cancel_on_shutdown<S>(shutdown: S, token: CancellationToken) -> JoinHandle<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = shutdown => {
                info!("Shutdown signal received, cancelling pipeline");
                token.cancel();
            }
        }
    })
}
