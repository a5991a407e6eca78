use std::pin::Pin;

use cfg_if::cfg_if;
use futures::{future::Shared, FutureExt};
use std::future::Future;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn raw_shutdown_signal() {
            let (Ok(mut ctrl_c), Ok(mut ctrl_close), Ok(mut ctrl_shutdown)) =
                (ctrl_c(), ctrl_close(), ctrl_shutdown())
            else {
                warn!("Failed to attach shutdown signal handlers, only cancellation will stop this worker");
                return std::future::pending().await;
            };
            select! {
                _ = ctrl_c.recv() => (),
                _ = ctrl_close.recv() => (),
                _ = ctrl_shutdown.recv() => (),
            }
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        async fn unix_shutdown_signal(signal_kind: SignalKind) {
            match signal(signal_kind) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to listen to unix shutdown signal");
                    std::future::pending::<()>().await;
                }
            }
        }

        async fn raw_shutdown_signal() {
            select! {
                _ = unix_shutdown_signal(SignalKind::terminate()) => (),
                _ = unix_shutdown_signal(SignalKind::interrupt()) => (),
                _ = unix_shutdown_signal(SignalKind::hangup()) => (),
            };
        }
    } else {
        compile_error!("Your OS does not support shutdown signal ! Are you targeting wasm ?");
    }
}

/// Resolves once the process receives a termination request. Cloning is cheap
/// and every clone resolves together.
pub type ShutdownSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

pub fn shutdown_signal() -> ShutdownSignal {
    async {
        raw_shutdown_signal().await;
        info!("Shutdown signal detected. Finishing in-flight jobs before exiting...");
    }
    .boxed()
    .shared()
}

/// Cancels `token` when `signal` resolves.
///
/// The returned task also ends when the token is cancelled by someone else,
/// so it never outlives the workers it serves.
pub fn cancel_on_shutdown(signal: ShutdownSignal, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        select! {
            _ = signal => token.cancel(),
            _ = token.cancelled() => (),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancels_token_when_signal_fires() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let signal: ShutdownSignal = async move {
            let _ = rx.await;
        }
        .boxed()
        .shared();

        let token = CancellationToken::new();
        let handle = cancel_on_shutdown(signal, token.clone());
        assert!(!token.is_cancelled());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("bridge should finish")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn bridge_exits_when_token_cancelled_elsewhere() {
        let signal: ShutdownSignal = std::future::pending::<()>().boxed().shared();
        let token = CancellationToken::new();
        let handle = cancel_on_shutdown(signal, token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("bridge should finish")
            .unwrap();
    }
}
