use tokio::sync::watch;

/// Receiving half of the process-wide shutdown signal
pub type ShutdownSignal = watch::Receiver<bool>;

/// Create a shutdown channel; send `true` to stop every loop holding a receiver
pub fn channel() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// Resolve once shutdown was requested or the sender is gone
pub async fn requested(signal: &mut ShutdownSignal) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

/// Flip `sender` on Ctrl-C or SIGTERM
pub fn listen_for_signals(sender: watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown requested, finishing in-flight work");
        let _ = sender.send(true);
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not install SIGTERM handler, only Ctrl-C will stop the process");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_requested_resolves_after_send() {
        let (tx, mut rx) = channel();
        let waiter = tokio::spawn(async move { requested(&mut rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_requested_resolves_when_sender_dropped() {
        let (tx, mut rx) = channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), requested(&mut rx)).await.unwrap();
    }
}
