//! The `ryd worker` command: runs the message consumer, the engine worker
//! loop, and the cron runtime until interrupted.

use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub async fn run(state: &AppState) -> anyhow::Result<()> {
    state.cron.start().await?;
    state.triggers.initialize_all().await?;

    let cancel = CancellationToken::new();
    let worker = state.worker();
    let worker_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    let listener = state.listener();
    tracing::info!(
        cluster = %state.config.cluster,
        data_dir = %state.data_dir,
        "worker started"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = state.broker.receive(&listener) => {
                if let Err(err) = received {
                    tracing::error!(error = %err, "broker receive failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    tracing::info!("shutting down");
    cancel.cancel();
    worker_handle.await?;
    state.cron.shutdown().await?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
