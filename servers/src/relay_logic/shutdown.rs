use tokio::signal;

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
pub async fn wait_for_signal() {
    let terminate = async {
        #[cfg(unix)]
        {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut term_signal) => {
                    term_signal.recv().await;
                    tracing::info!("SIGTERM received, initiating shutdown.");
                }
                Err(e) => {
                    tracing::warn!("Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            // On non-unix platforms, just wait forever.
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate => {}
    }
}
