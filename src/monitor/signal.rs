//! Process signals that stop the monitor loop.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `token` on Ctrl+C, and on SIGTERM where the platform has it.
///
/// The SIGTERM listener is registered before this returns, so a signal sent
/// afterwards always reaches the token instead of killing the process.
pub fn cancel_on_shutdown_signals(token: &CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let term_token = token.clone();
        tokio::spawn(async move {
            if sigterm.recv().await.is_some() {
                info!("🛑 SIGTERM received");
                term_token.cancel();
            }
        });
    }

    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Shutdown signal received");
                ctrl_c_token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    Ok(())
}
