//! Utility functions.

use tracing::info;

/// Resolves on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

/// Parse `key=odds` pairs as given on the command line.
pub fn parse_odds_pair(raw: &str) -> Result<(String, rust_decimal::Decimal), String> {
    let (key, odds) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=ODDS, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing outcome key in '{}'", raw));
    }
    let odds = odds
        .trim()
        .parse()
        .map_err(|e| format!("invalid odds in '{}': {}", raw, e))?;
    Ok((key.to_string(), odds))
}
