//! Interrupt adapter
//!
//! Turns Ctrl+C into a session cancellation. The session itself never
//! installs signal handlers.

use super::cancel::CancelToken;
use tokio::task::JoinHandle;

/// Cancel `token` on the first Ctrl+C
///
/// Must be called from within a tokio runtime. The returned task ends after
/// the first interrupt or when the token is cancelled by other means.
pub fn cancel_on_interrupt(token: CancelToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    tracing::info!("Interrupt received, stopping session");
                    token.cancel();
                }
                Err(e) => tracing::warn!("Failed to listen for Ctrl+C: {}", e),
            },
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_adapter_exits_when_token_cancelled() {
        let token = CancelToken::new();
        let task = cancel_on_interrupt(token.clone());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("adapter should exit")
            .unwrap();
    }
}
