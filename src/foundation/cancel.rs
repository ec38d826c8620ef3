//! Cooperative cancellation for the async entry points.
//!
//! The typechecker and the NN decoder suspend only on schema fetches; a
//! [`CancellationToken`] passed to those entry points aborts every
//! outstanding fetch and makes the whole operation fail with `Cancelled`.
//! No partial AST escapes a cancelled operation.

use tokio::sync::watch;

/// Receiver half of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: Option<watch::Receiver<bool>>,
}

/// Sender half; dropping it does NOT cancel.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl CancellationToken {
    /// A token that can never fire. Used by callers that do not need
    /// cancellation.
    pub fn none() -> Self {
        Self { rx: None }
    }

    /// Create a connected (canceller, token) pair.
    pub fn new() -> (Canceller, CancellationToken) {
        let (tx, rx) = watch::channel(false);
        (Canceller { tx }, CancellationToken { rx: Some(rx) })
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves when the token is cancelled; pends forever for
    /// [`CancellationToken::none`].
    pub async fn cancelled(&self) {
        match &self.rx {
            None => std::future::pending().await,
            Some(rx) => {
                let mut rx = rx.clone();
                if *rx.borrow() {
                    return;
                }
                // Channel closure without a cancel signal means the
                // canceller went away; treat as never-cancelled.
                while rx.changed().await.is_ok() {
                    if *rx.borrow() {
                        return;
                    }
                }
                std::future::pending().await
            }
        }
    }
}

impl Canceller {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_fires_on_cancel() {
        let (canceller, token) = CancellationToken::new();
        assert!(!token.is_cancelled());
        canceller.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn none_token_never_fires() {
        let token = CancellationToken::none();
        assert!(!token.is_cancelled());
        let timeout =
            tokio::time::timeout(std::time::Duration::from_millis(10), token.cancelled()).await;
        assert!(timeout.is_err());
    }
}
