use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A background loop that runs `tick` every `every` until cancelled.
///
/// Owned by whichever registry spawned it; `shutdown` cancels the loop and
/// waits for the in-flight tick to finish.
pub struct PeriodicTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn the loop. The first tick fires after one full interval.
    /// Returning `false` from `tick` ends the loop.
    pub fn spawn<F>(name: &'static str, every: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {
                        if !tick() {
                            break;
                        }
                    }
                }
            }
            log::debug!("[TASKS] {} stopped", name);
        });

        log::debug!("[TASKS] {} started (every {:?})", name, every);
        Self { name, token, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            log::warn!("[TASKS] {} ended abnormally: {}", self.name, e);
        }
    }
}
