use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    stop: AtomicBool,
    notify: Notify,
}

/// Stop flag shared between the job runner and a running job. Jobs can poll
/// it or await [`Kill::stopped`].
#[derive(Debug, Clone, Default)]
pub struct Kill {
    inner: Arc<Inner>,
}

impl Kill {
    pub fn should_stop(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once `stop` has been called
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.should_stop() {
                return;
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopped_resolves_after_stop() {
        let kill = Kill::default();
        let waiter = {
            let kill = kill.clone();
            tokio::spawn(async move { kill.stopped().await })
        };

        tokio::task::yield_now().await;
        assert!(!kill.should_stop());
        kill.stop();
        waiter.await.unwrap();
        assert!(kill.should_stop());
    }

    #[tokio::test]
    async fn stopped_after_the_fact() {
        let kill = Kill::default();
        kill.stop();
        kill.stopped().await;
    }
}
