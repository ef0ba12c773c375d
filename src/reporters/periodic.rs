use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Background task running a callback on a fixed period
///
/// The first run happens right away, the following ones every `period`.
/// A run in progress is never interrupted by `stop`.
pub struct PeriodicTask {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn start<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            'run: loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        break 'run;
                    }
                    _ = interval.tick() => {
                        tick().await;
                    }
                }
            }
            debug!("{} task stopped", name);
        });

        Self { stop_tx, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(self) {
        // The task may already be gone; nothing left to signal then
        let _ = self.stop_tx.send(());
        let _ = self.handle.await;
    }
}
