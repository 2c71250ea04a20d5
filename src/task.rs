use std::future::Future;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A spawned loop that can be stopped deterministically.
///
/// `stop` signals the loop and waits for it to exit, so once it returns
/// no further iteration of the loop can run.
pub struct BackgroundTask {
    name: &'static str,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = broadcast::channel(1);
        let handle = tokio::spawn(body(rx));
        debug!("{} task started", name);
        Self { name, shutdown, handle }
    }

    pub async fn stop(self) {
        if self.shutdown.send(()).is_err() {
            debug!("{} task already exited", self.name);
        }
        if let Err(e) = self.handle.await {
            error!("{} task ended abnormally: {}", self.name, e);
        }
        debug!("{} task stopped", self.name);
    }
}
