use std::future::Future;

use tokio::sync::watch;

/// One-shot termination signal shared between a call and the task running it.
///
/// `shutdown` may be called any number of times; `wait` futures resolve as soon as the
/// signal is raised, including when it was raised before they were created.
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender,
        }
    }

    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        async move {
            let _ = receiver.wait_for(|terminated| *terminated).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_after_shutdown_resolves() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let shutdown = Shutdown::new();
        shutdown.shutdown();
        shutdown.shutdown();
        runtime.block_on(shutdown.wait());
    }

    #[test]
    fn test_wait_wakes_on_shutdown() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let shutdown = std::sync::Arc::new(Shutdown::new());
        let wait = shutdown.wait();
        let handle = runtime.spawn(wait);
        shutdown.shutdown();
        runtime.block_on(handle).unwrap();
    }
}
