//! Blocking adapter over a dedicated tokio runtime.
//!
//! Container lifecycle and schema operations are async; the harness exposes
//! them behind a blocking façade. The bridge never drives a future on the
//! caller's own runtime: the future is run to completion on a helper thread
//! blocked on the bridge's private runtime. Calling [`BlockingBridge::run`]
//! from inside a single-threaded async scheduler therefore blocks that one
//! caller thread but cannot deadlock it against its own executor.

use std::future::Future;

use tokio::runtime::{Handle, Runtime};

/// Dedicated execution resource for bridging async operations to blocking
/// calls. One bridge is owned per harness instance.
pub(crate) struct BlockingBridge {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl BlockingBridge {
    /// Create the bridge runtime. A single worker thread is enough; the
    /// bridged operations are sequential by design.
    pub(crate) fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("pgharness-bridge")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Run `fut` to completion on the bridge runtime, blocking the calling
    /// thread until it resolves.
    pub(crate) fn run<F>(&self, fut: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        let handle = &self.handle;
        std::thread::scope(|scope| {
            let joined = scope.spawn(move || handle.block_on(fut)).join();
            match joined {
                Ok(output) => output,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }
}

impl Drop for BlockingBridge {
    fn drop(&mut self) {
        // shutdown_background is safe even when the bridge itself is dropped
        // from inside another async context.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_future_to_completion() {
        let bridge = BlockingBridge::new().expect("bridge runtime");
        let out = bridge.run(async { 2 + 2 });
        assert_eq!(out, 4);
    }

    #[test]
    fn supports_timers_and_io() {
        let bridge = BlockingBridge::new().expect("bridge runtime");
        bridge.run(async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        });
    }

    #[tokio::test]
    async fn safe_to_call_from_inside_a_runtime() {
        // The bridged future runs on the bridge's own runtime, so blocking
        // here cannot deadlock the test executor.
        let bridge = BlockingBridge::new().expect("bridge runtime");
        let out = tokio::task::spawn_blocking(move || bridge.run(async { "ok" }))
            .await
            .expect("join");
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn drop_inside_async_context_does_not_panic() {
        let bridge = BlockingBridge::new().expect("bridge runtime");
        drop(bridge);
    }
}
