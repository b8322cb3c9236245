//! A background poller thread that periodically refreshes flag definitions.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc},
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{
    definitions_fetcher::DefinitionsFetcher, definitions_store::DefinitionsStore, Error, Result,
};

/// Configuration for [`PollerThread`].
#[derive(Debug, Clone)]
pub struct PollerThreadConfig {
    /// Interval to wait between requests for definitions.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Random duration subtracted from each interval. This helps to avoid multiple server
    /// instances synchronizing and producing spiky network load.
    ///
    /// Defaults to zero.
    pub jitter: Duration,
}

impl PollerThreadConfig {
    /// Default value for [`PollerThreadConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
}

impl Default for PollerThreadConfig {
    fn default() -> PollerThreadConfig {
        PollerThreadConfig {
            interval: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            jitter: Duration::ZERO,
        }
    }
}

/// A definitions poller thread.
///
/// Every interval, the thread fetches flag definitions using [`DefinitionsFetcher`] and publishes
/// them to [`DefinitionsStore`]. Failed fetches are logged and the previous definitions keep being
/// served.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl PollerThread {
    /// Start the poller thread. The first fetch happens one interval after start; callers are
    /// expected to have fetched the initial definitions themselves.
    ///
    /// # Errors
    ///
    /// IO error if the thread failed to start.
    pub fn start(
        fetcher: Arc<DefinitionsFetcher>,
        store: Arc<DefinitionsStore>,
        config: PollerThreadConfig,
    ) -> std::io::Result<PollerThread> {
        // Buffer size of 1 is enough: we `try_send()` the stop command and ignore a full buffer as
        // it means a stop command is already pending.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name("mixpanel-flags-poller".to_owned())
            .spawn(move || loop {
                let timeout = jitter(config.interval, config.jitter);
                match stop_receiver.recv_timeout(timeout) {
                    Err(RecvTimeoutError::Timeout) => {
                        // Timed out. Fetch new definitions below.
                    }
                    Ok(()) => {
                        log::debug!(target: "mixpanel", "poller thread received stop command");
                        return;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        // The handle was dropped, nobody can stop us anymore.
                        log::debug!(target: "mixpanel", "poller thread received disconnected");
                        return;
                    }
                }

                match fetcher.fetch_definitions() {
                    Ok(definitions) => {
                        store.set_definitions(definitions);
                    }
                    Err(err) => {
                        log::warn!(target: "mixpanel",
                                   error:display = err;
                                   "error polling for flag definitions, keeping previous ones");
                    }
                }
            })?;

        Ok(PollerThread {
            join_handle,
            stop_sender,
        })
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited) or the channel buffer is full
        // (a stop command is already pending). Nothing to do in either case.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    ///
    /// # Errors
    ///
    /// [`Error::PollerThreadPanicked`] if the thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        // Send stop signal in case it wasn't sent before.
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    interval.saturating_sub(thread_rng().gen_range(Duration::ZERO..=jitter))
}
