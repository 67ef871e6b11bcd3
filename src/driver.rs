//! DHT operation driver.
//!
//! Translates experiment instructions into [Overlay] calls, timing every
//! store and find relative to the [ExperimentClock] and recording the result.

use std::{future::Future, time::Duration};

use bytes::Bytes;
use tracing::{debug, error, info};

use crate::{
    clock::ExperimentClock,
    common::Key,
    overlay::{DhtError, Overlay, OverlayError},
    recorder::{OperationKind, OperationRecord, Outcome, TimingRecorder},
    Error, Result,
};

#[derive(Debug)]
pub struct DhtDriver<O> {
    overlay: O,
    clock: ExperimentClock,
    recorder: TimingRecorder,
    /// Bound on each overlay call, none by default.
    timeout: Option<Duration>,
}

impl<O: Overlay> DhtDriver<O> {
    pub fn new(overlay: O, clock: ExperimentClock, recorder: TimingRecorder) -> Self {
        Self {
            overlay,
            clock,
            recorder,
            timeout: None,
        }
    }

    // === Options ===

    /// Give up on an overlay call after `timeout`, recording it as failed.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    // === Getters ===

    pub fn overlay(&self) -> &O {
        &self.overlay
    }

    pub fn clock(&self) -> &ExperimentClock {
        &self.clock
    }

    pub fn recorder(&self) -> &TimingRecorder {
        &self.recorder
    }

    // === Public Methods ===

    /// Store `value_text` (as UTF-8 bytes) under the key `key_hex`.
    ///
    /// Returns [Outcome::Failed] if the overlay reported a [DhtError], any other
    /// overlay failure is returned as [Error::Unexpected] and not recorded.
    pub async fn store(&self, key_hex: &str, value_text: &str) -> Result<Outcome> {
        let key = Key::from_hex(key_hex)?;
        let value = Bytes::copy_from_slice(value_text.as_bytes());

        debug!(?key, size = value.len(), "Storing value");

        self.log_timing(OperationKind::Store, self.overlay.store_value(key, value))
            .await
            .map(|(outcome, _)| outcome)
    }

    /// Find the values stored under the key `key_hex`.
    ///
    /// An empty result is still a completed operation.
    pub async fn find(&self, key_hex: &str) -> Result<Outcome> {
        let key = Key::from_hex(key_hex)?;

        debug!(?key, "Finding values");

        let (outcome, values) = self
            .log_timing(OperationKind::Find, self.overlay.find_values(key))
            .await?;

        if let Some(values) = values {
            debug!(?key, count = values.len(), "Found values");
        }

        Ok(outcome)
    }

    /// Announce this node on the overlay.
    ///
    /// Returns the number of nodes that stored the announcement. Failures are
    /// logged and never returned.
    pub async fn announce(&self) -> Option<usize> {
        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.overlay.store_peer())
                .await
                .unwrap_or_else(|_| Err(DhtError::TimedOut.into())),
            None => self.overlay.store_peer().await,
        };

        match result {
            Ok(Some(nodes)) => {
                info!("Stored this peer on {} nodes", nodes.len());
                Some(nodes.len())
            }
            Ok(None) => None,
            Err(error) => {
                error!(?error, "Error when storing peer");
                None
            }
        }
    }

    // === Private Methods ===

    /// Await `operation`, recording its start offset and duration, or `-1` on a [DhtError].
    async fn log_timing<T>(
        &self,
        kind: OperationKind,
        operation: impl Future<Output = std::result::Result<T, OverlayError>>,
    ) -> Result<(Outcome, Option<T>)> {
        let start = self.clock.elapsed();

        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, operation)
                .await
                .unwrap_or_else(|_| Err(DhtError::TimedOut.into())),
            None => operation.await,
        };

        let (outcome, value) = match result {
            Ok(value) => (
                Outcome::Completed(self.clock.elapsed().saturating_sub(start)),
                Some(value),
            ),
            Err(OverlayError::Dht(error)) => {
                debug!(%kind, ?error, "DHT operation failed");
                (Outcome::Failed, None)
            }
            Err(error) => return Err(Error::Unexpected(error)),
        };

        self.recorder
            .append(&OperationRecord::new(kind, start, outcome))?;

        Ok((outcome, value))
    }
}

#[cfg(test)]
mod test {
    use std::{fs, net::SocketAddr, time::Duration};

    use bytes::Bytes;

    use super::*;
    use crate::overlay::mock::{MockOverlay, Reply};

    const KEY: &str = "aabbccddeeff00112233445566778899aabbccdd";

    fn driver(dir: &tempfile::TempDir, overlay: MockOverlay) -> DhtDriver<MockOverlay> {
        DhtDriver::new(
            overlay,
            ExperimentClock::start(),
            TimingRecorder::new(dir.path().join("dht.log")),
        )
    }

    fn log(driver: &DhtDriver<MockOverlay>) -> String {
        fs::read_to_string(driver.recorder().path()).unwrap_or_default()
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[tokio::test(start_paused = true)]
    async fn store_then_failed_find() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = MockOverlay::new()
            .on_store(Reply::after(ms(500), Ok(())))
            .on_find(Reply::after(
                ms(250),
                Err(DhtError::NoNodesReachable.into()),
            ));
        let driver = driver(&dir, overlay);

        tokio::time::sleep(ms(2000)).await;
        let outcome = driver.store(KEY, "hello").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(ms(500)));

        tokio::time::sleep(ms(500)).await;
        let outcome = driver.find(KEY).await.unwrap();
        assert_eq!(outcome, Outcome::Failed);

        assert_eq!(log(&driver), "2.000 store 0.500\n3.000 find -1\n");

        let stores = driver.overlay().stores.lock().unwrap();
        assert_eq!(stores[0].0, Key::from_hex(KEY).unwrap());
        assert_eq!(stores[0].1, Bytes::from_static(b"hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_find_is_a_success() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = MockOverlay::new().on_find(Reply::after(ms(40), Ok(vec![])));
        let driver = driver(&dir, overlay);

        let outcome = driver.find(KEY).await.unwrap();

        assert_eq!(outcome, Outcome::Completed(ms(40)));
        assert_eq!(log(&driver), "0.000 find 0.040\n");
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_store_is_recorded_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = MockOverlay::new().on_store(Reply::after(
            ms(10),
            Err(DhtError::ValueRejected("too large".into()).into()),
        ));
        let driver = driver(&dir, overlay);

        let outcome = driver.store(KEY, "value").await.unwrap();

        assert!(outcome.is_failed());
        assert_eq!(log(&driver), "0.000 store -1\n");
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_key_is_rejected_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver(&dir, MockOverlay::new());

        for key in ["not hex", "aabb", "", &format!("{KEY}00")] {
            assert!(matches!(
                driver.store(key, "value").await,
                Err(Error::MalformedKey(_))
            ));
            assert!(matches!(driver.find(key).await, Err(Error::MalformedKey(_))));
        }

        assert_eq!(driver.overlay().calls(), 0);
        assert!(!driver.recorder().path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_failure_propagates_unrecorded() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = MockOverlay::new()
            .on_store(Reply::after(ms(5), Err(OverlayError::Shutdown)))
            .on_find(Reply::after(ms(5), Err(OverlayError::Other("boom".into()))));
        let driver = driver(&dir, overlay);

        assert!(matches!(
            driver.store(KEY, "value").await,
            Err(Error::Unexpected(OverlayError::Shutdown))
        ));
        assert!(matches!(
            driver.find(KEY).await,
            Err(Error::Unexpected(OverlayError::Other(_)))
        ));
        assert_eq!(log(&driver), "");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_recorded_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = MockOverlay::new().on_store(Reply::after(ms(10_000), Ok(())));
        let driver = driver(&dir, overlay).with_timeout(Some(ms(1000)));

        tokio::time::sleep(ms(1250)).await;
        let outcome = driver.store(KEY, "slow").await.unwrap();

        assert!(outcome.is_failed());
        assert_eq!(log(&driver), "1.250 store -1\n");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_operations_record_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = MockOverlay::new()
            .on_store(Reply::after(ms(300), Ok(())))
            .on_find(Reply::after(ms(100), Ok(vec![Bytes::from_static(b"v")])));
        let driver = driver(&dir, overlay);

        let (store, find) = futures::join!(driver.store(KEY, "v"), driver.find(KEY));

        assert_eq!(store.unwrap(), Outcome::Completed(ms(300)));
        assert_eq!(find.unwrap(), Outcome::Completed(ms(100)));
        assert_eq!(log(&driver), "0.000 find 0.100\n0.000 store 0.300\n");
    }

    #[tokio::test(start_paused = true)]
    async fn announce_reports_node_count() {
        let dir = tempfile::tempdir().unwrap();
        let nodes: Vec<SocketAddr> = (1..=4)
            .map(|i| SocketAddr::from(([127, 0, 0, 1], 12000 + i)))
            .collect();
        let overlay = MockOverlay::new()
            .on_announce(Reply::after(ms(20), Ok(Some(nodes))))
            .on_announce(Reply::after(ms(20), Ok(None)));
        let driver = driver(&dir, overlay);

        assert_eq!(driver.announce().await, Some(4));
        assert_eq!(driver.announce().await, None);
        assert_eq!(log(&driver), "");
    }

    #[tokio::test(start_paused = true)]
    async fn announce_failures_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = MockOverlay::new()
            .on_announce(Reply::after(ms(20), Err(OverlayError::Other("boom".into()))))
            .on_announce(Reply::after(
                ms(20),
                Err(DhtError::NoNodesReachable.into()),
            ));
        let driver = driver(&dir, overlay);

        assert_eq!(driver.announce().await, None);
        assert_eq!(driver.announce().await, None);
        assert!(!driver.recorder().path().exists());
    }
}
