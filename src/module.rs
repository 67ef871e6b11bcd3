//! Experiment module: lifecycle around the driver and the introducer.
//!
//! ```text
//! Uninitialized --on_id_received--> Configured --on_overlay_available--> Active --stop--> Terminated
//! ```
//!
//! DHT operations are only valid while [State::Active].

use std::{fs, mem, path::PathBuf};

use tracing::info;

use crate::{
    clock::ExperimentClock,
    common::{PeerId, Peers},
    config::Config,
    driver::DhtDriver,
    introducer::PeerIntroducer,
    overlay::Overlay,
    recorder::{summarize, KindSummary, OperationKind, Outcome, TimingRecorder},
    Error, Result,
};

/// File the experiment start (Unix seconds) is written to on stop.
pub const START_TIME_FILE: &str = "start_time.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Configured,
    Active,
    Terminated,
}

#[derive(Debug)]
struct Session {
    clock: ExperimentClock,
    recorder: TimingRecorder,
    introducer: PeerIntroducer,
}

#[derive(Debug)]
enum Phase<O> {
    Uninitialized,
    Configured(Session),
    Active {
        session: Session,
        driver: DhtDriver<O>,
    },
    Terminated,
}

/// Manages one node's participation in a DHT experiment.
#[derive(Debug)]
pub struct DhtModule<O> {
    config: Config,
    phase: Phase<O>,
}

impl<O: Overlay> DhtModule<O> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            phase: Phase::Uninitialized,
        }
    }

    // === Getters ===

    pub fn state(&self) -> State {
        match self.phase {
            Phase::Uninitialized => State::Uninitialized,
            Phase::Configured(_) => State::Configured,
            Phase::Active { .. } => State::Active,
            Phase::Terminated => State::Terminated,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The experiment clock, once configured.
    pub fn clock(&self) -> Option<ExperimentClock> {
        self.session().map(|session| session.clock)
    }

    pub fn my_id(&self) -> Option<PeerId> {
        self.session().map(|session| session.introducer.my_id())
    }

    pub fn recorder(&self) -> Option<&TimingRecorder> {
        self.session().map(|session| &session.recorder)
    }

    pub fn driver(&self) -> Option<&DhtDriver<O>> {
        match &self.phase {
            Phase::Active { driver, .. } => Some(driver),
            _ => None,
        }
    }

    // === Lifecycle ===

    /// This node learned its id and the cohort. Starts the experiment clock.
    pub fn on_id_received(&mut self, my_id: PeerId, peers: Peers) -> Result<()> {
        if !matches!(self.phase, Phase::Uninitialized) {
            return Err(self.invalid_transition("receive an id"));
        }

        fs::create_dir_all(&self.config.output_dir).map_err(|source| Error::File {
            path: self.config.output_dir.clone(),
            source,
        })?;

        let session = Session {
            clock: ExperimentClock::start(),
            recorder: TimingRecorder::new(self.config.log_path()),
            introducer: PeerIntroducer::new(my_id, peers),
        };

        info!(
            my_id,
            peers = session.introducer.peers().len(),
            log = ?session.recorder.path(),
            "DHT module configured"
        );

        self.phase = Phase::Configured(session);

        Ok(())
    }

    /// [Self::on_id_received] with the id and cohort of the [Config].
    pub fn configure(&mut self) -> Result<()> {
        let my_id = self.config.my_id()?;
        let peers = self.config.peers()?;

        self.on_id_received(my_id, peers)
    }

    /// The overlay is up, DHT operations become available.
    pub fn on_overlay_available(&mut self, overlay: O) -> Result<()> {
        match mem::replace(&mut self.phase, Phase::Terminated) {
            Phase::Configured(session) => {
                let driver = DhtDriver::new(overlay, session.clock, session.recorder.clone())
                    .with_timeout(self.config.operation_timeout());

                info!(my_id = session.introducer.my_id(), "DHT module active");

                self.phase = Phase::Active { session, driver };
                Ok(())
            }
            phase => {
                self.phase = phase;
                Err(self.invalid_transition("attach an overlay"))
            }
        }
    }

    /// Stop the experiment.
    ///
    /// Writes [START_TIME_FILE] and returns a per-operation summary of the
    /// records this session wrote. Records left in the log by earlier runs are
    /// not counted.
    pub fn stop(&mut self) -> Result<Vec<(OperationKind, KindSummary)>> {
        let session = match mem::replace(&mut self.phase, Phase::Terminated) {
            Phase::Configured(session) | Phase::Active { session, .. } => session,
            phase => {
                self.phase = phase;
                return Err(self.invalid_transition("stop"));
            }
        };

        let start_time_path = self.start_time_path();
        fs::write(
            &start_time_path,
            format!("{:.6}", session.clock.unix_start()),
        )
        .map_err(|source| Error::File {
            path: start_time_path,
            source,
        })?;

        let summary = summarize(&session.recorder.written());
        for (kind, stats) in &summary {
            info!(
                %kind,
                count = stats.count,
                failures = stats.failures,
                mean = ?stats.mean(),
                "Operation summary"
            );
        }

        info!("DHT module terminated");

        Ok(summary)
    }

    // === Experiment commands ===

    /// Walk to every other participant. Never fails on unreachable peers.
    pub fn introduce_peers_dht(&self) -> Result<usize> {
        let (session, driver) = self.active()?;

        Ok(session.introducer.introduce(driver.overlay()))
    }

    pub async fn store(&self, key_hex: &str, value_text: &str) -> Result<Outcome> {
        let (_, driver) = self.active()?;

        driver.store(key_hex, value_text).await
    }

    pub async fn find(&self, key_hex: &str) -> Result<Outcome> {
        let (_, driver) = self.active()?;

        driver.find(key_hex).await
    }

    pub async fn do_dht_announce(&self) -> Result<Option<usize>> {
        let (_, driver) = self.active()?;

        Ok(driver.announce().await)
    }

    // === Private Methods ===

    fn session(&self) -> Option<&Session> {
        match &self.phase {
            Phase::Configured(session) | Phase::Active { session, .. } => Some(session),
            _ => None,
        }
    }

    fn active(&self) -> Result<(&Session, &DhtDriver<O>)> {
        match &self.phase {
            Phase::Active { session, driver } => Ok((session, driver)),
            _ => Err(Error::NotReady(self.state())),
        }
    }

    fn invalid_transition(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            from: self.state(),
            action,
        }
    }

    fn start_time_path(&self) -> PathBuf {
        self.config.output_dir.join(START_TIME_FILE)
    }
}

#[cfg(test)]
mod test {
    use std::{net::SocketAddr, time::Duration};

    use super::*;
    use crate::{
        config::Config,
        overlay::{
            mock::{MockOverlay, Reply},
            DhtError,
        },
    };

    const KEY: &str = "aabbccddeeff00112233445566778899aabbccdd";

    fn module(dir: &tempfile::TempDir) -> DhtModule<MockOverlay> {
        let config = Config {
            output_dir: dir.path().to_path_buf(),
            ..Config::local_cohort(1, 3)
        };
        DhtModule::new(config)
    }

    #[tokio::test(start_paused = true)]
    async fn operations_need_an_active_module() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = module(&dir);

        assert!(matches!(
            module.store(KEY, "v").await,
            Err(Error::NotReady(State::Uninitialized))
        ));

        module.configure().unwrap();
        assert_eq!(module.state(), State::Configured);

        assert!(matches!(
            module.find(KEY).await,
            Err(Error::NotReady(State::Configured))
        ));
        assert!(matches!(
            module.do_dht_announce().await,
            Err(Error::NotReady(State::Configured))
        ));
        assert!(matches!(
            module.introduce_peers_dht(),
            Err(Error::NotReady(State::Configured))
        ));

        module.on_overlay_available(MockOverlay::new()).unwrap();
        assert_eq!(module.state(), State::Active);
        assert_eq!(module.introduce_peers_dht().unwrap(), 2);

        module.stop().unwrap();
        assert!(matches!(
            module.store(KEY, "v").await,
            Err(Error::NotReady(State::Terminated))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_is_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = module(&dir);

        assert!(matches!(
            module.on_overlay_available(MockOverlay::new()),
            Err(Error::InvalidTransition {
                from: State::Uninitialized,
                ..
            })
        ));
        assert!(module.stop().is_err());
        assert_eq!(module.state(), State::Uninitialized);

        module.configure().unwrap();
        assert!(module.configure().is_err());
        assert_eq!(module.state(), State::Configured);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_writes_start_time_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = module(&dir);
        module.configure().unwrap();

        let overlay = MockOverlay::new()
            .on_store(Reply::after(Duration::from_millis(100), Ok(())))
            .on_find(Reply::after(
                Duration::from_millis(100),
                Err(DhtError::NoNodesReachable.into()),
            ))
            .on_announce(Reply::after(
                Duration::from_millis(5),
                Ok(Some(vec![SocketAddr::from(([127, 0, 0, 1], 12002))])),
            ));
        module.on_overlay_available(overlay).unwrap();

        module.store(KEY, "v").await.unwrap();
        module.find(KEY).await.unwrap();
        assert_eq!(module.do_dht_announce().await.unwrap(), Some(1));

        assert_eq!(module.recorder().unwrap().path(), module.config().log_path());

        let clock = module.clock().unwrap();
        let summary = module.stop().unwrap();

        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].0, OperationKind::Store);
        assert_eq!(summary[0].1.mean(), Some(Duration::from_millis(100)));
        assert_eq!(summary[1].1.failures, 1);

        let start_time = fs::read_to_string(dir.path().join(START_TIME_FILE)).unwrap();
        let start_time: f64 = start_time.parse().unwrap();
        assert!((start_time - clock.unix_start()).abs() < 1e-5);
    }

    #[tokio::test(start_paused = true)]
    async fn summary_skips_records_of_earlier_runs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dht.log"), "1.000 store 0.500\n2.000 find -1\n").unwrap();

        let mut module = module(&dir);
        module.configure().unwrap();
        module
            .on_overlay_available(
                MockOverlay::new().on_find(Reply::after(Duration::from_millis(250), Ok(vec![]))),
            )
            .unwrap();

        module.find(KEY).await.unwrap();

        let summary = module.stop().unwrap();

        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].0, OperationKind::Find);
        assert_eq!(summary[0].1.count, 1);
        assert_eq!(summary[0].1.failures, 0);
        assert_eq!(summary[0].1.mean(), Some(Duration::from_millis(250)));

        let log = fs::read_to_string(dir.path().join("dht.log")).unwrap();
        assert_eq!(log.lines().count(), 3);
    }
}
