//! The polling loop.
//!
//! One cycle authenticates, fetches, parses, diffs and reports. Cycles never
//! overlap and each one owns at most one session, closed before the cycle
//! ends. Only the previous and current snapshots are kept.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use attendance_core_types::{Credentials, RunMode, Snapshot, Strategy};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::change::diff;
use crate::config::{ConfigError, RetryConfig, RunConfig};
use crate::errors::{CycleError, FetchError};
use crate::extractor::Extractor;
use crate::reporter::{ReportEvent, Reporter};
use crate::session::{FetchTarget, RawPage, SessionStrategy};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Authenticating,
    Fetching,
    Parsing,
    Diffing,
    Reporting,
    Sleeping,
    Stopped,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MonitorState::Idle => "idle",
            MonitorState::Authenticating => "authenticating",
            MonitorState::Fetching => "fetching",
            MonitorState::Parsing => "parsing",
            MonitorState::Diffing => "diffing",
            MonitorState::Reporting => "reporting",
            MonitorState::Sleeping => "sleeping",
            MonitorState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// `once` mode finished its single cycle.
    Completed,
    MaxChecks,
    Signal,
    Fatal(CycleError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorOutcome {
    pub cycles: u32,
    pub successes: u32,
    pub failures: u32,
    pub last_error: Option<CycleError>,
    pub stop: StopReason,
}

impl MonitorOutcome {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match &self.stop {
            StopReason::Signal => 130,
            StopReason::Fatal(_) => 2,
            StopReason::MaxChecks => 0,
            StopReason::Completed if self.last_error.is_some() => 1,
            StopReason::Completed => 0,
        }
    }
}

/// Schedule and retry settings taken from the run configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorSettings {
    pub mode: RunMode,
    pub interval: Duration,
    pub max_checks: Option<u32>,
    pub retry: RetryConfig,
}

impl From<&RunConfig> for MonitorSettings {
    fn from(config: &RunConfig) -> Self {
        Self {
            mode: config.mode,
            interval: config.interval(),
            max_checks: config.max_checks,
            retry: config.retry.clone(),
        }
    }
}

pub struct Monitor {
    strategy: Arc<dyn SessionStrategy>,
    reporter: Box<dyn Reporter>,
    credentials: Credentials,
    extractor: Extractor,
    target: FetchTarget,
    settings: MonitorSettings,
    last_snapshot: Option<Snapshot>,
    state: MonitorState,
    parse_failures: u32,
    shutdown: CancellationToken,
}

impl Monitor {
    pub fn new(
        config: &RunConfig,
        strategy: Arc<dyn SessionStrategy>,
        reporter: Box<dyn Reporter>,
        credentials: Credentials,
    ) -> Result<Self, ConfigError> {
        // The DataTables endpoint needs a plain HTTP session.
        let target = match config.portal.data_url()? {
            Some(url) if strategy.kind() == Strategy::Lightweight => FetchTarget::DataTable(url),
            _ => FetchTarget::Page(config.portal.attendance_url()?),
        };
        Ok(Self {
            strategy,
            reporter,
            credentials,
            extractor: Extractor::new(config.portal.table_selectors.clone()),
            target,
            settings: MonitorSettings::from(config),
            last_snapshot: None,
            state: MonitorState::Idle,
            parse_failures: 0,
            shutdown: CancellationToken::new(),
        })
    }

    /// Seeds the "last known" snapshot, e.g. from a test fixture.
    pub fn with_previous_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.last_snapshot = Some(snapshot);
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn target(&self) -> &FetchTarget {
        &self.target
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last_snapshot.as_ref()
    }

    fn transition(&mut self, next: MonitorState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "monitor state");
            self.state = next;
        }
    }

    pub async fn run(&mut self) -> MonitorOutcome {
        let mut outcome = MonitorOutcome {
            cycles: 0,
            successes: 0,
            failures: 0,
            last_error: None,
            stop: StopReason::Completed,
        };

        info!(
            mode = %self.settings.mode,
            strategy = %self.strategy.kind(),
            interval_secs = self.settings.interval.as_secs(),
            max_checks = ?self.settings.max_checks,
            target = %self.target,
            "monitor starting"
        );

        if let Err(err) = self.strategy.preflight().await {
            error!(kind = err.kind(), %err, "driver preflight failed");
            self.emit(ReportEvent::Failure {
                cycle: 0,
                error: err.clone(),
                fatal: true,
            });
            outcome.last_error = Some(err.clone());
            outcome.stop = StopReason::Fatal(err);
            self.transition(MonitorState::Stopped);
            return outcome;
        }

        loop {
            if self.shutdown.is_cancelled() {
                outcome.stop = StopReason::Signal;
                break;
            }

            outcome.cycles += 1;
            let cycle = outcome.cycles;
            let started = Instant::now();

            match self.run_cycle(cycle).await {
                Ok(()) => {
                    outcome.successes += 1;
                    outcome.last_error = None;
                }
                Err(err) => {
                    outcome.failures += 1;
                    let fatal = err.is_fatal();
                    if fatal {
                        error!(cycle, kind = err.kind(), %err, "cycle failed fatally");
                    } else {
                        warn!(cycle, kind = err.kind(), %err, "cycle failed");
                    }
                    self.emit(ReportEvent::Failure {
                        cycle,
                        error: err.clone(),
                        fatal,
                    });
                    outcome.last_error = Some(err.clone());
                    if fatal {
                        outcome.stop = StopReason::Fatal(err);
                        break;
                    }
                }
            }

            if self.shutdown.is_cancelled() {
                outcome.stop = StopReason::Signal;
                break;
            }
            if self.settings.mode == RunMode::Once {
                outcome.stop = StopReason::Completed;
                break;
            }
            if self
                .settings
                .max_checks
                .map(|max| cycle >= max)
                .unwrap_or(false)
            {
                outcome.stop = StopReason::MaxChecks;
                break;
            }

            self.transition(MonitorState::Sleeping);
            let wake = started + self.settings.interval;
            debug!(
                cycle,
                next_in = %humantime::format_duration(wake.saturating_duration_since(Instant::now())),
                "sleeping until next cycle"
            );
            tokio::select! {
                _ = sleep_until(wake) => {}
                _ = self.shutdown.cancelled() => {
                    outcome.stop = StopReason::Signal;
                    break;
                }
            }
        }

        self.transition(MonitorState::Stopped);
        info!(
            cycles = outcome.cycles,
            successes = outcome.successes,
            failures = outcome.failures,
            stop = ?outcome.stop,
            "monitor stopped"
        );
        outcome
    }

    /// Runs a single authenticate → report pass.
    pub async fn run_cycle(&mut self, cycle: u32) -> Result<(), CycleError> {
        self.strategy.preflight().await?;

        let page = self.acquire(cycle).await?;

        self.transition(MonitorState::Parsing);
        let snapshot = match self.extractor.extract(&page) {
            Ok(snapshot) => {
                self.parse_failures = 0;
                snapshot
            }
            Err(err) => {
                self.parse_failures += 1;
                if self.parse_failures >= self.settings.retry.parse_failure_limit {
                    return Err(CycleError::RepeatedParse {
                        source: err,
                        consecutive: self.parse_failures,
                    });
                }
                return Err(err.into());
            }
        };

        self.transition(MonitorState::Diffing);
        let changes = diff(self.last_snapshot.as_ref(), &snapshot);

        if changes.is_empty() {
            info!(cycle, records = snapshot.len(), "no attendance changes");
        } else {
            self.transition(MonitorState::Reporting);
            info!(
                cycle,
                records = snapshot.len(),
                changes = changes.change_count(),
                initial = changes.is_initial(),
                "attendance snapshot"
            );
            self.emit(ReportEvent::Snapshot {
                cycle,
                snapshot: snapshot.clone(),
                changes,
            });
        }

        self.last_snapshot = Some(snapshot);
        Ok(())
    }

    /// Authenticates and fetches, retrying transient failures and allowing
    /// one re-authentication after an expired session.
    async fn acquire(&mut self, cycle: u32) -> Result<RawPage, CycleError> {
        let mut transient_retries = 0;
        let mut reauthenticated = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match self.attempt(cycle, attempt).await {
                Ok(page) => return Ok(page),
                Err(err) => err,
            };

            if err == CycleError::Fetch(FetchError::AuthenticationExpired) && !reauthenticated {
                reauthenticated = true;
                info!(cycle, attempt, "session expired; re-authenticating");
                continue;
            }

            if err.is_transient() && transient_retries < self.settings.retry.max_transient_retries {
                transient_retries += 1;
                warn!(
                    cycle,
                    attempt,
                    kind = err.kind(),
                    %err,
                    backoff_ms = self.settings.retry.backoff_ms,
                    "transient failure; retrying"
                );
                tokio::select! {
                    _ = sleep(self.settings.retry.backoff()) => {}
                    _ = self.shutdown.cancelled() => return Err(err),
                }
                continue;
            }

            return Err(err);
        }
    }

    async fn attempt(&mut self, cycle: u32, attempt: u32) -> Result<RawPage, CycleError> {
        self.transition(MonitorState::Authenticating);
        let mut session = self.strategy.authenticate(&self.credentials).await?;

        self.transition(MonitorState::Fetching);
        debug!(cycle, attempt, session = %session.id(), target = %self.target, "fetching attendance");
        let fetched = session.fetch(&self.target).await;
        session.close().await;

        let page = fetched?;
        debug!(cycle, url = %page.url, bytes = page.body.len(), "fetched attendance");
        Ok(page)
    }

    fn emit(&mut self, event: ReportEvent) {
        if let Err(err) = self.reporter.report(&event) {
            warn!(%err, "reporter failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeSet;
    use crate::errors::{AuthError, DriverError, ParseError};
    use crate::reporter::ReporterError;
    use crate::session::AuthenticatedSession;
    use async_trait::async_trait;
    use attendance_core_types::SessionId;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TABLE_A: &str = "<table><tr><th>Subject</th><th>Status</th></tr><tr><td>Math</td><td>Present</td></tr><tr><td>Art</td><td>Absent</td></tr></table>";
    const TABLE_B: &str = "<table><tr><th>Subject</th><th>Status</th></tr><tr><td>Math</td><td>Present</td></tr><tr><td>Art</td><td>Excused</td></tr></table>";

    #[derive(Clone)]
    enum Step {
        AuthFails(CycleError),
        Fetch(Result<&'static str, FetchError>),
    }

    /// Plays back one step per authentication attempt; the last step repeats.
    #[derive(Default)]
    struct ScriptedStrategy {
        steps: Mutex<VecDeque<Step>>,
        preflight: Mutex<Option<CycleError>>,
        authentications: AtomicUsize,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedStrategy {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                ..Self::default()
            })
        }

        fn next_step(&self) -> Step {
            let mut steps = self.steps.lock();
            if steps.len() > 1 {
                steps.pop_front().unwrap()
            } else {
                steps.front().cloned().unwrap()
            }
        }

        fn authentications(&self) -> usize {
            self.authentications.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionStrategy for ScriptedStrategy {
        fn kind(&self) -> Strategy {
            Strategy::Lightweight
        }

        async fn preflight(&self) -> Result<(), CycleError> {
            match self.preflight.lock().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn authenticate(
            &self,
            _credentials: &Credentials,
        ) -> Result<Box<dyn AuthenticatedSession>, CycleError> {
            self.authentications.fetch_add(1, Ordering::SeqCst);
            match self.next_step() {
                Step::AuthFails(err) => Err(err),
                Step::Fetch(result) => Ok(Box::new(ScriptedSession {
                    id: SessionId::new(),
                    result: Some(result),
                    closes: self.closes.clone(),
                })),
            }
        }
    }

    struct ScriptedSession {
        id: SessionId,
        result: Option<Result<&'static str, FetchError>>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AuthenticatedSession for ScriptedSession {
        fn id(&self) -> &SessionId {
            &self.id
        }

        async fn fetch(&mut self, target: &FetchTarget) -> Result<RawPage, FetchError> {
            let body = self.result.take().expect("one fetch per session")?;
            Ok(RawPage::html(target.url().as_str(), body))
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<ReportEvent>>>);

    impl Reporter for Recorder {
        fn report(&mut self, event: &ReportEvent) -> Result<(), ReporterError> {
            self.0.lock().push(event.clone());
            Ok(())
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<ReportEvent> {
            self.0.lock().clone()
        }
    }

    fn config(mode: RunMode, interval_secs: u64, max_checks: Option<u32>) -> RunConfig {
        RunConfig {
            mode,
            interval_secs,
            max_checks,
            ..RunConfig::default()
        }
    }

    fn monitor(config: &RunConfig, strategy: Arc<ScriptedStrategy>, recorder: &Recorder) -> Monitor {
        Monitor::new(
            config,
            strategy,
            Box::new(recorder.clone()),
            Credentials::new("222534", "secret"),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn three_checks_run_even_when_every_attempt_fails() {
        let strategy = ScriptedStrategy::new(vec![Step::AuthFails(AuthError::Timeout.into())]);
        let recorder = Recorder::default();
        let cfg = config(RunMode::Monitor, 5, Some(3));
        let started = Instant::now();

        let outcome = monitor(&cfg, strategy.clone(), &recorder).run().await;

        assert_eq!(outcome.cycles, 3);
        assert_eq!(outcome.failures, 3);
        assert_eq!(outcome.stop, StopReason::MaxChecks);
        assert_eq!(outcome.exit_code(), 0);
        // One attempt plus one retry per cycle.
        assert_eq!(strategy.authentications(), 6);
        assert_eq!(recorder.events().len(), 3);
        // Cycles start 5s apart; the last one spends 2s in backoff.
        assert_eq!(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_reauthenticates_once_per_cycle() {
        let strategy =
            ScriptedStrategy::new(vec![Step::Fetch(Err(FetchError::AuthenticationExpired))]);
        let recorder = Recorder::default();
        let cfg = config(RunMode::Once, 300, None);

        let outcome = monitor(&cfg, strategy.clone(), &recorder).run().await;

        assert_eq!(strategy.authentications(), 2);
        assert_eq!(strategy.closes.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(
            outcome.last_error,
            Some(CycleError::Fetch(FetchError::AuthenticationExpired))
        );
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reauthentication_recovers_the_cycle() {
        let strategy = ScriptedStrategy::new(vec![
            Step::Fetch(Err(FetchError::AuthenticationExpired)),
            Step::Fetch(Ok(TABLE_A)),
        ]);
        let recorder = Recorder::default();
        let mut monitor = monitor(&config(RunMode::Once, 300, None), strategy.clone(), &recorder);

        let outcome = monitor.run().await;

        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(strategy.authentications(), 2);
        assert_eq!(monitor.last_snapshot().map(Snapshot::len), Some(2));
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_credentials_stop_the_loop() {
        let strategy =
            ScriptedStrategy::new(vec![Step::AuthFails(AuthError::InvalidCredentials.into())]);
        let recorder = Recorder::default();
        let cfg = config(RunMode::Monitor, 5, Some(5));

        let outcome = monitor(&cfg, strategy.clone(), &recorder).run().await;

        assert_eq!(outcome.cycles, 1);
        assert_eq!(strategy.authentications(), 1);
        assert_eq!(outcome.exit_code(), 2);
        assert!(matches!(
            recorder.events().as_slice(),
            [ReportEvent::Failure { fatal: true, .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn javascript_required_is_fatal_without_retry() {
        let strategy = ScriptedStrategy::new(vec![Step::Fetch(Err(FetchError::JavaScriptRequired))]);
        let recorder = Recorder::default();

        let outcome = monitor(&config(RunMode::Monitor, 5, None), strategy.clone(), &recorder)
            .run()
            .await;

        assert_eq!(strategy.authentications(), 1);
        assert!(matches!(outcome.stop, StopReason::Fatal(ref err) if err.kind() == "javascript_required"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_driver_fails_before_first_cycle() {
        let strategy = ScriptedStrategy::new(vec![Step::Fetch(Ok(TABLE_A))]);
        *strategy.preflight.lock() = Some(DriverError::NotFound { searched: vec![] }.into());
        let recorder = Recorder::default();

        let outcome = monitor(&config(RunMode::Monitor, 5, None), strategy.clone(), &recorder)
            .run()
            .await;

        assert_eq!(outcome.cycles, 0);
        assert_eq!(strategy.authentications(), 0);
        assert_eq!(outcome.exit_code(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_parse_failures_become_fatal() {
        let strategy = ScriptedStrategy::new(vec![Step::Fetch(Ok("<p>maintenance</p>"))]);
        let recorder = Recorder::default();

        let outcome = monitor(&config(RunMode::Monitor, 5, Some(5)), strategy, &recorder)
            .run()
            .await;

        assert_eq!(outcome.cycles, 2);
        assert!(matches!(
            outcome.stop,
            StopReason::Fatal(CycleError::RepeatedParse { consecutive: 2, .. })
        ));
        let events = recorder.events();
        assert!(matches!(
            &events[0],
            ReportEvent::Failure { error: CycleError::Parse(ParseError::StructureMissing { .. }), fatal: false, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_baseline_then_only_changes() {
        let strategy = ScriptedStrategy::new(vec![
            Step::Fetch(Ok(TABLE_A)),
            Step::Fetch(Ok(TABLE_A)),
            Step::Fetch(Ok(TABLE_B)),
        ]);
        let recorder = Recorder::default();

        let outcome = monitor(&config(RunMode::Monitor, 60, Some(3)), strategy, &recorder)
            .run()
            .await;

        assert_eq!(outcome.successes, 3);
        let events = recorder.events();
        assert_eq!(events.len(), 2);
        match &events[0] {
            ReportEvent::Snapshot { cycle: 1, changes, .. } => assert!(changes.is_initial()),
            other => panic!("unexpected {other:?}"),
        }
        match &events[1] {
            ReportEvent::Snapshot {
                cycle: 3,
                changes: ChangeSet::Changes { updated, added, removed },
                ..
            } => {
                assert_eq!(updated.len(), 1);
                assert!(added.is_empty() && removed.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn injected_snapshot_suppresses_baseline() {
        let previous = Extractor::default().extract_html(TABLE_A).unwrap();
        let strategy = ScriptedStrategy::new(vec![Step::Fetch(Ok(TABLE_A))]);
        let recorder = Recorder::default();

        let outcome = monitor(&config(RunMode::Once, 300, None), strategy, &recorder)
            .with_previous_snapshot(previous)
            .run()
            .await;

        assert_eq!(outcome.exit_code(), 0);
        assert!(recorder.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_signal_interrupts_sleep() {
        let strategy = ScriptedStrategy::new(vec![Step::Fetch(Ok(TABLE_A))]);
        let recorder = Recorder::default();
        let mut monitor = monitor(&config(RunMode::Monitor, 300, None), strategy, &recorder);
        let token = monitor.shutdown_token();
        tokio::spawn(async move {
            sleep(Duration::from_secs(10)).await;
            token.cancel();
        });

        let outcome = monitor.run().await;

        assert_eq!(outcome.cycles, 1);
        assert_eq!(outcome.stop, StopReason::Signal);
        assert_eq!(outcome.exit_code(), 130);
    }
}
