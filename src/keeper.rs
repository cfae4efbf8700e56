//! Session supervision
//!
//! [`KeeperHandle`] is the control surface: it accepts credentials, spawns
//! the supervision task, and performs logout. The supervision task itself is
//! an infinite cycle: probe the link type, query portal status, re-login when
//! the portal reports a logged-out state, sleep, repeat. Every per-iteration
//! failure is narrated through the registered sink and absorbed; only
//! cancellation stops the loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{KeeperError, PortalError};
use crate::failover::FailoverState;
use crate::models::{Credentials, Event, LogoutResult};
use crate::netlink::{ConnectionType, LinkProbe};
use crate::portal::Portal;

/// Pause between supervision cycles.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Minimum spacing between accepted `start` calls.
const START_DEBOUNCE: Duration = Duration::from_millis(3000);

pub type EventSink = Box<dyn Fn(Event) + Send + Sync>;

type SinkSlot = Arc<Mutex<Option<EventSink>>>;

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Control surface over the single supervision task.
///
/// At most one task runs at a time; an accepted `start` cancels the previous
/// task before spawning its replacement. Cancellation is a signal, not a
/// join: a request already in flight on the old task is allowed to unwind on
/// its own.
pub struct KeeperHandle {
    portal: Arc<dyn Portal>,
    probe: Arc<dyn LinkProbe>,
    failover: Arc<FailoverState>,
    sink: SinkSlot,
    task: Mutex<Option<RunningTask>>,
    last_start: Mutex<Option<Instant>>,
}

impl KeeperHandle {
    pub fn new(
        portal: Arc<dyn Portal>,
        probe: Arc<dyn LinkProbe>,
        failover: Arc<FailoverState>,
    ) -> Self {
        Self {
            portal,
            probe,
            failover,
            sink: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
            last_start: Mutex::new(None),
        }
    }

    /// Install the event sink, replacing any previous one.
    pub fn register_callback(&self, sink: impl Fn(Event) + Send + Sync + 'static) {
        *self.sink.lock().unwrap() = Some(Box::new(sink));
    }

    /// Begin supervising a session with the given credentials.
    ///
    /// Rejected with [`KeeperError::TooFrequent`] when called again within
    /// 3 seconds of the previous accepted start; the running task is left
    /// untouched in that case.
    pub fn start(&self, credentials: Credentials) -> Result<(), KeeperError> {
        let mut last_start = self.last_start.lock().unwrap();
        if let Some(at) = *last_start {
            if at.elapsed() < START_DEBOUNCE {
                emit(&self.sink, Event::Message(KeeperError::TooFrequent.to_string()));
                return Err(KeeperError::TooFrequent);
            }
        }
        *last_start = Some(Instant::now());
        drop(last_start);

        tracing::info!("starting supervision for {}", credentials.username);
        self.replace_task(credentials);
        Ok(())
    }

    /// Cancel the running supervision task, if any.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.token.cancel();
        }
    }

    /// Cancel supervision and log the session out at the portal.
    ///
    /// A failure is narrated through the sink and surfaces only as `None`.
    pub async fn logout(&self) -> Option<LogoutResult> {
        self.stop();
        match self.portal.logout().await {
            Ok(result) => {
                tracing::info!("logged out: {result}");
                emit(&self.sink, Event::Message(result.to_string()));
                Some(result)
            }
            Err(err) => {
                tracing::error!("logout failed: {err}");
                emit(&self.sink, Event::Message(err.to_string()));
                None
            }
        }
    }

    /// Whether a supervision task is currently alive.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    fn replace_task(&self, credentials: Credentials) {
        // the previous task gets its cancel signal before the replacement
        // is spawned or installed; the signal is not awaited
        if let Some(previous) = self.task.lock().unwrap().take() {
            previous.token.cancel();
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(supervise(
            self.portal.clone(),
            self.probe.clone(),
            self.failover.clone(),
            self.sink.clone(),
            credentials,
            token.clone(),
        ));
        *self.task.lock().unwrap() = Some(RunningTask { token, handle });
    }
}

impl Drop for KeeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The supervision loop. Runs until the token is cancelled; cancellation is
/// observed at every suspension point and no event is emitted afterwards.
async fn supervise(
    portal: Arc<dyn Portal>,
    probe: Arc<dyn LinkProbe>,
    failover: Arc<FailoverState>,
    sink: SinkSlot,
    credentials: Credentials,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = cycle(&*portal, &*probe, &failover, &sink, &credentials) => {}
        }
    }
    tracing::debug!("supervision task cancelled");
}

/// One supervision cycle, ending in the unconditional poll sleep.
async fn cycle(
    portal: &dyn Portal,
    probe: &dyn LinkProbe,
    failover: &FailoverState,
    sink: &SinkSlot,
    credentials: &Credentials,
) {
    if probe.connection_type() != ConnectionType::Wifi {
        emit(sink, Event::Message("non-wifi network".into()));
        sleep(POLL_INTERVAL).await;
        return;
    }

    match portal.query_status().await {
        Ok(report) => {
            tracing::info!("{report}");
            let needs_login = report.needs_login();
            emit(sink, Event::Status(report));
            if needs_login {
                tracing::info!("re-login as {credentials}");
                emit(sink, Event::Credentials(credentials.clone()));
                match portal.login(credentials).await {
                    Ok(after) => {
                        tracing::info!("{after}");
                        emit(sink, Event::Status(after));
                    }
                    Err(err) => report_failure(err, failover, sink),
                }
            }
        }
        Err(err) => report_failure(err, failover, sink),
    }

    sleep(POLL_INTERVAL).await;
}

/// A connect timeout arms host failover; everything else is narrated as-is.
fn report_failure(err: PortalError, failover: &FailoverState, sink: &SinkSlot) {
    match err {
        PortalError::ConnectTimeout => {
            failover.mark_timeout();
            emit(sink, Event::Message(PortalError::ConnectTimeout.to_string()));
        }
        other => {
            tracing::warn!("portal request failed: {other}");
            emit(sink, Event::Message(other.to_string()));
        }
    }
}

fn emit(sink: &SinkSlot, event: Event) {
    if let Some(callback) = sink.lock().unwrap().as_ref() {
        callback(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusReport;

    use async_trait::async_trait;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Status,
        Login(Credentials),
        Logout,
    }

    fn online_report() -> StatusReport {
        StatusReport {
            info: "online".into(),
            logout_domain: "ChinaNet".into(),
            logout_ip: "10.0.0.2".into(),
            logout_location: "dorm".into(),
            logout_timer: 60,
            logout_username: "a".into(),
            status: 1,
        }
    }

    fn offline_report() -> StatusReport {
        StatusReport {
            info: "logged out".into(),
            status: 0,
            ..online_report()
        }
    }

    /// Portal double: scripted results per operation, defaulting to success
    /// once a script runs dry, every call recorded.
    struct MockPortal {
        status_script: Mutex<VecDeque<Result<StatusReport, PortalError>>>,
        login_script: Mutex<VecDeque<Result<StatusReport, PortalError>>>,
        logout_script: Mutex<VecDeque<Result<LogoutResult, PortalError>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl MockPortal {
        fn scripted(script: Vec<Result<StatusReport, PortalError>>) -> Arc<Self> {
            Arc::new(Self {
                status_script: Mutex::new(script.into()),
                login_script: Mutex::new(VecDeque::new()),
                logout_script: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn script_login(&self, result: Result<StatusReport, PortalError>) {
            self.login_script.lock().unwrap().push_back(result);
        }

        fn script_logout(&self, result: Result<LogoutResult, PortalError>) {
            self.logout_script.lock().unwrap().push_back(result);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn login_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Login(_)))
                .count()
        }
    }

    #[async_trait]
    impl Portal for MockPortal {
        async fn query_status(&self) -> Result<StatusReport, PortalError> {
            self.calls.lock().unwrap().push(Call::Status);
            self.status_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(online_report()))
        }

        async fn login(&self, credentials: &Credentials) -> Result<StatusReport, PortalError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Login(credentials.clone()));
            self.login_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(online_report()))
        }

        async fn logout(&self) -> Result<LogoutResult, PortalError> {
            self.calls.lock().unwrap().push(Call::Logout);
            self.logout_script.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(LogoutResult {
                    data: "ok".into(),
                    info: "bye".into(),
                    status: 1,
                })
            })
        }
    }

    struct FixedProbe(ConnectionType);

    impl LinkProbe for FixedProbe {
        fn connection_type(&self) -> ConnectionType {
            self.0
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "a".into(),
            domain: "ChinaNet".into(),
            password: "x".into(),
            enable_mac_auth: 0,
        }
    }

    fn failover() -> Arc<FailoverState> {
        Arc::new(FailoverState::new("172.18.254.13", "172.18.254.14"))
    }

    fn handle_with(
        portal: Arc<MockPortal>,
        link: ConnectionType,
        failover: Arc<FailoverState>,
    ) -> (KeeperHandle, Arc<Mutex<Vec<Event>>>) {
        let handle = KeeperHandle::new(portal, Arc::new(FixedProbe(link)), failover);
        let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        handle.register_callback(move |event| captured.lock().unwrap().push(event));
        (handle, events)
    }

    /// Let spawned tasks run up to their next timer without advancing time.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn tick(duration: Duration) {
        tokio::time::advance(duration).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn status_zero_triggers_exactly_one_login() {
        let portal = MockPortal::scripted(vec![Ok(offline_report())]);
        let (handle, events) = handle_with(portal.clone(), ConnectionType::Wifi, failover());

        handle.start(credentials()).unwrap();
        settle().await;

        assert_eq!(portal.login_count(), 1);
        assert_eq!(
            &portal.calls()[..2],
            &[Call::Status, Call::Login(credentials())][..]
        );
        // sink sequence: status, echoed credentials, post-login status
        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                Event::Status(offline_report()),
                Event::Credentials(credentials()),
                Event::Status(online_report()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn login_form_fields_match_portal_contract() {
        let portal = MockPortal::scripted(vec![Ok(offline_report())]);
        let (handle, _events) = handle_with(portal.clone(), ConnectionType::Wifi, failover());

        handle.start(credentials()).unwrap();
        settle().await;

        let Call::Login(sent) = portal.calls()[1].clone() else {
            panic!("expected a login call");
        };
        assert_eq!(
            sent.form_fields(),
            [
                ("username", "a".to_string()),
                ("domain", "ChinaNet".to_string()),
                ("password", "x".to_string()),
                ("enablemacauth", "0".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn already_authenticated_means_no_login() {
        let portal = MockPortal::scripted(vec![Ok(online_report())]);
        let (handle, events) = handle_with(portal.clone(), ConnectionType::Wifi, failover());

        handle.start(credentials()).unwrap();
        settle().await;

        assert_eq!(portal.login_count(), 0);
        assert_eq!(*events.lock().unwrap(), vec![Event::Status(online_report())]);
    }

    #[tokio::test(start_paused = true)]
    async fn non_wifi_cycle_makes_no_portal_call() {
        let portal = MockPortal::scripted(vec![]);
        let (handle, events) = handle_with(portal.clone(), ConnectionType::Cellular, failover());

        handle.start(credentials()).unwrap();
        settle().await;

        assert!(portal.calls().is_empty());
        assert_eq!(
            *events.lock().unwrap(),
            vec![Event::Message("non-wifi network".into())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_arms_failover_and_skips_login() {
        let portal = MockPortal::scripted(vec![Err(PortalError::ConnectTimeout)]);
        let failover = failover();
        let (handle, events) = handle_with(portal.clone(), ConnectionType::Wifi, failover.clone());

        handle.start(credentials()).unwrap();
        settle().await;

        assert_eq!(portal.login_count(), 0);
        assert_eq!(
            *events.lock().unwrap(),
            vec![Event::Message("connect timeout".into())]
        );
        // the next outbound request targets the other host
        assert_eq!(failover.host_for_request(), "172.18.254.14");
    }

    #[tokio::test(start_paused = true)]
    async fn login_failures_are_reported_per_kind_and_loop_survives() {
        let portal = MockPortal::scripted(vec![Ok(offline_report()), Ok(offline_report())]);
        portal.script_login(Err(PortalError::ConnectTimeout));
        portal.script_login(Err(PortalError::Transport("denied".into())));
        let failover = failover();
        let (handle, events) = handle_with(portal.clone(), ConnectionType::Wifi, failover.clone());

        handle.start(credentials()).unwrap();
        settle().await;

        // a login connect timeout arms failover just like a status one
        assert_eq!(failover.host_for_request(), "172.18.254.14");

        tick(POLL_INTERVAL).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                Event::Status(offline_report()),
                Event::Credentials(credentials()),
                Event::Message("connect timeout".into()),
                Event::Status(offline_report()),
                Event::Credentials(credentials()),
                Event::Message("denied".into()),
            ]
        );
        assert_eq!(portal.login_count(), 2);
        assert!(handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_is_reported_and_loop_continues() {
        let portal = MockPortal::scripted(vec![
            Err(PortalError::Transport("boom".into())),
            Ok(online_report()),
        ]);
        let (handle, events) = handle_with(portal.clone(), ConnectionType::Wifi, failover());

        handle.start(credentials()).unwrap();
        settle().await;
        tick(POLL_INTERVAL).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                Event::Message("boom".into()),
                Event::Status(online_report()),
            ]
        );
        assert!(handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn start_within_three_seconds_is_rejected() {
        let portal = MockPortal::scripted(vec![]);
        let (handle, _events) = handle_with(portal, ConnectionType::Cellular, failover());

        handle.start(credentials()).unwrap();
        tick(Duration::from_millis(500)).await;

        assert_eq!(handle.start(credentials()), Err(KeeperError::TooFrequent));
        assert!(handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn start_after_debounce_replaces_the_task() {
        let portal = MockPortal::scripted(vec![]);
        let (handle, events) = handle_with(portal, ConnectionType::Cellular, failover());

        handle.start(credentials()).unwrap();
        settle().await;
        tick(Duration::from_millis(3000)).await;
        handle.start(credentials()).unwrap();
        settle().await;
        // old task would fire again at t=10s and t=20s if it were still alive
        tick(POLL_INTERVAL).await;
        tick(POLL_INTERVAL).await;

        // one message per live cycle: t=0 (task 1), t=3 (task 2), t=13, t=23
        let messages = events.lock().unwrap();
        assert_eq!(messages.len(), 4);
        assert!(messages
            .iter()
            .all(|e| *e == Event::Message("non-wifi network".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn logout_cancels_task_and_calls_portal() {
        let portal = MockPortal::scripted(vec![Ok(online_report())]);
        let (handle, _events) = handle_with(portal.clone(), ConnectionType::Wifi, failover());

        handle.start(credentials()).unwrap();
        settle().await;
        let result = handle.logout().await;

        assert_eq!(result.map(|r| r.status), Some(1));
        assert!(!handle.is_running());
        assert!(portal.calls().contains(&Call::Logout));
    }

    #[tokio::test(start_paused = true)]
    async fn logout_without_running_task_still_hits_portal() {
        let portal = MockPortal::scripted(vec![]);
        let (handle, events) = handle_with(portal.clone(), ConnectionType::Wifi, failover());

        let result = handle.logout().await;

        assert!(result.is_some());
        assert_eq!(portal.calls(), vec![Call::Logout]);
        assert_eq!(
            *events.lock().unwrap(),
            vec![Event::Message("result:ok info:bye status:1".into())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn logout_failure_returns_none_and_narrates_the_error() {
        let portal = MockPortal::scripted(vec![Ok(online_report())]);
        portal.script_logout(Err(PortalError::Transport("portal unreachable".into())));
        let (handle, events) = handle_with(portal.clone(), ConnectionType::Wifi, failover());

        handle.start(credentials()).unwrap();
        settle().await;
        let result = handle.logout().await;

        assert!(result.is_none());
        assert!(!handle.is_running());
        assert!(portal.calls().contains(&Call::Logout));
        assert_eq!(
            events.lock().unwrap().last(),
            Some(&Event::Message("portal unreachable".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_emits_no_further_events() {
        let portal = MockPortal::scripted(vec![]);
        let (handle, events) = handle_with(portal, ConnectionType::Cellular, failover());

        handle.start(credentials()).unwrap();
        settle().await;
        handle.stop();
        tick(POLL_INTERVAL * 3).await;

        assert_eq!(events.lock().unwrap().len(), 1);
        assert!(!handle.is_running());
    }
}
