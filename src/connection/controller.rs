//! Connection controller with heartbeat, fault checks and reconnection

use crate::command::{CommandDispatcher, Directive};
use crate::fault::{FaultSimulator, FaultVerdict};
use crate::transport::{Link, LinkEvent, Transport};
use crate::upload::{UploadError, UploadPipeline, UploadReport};
use serde_json::Value;
use simiot_shared::codec::decode_command;
use simiot_shared::state_machine::{
    ConnectionEvent, ConnectionState, ConnectionStateMachine, TransitionResult,
};
use simiot_shared::{protocol, timing, Command, Registration, Session};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for the connection controller
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Period between heartbeats; the first one fires one period after connect
    pub heartbeat_interval: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Retry after a disconnect or failed connect instead of idling
    pub reconnect_on_disconnect: bool,
    /// Delay before such a retry
    pub reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(timing::HEARTBEAT_INTERVAL_MS),
            connect_timeout: Duration::from_millis(timing::CONNECT_TIMEOUT_MS),
            reconnect_on_disconnect: false,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// How [`ConnectionController::run`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Remote `Power_Off` command
    PowerOff,
    /// Local shutdown signal
    Interrupted,
}

/// Result of one connection epoch
enum Step {
    /// Link torn down on purpose; dial again right away
    Reconnect,
    /// Link went away or never came up
    Lost,
    Finished(RunOutcome),
}

/// What woke the connected loop
enum Wake {
    Shutdown,
    Heartbeat,
    Link(LinkEvent),
    Upload(Result<UploadResult, JoinError>),
}

type UploadResult = Result<UploadReport, UploadError>;

/// Owns the persistent connection for the lifetime of the process
pub struct ConnectionController<T> {
    config: ConnectionConfig,
    transport: T,
    dispatcher: CommandDispatcher,
    fault: FaultSimulator,
    pipeline: Arc<UploadPipeline>,
    fsm: ConnectionStateMachine,
    state_tx: watch::Sender<ConnectionState>,
    uploads: JoinSet<UploadResult>,
}

impl<T: Transport> ConnectionController<T> {
    pub fn new(
        config: ConnectionConfig,
        transport: T,
        dispatcher: CommandDispatcher,
        fault: FaultSimulator,
        pipeline: Arc<UploadPipeline>,
    ) -> Self {
        let fsm = ConnectionStateMachine::new();
        let (state_tx, _) = watch::channel(fsm.state());
        Self {
            config,
            transport,
            dispatcher,
            fault,
            pipeline,
            fsm,
            state_tx,
            uploads: JoinSet::new(),
        }
    }

    /// Observe lifecycle state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Drive the connection until power-off or `shutdown` resolves
    ///
    /// Pending uploads are awaited before returning.
    pub async fn run<F>(mut self, shutdown: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "Starting {} client with session {}",
            self.transport.name(),
            self.dispatcher.session().session_id
        );

        let outcome = loop {
            match self.connection_epoch(shutdown.as_mut()).await {
                Step::Reconnect => continue,
                Step::Finished(outcome) => break outcome,
                Step::Lost => {
                    let retry_after = self
                        .config
                        .reconnect_on_disconnect
                        .then_some(self.config.reconnect_delay);
                    match retry_after {
                        Some(delay) => info!("Reconnecting in {:?}", delay),
                        None => info!("Connection closed, waiting for shutdown"),
                    }
                    if let Some(outcome) = self.idle(shutdown.as_mut(), retry_after).await {
                        break outcome;
                    }
                }
            }
        };

        self.drain_uploads().await;
        info!("Connection controller stopped: {:?}", outcome);
        outcome
    }

    /// Dial, then serve one link until it is torn down
    ///
    /// The heartbeat interval lives in this scope, so leaving it cancels it.
    async fn connection_epoch<F>(&mut self, mut shutdown: Pin<&mut F>) -> Step
    where
        F: Future<Output = ()>,
    {
        self.transition(ConnectionEvent::Dial);

        let session = self.dispatcher.session().clone();
        let attempt = tokio::select! {
            _ = shutdown.as_mut() => None,
            attempt = timeout(self.config.connect_timeout, self.transport.connect(&session)) => Some(attempt),
        };

        let mut link = match attempt {
            None => {
                self.transition(ConnectionEvent::Interrupted);
                return Step::Finished(RunOutcome::Interrupted);
            }
            Some(Ok(Ok(link))) => link,
            Some(Ok(Err(e))) => {
                error!("Connect error: {:#}", e);
                self.transition(ConnectionEvent::ConnectFailed);
                return Step::Lost;
            }
            Some(Err(_)) => {
                error!("Connect error: timed out after {:?}", self.config.connect_timeout);
                self.transition(ConnectionEvent::ConnectFailed);
                return Step::Lost;
            }
        };

        let mut heartbeat: Option<Interval> = None;

        loop {
            let wake = tokio::select! {
                _ = shutdown.as_mut() => Wake::Shutdown,
                _ = next_tick(&mut heartbeat) => Wake::Heartbeat,
                event = link.recv() => Wake::Link(event),
                Some(done) = self.uploads.join_next(), if !self.uploads.is_empty() => Wake::Upload(done),
            };

            match wake {
                Wake::Shutdown => {
                    close_link(link).await;
                    self.transition(ConnectionEvent::Interrupted);
                    return Step::Finished(RunOutcome::Interrupted);
                }
                Wake::Heartbeat => {
                    info!("ping");
                    if let Err(e) = link.emit(protocol::EVENT_PING, None).await {
                        warn!("Failed to send ping: {:#}", e);
                    }
                    if let FaultVerdict::Failure { .. } = self.fault.on_heartbeat() {
                        close_link(link).await;
                        self.transition(ConnectionEvent::FaultDetected);
                        return Step::Reconnect;
                    }
                }
                Wake::Link(LinkEvent::Connected { sid }) => {
                    info!("Connected: {}", sid.as_deref().unwrap_or("-"));
                    self.transition(ConnectionEvent::TransportConnected);
                    register(&mut *link, &session).await;
                    // A repeated connect replaces the running heartbeat
                    heartbeat = Some(start_heartbeat(self.config.heartbeat_interval));
                }
                Wake::Link(LinkEvent::Event { name, args }) => match name.as_str() {
                    protocol::EVENT_MESSAGE => {
                        let Some(command) = parse_message(&args) else {
                            continue;
                        };
                        match self.dispatcher.dispatch(&command, &mut self.fault) {
                            Directive::Continue => {}
                            Directive::Upload => self.spawn_upload(),
                            Directive::Reboot => {
                                close_link(link).await;
                                self.transition(ConnectionEvent::RebootRequested);
                                return Step::Reconnect;
                            }
                            Directive::PowerOff => {
                                close_link(link).await;
                                self.transition(ConnectionEvent::PowerOff);
                                return Step::Finished(RunOutcome::PowerOff);
                            }
                        }
                    }
                    protocol::EVENT_PONG => {
                        let args = Value::Array(args);
                        info!("pong {}", args);
                    }
                    other => debug!("Ignoring event {:?}", other),
                },
                Wake::Link(LinkEvent::ConnectError(data)) => {
                    error!("Connect error: {}", data);
                    let event = if self.fsm.state() == ConnectionState::Connected {
                        ConnectionEvent::TransportLost
                    } else {
                        ConnectionEvent::ConnectFailed
                    };
                    close_link(link).await;
                    self.transition(event);
                    return Step::Lost;
                }
                Wake::Link(LinkEvent::Disconnected { reason }) => {
                    info!("Disconnected: {}", reason);
                    self.transition(ConnectionEvent::TransportLost);
                    return Step::Lost;
                }
                Wake::Upload(done) => on_upload_done(done),
            }
        }
    }

    /// Wait while no link is up; `None` means it is time to dial again
    async fn idle<F>(
        &mut self,
        mut shutdown: Pin<&mut F>,
        retry_after: Option<Duration>,
    ) -> Option<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        let retry = async {
            match retry_after {
                Some(delay) => sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(retry);

        loop {
            let done = tokio::select! {
                _ = shutdown.as_mut() => {
                    self.transition(ConnectionEvent::Interrupted);
                    return Some(RunOutcome::Interrupted);
                }
                _ = &mut retry => return None,
                Some(done) = self.uploads.join_next(), if !self.uploads.is_empty() => done,
            };
            on_upload_done(done);
        }
    }

    fn spawn_upload(&mut self) {
        let pipeline = self.pipeline.clone();
        let session = self.dispatcher.session().clone();
        let serial_no = self.dispatcher.identity().serial_no.clone();
        self.uploads
            .spawn(async move { pipeline.upload(&session, &serial_no).await });
        info!("Log upload started");
    }

    async fn drain_uploads(&mut self) {
        if !self.uploads.is_empty() {
            info!("Waiting for {} pending upload(s)", self.uploads.len());
        }
        while let Some(done) = self.uploads.join_next().await {
            on_upload_done(done);
        }
    }

    fn transition(&mut self, event: ConnectionEvent) {
        match self.fsm.process_event(event) {
            TransitionResult::Success(state) => {
                debug!("Connection state: {:?}", state);
                self.state_tx.send_replace(state);
            }
            TransitionResult::Invalid { from, event } => {
                warn!("Ignoring {:?} in state {:?}", event, from);
            }
        }
    }
}

fn start_heartbeat(period: Duration) -> Interval {
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat
}

/// Next heartbeat tick, or never while no heartbeat runs
async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn register(link: &mut dyn Link, session: &Session) {
    let registration = match serde_json::to_value(Registration::device(session)) {
        Ok(value) => value,
        Err(e) => {
            error!("Could not encode registration: {}", e);
            return;
        }
    };
    match link.emit(protocol::EVENT_REGISTER, Some(registration)).await {
        Ok(()) => info!("Sent registration"),
        Err(e) => error!("Failed to send registration: {:#}", e),
    }
}

async fn close_link(mut link: Box<dyn Link>) {
    if let Err(e) = link.close().await {
        debug!("Link close failed: {:#}", e);
    }
}

fn parse_message(args: &[Value]) -> Option<Command> {
    let Some(envelope) = args.first() else {
        error!("Bad payload: message without data");
        return None;
    };
    match decode_command(envelope) {
        Ok(command) => Some(command),
        Err(e) => {
            error!("Bad payload {}: {}", envelope, e);
            None
        }
    }
}

fn on_upload_done(done: Result<UploadResult, JoinError>) {
    match done {
        Ok(Ok(report)) => {
            info!("Upload successful: {}", report.status);
            debug!("Upload response: {}", report.body);
        }
        Ok(Err(e)) => error!("Upload error: {}", e),
        Err(e) => error!("Upload task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::ScriptedSource;
    use crate::logging::LogCapture;
    use crate::session::{NetworkInfo, NetworkProbe};
    use crate::transport::mock::{MockHandle, MockTransport};
    use crate::upload::UploadConfig;
    use serde_json::json;
    use simiot_shared::DeviceIdentity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct NoNetwork;

    impl NetworkProbe for NoNetwork {
        fn resolve(&self) -> NetworkInfo {
            NetworkInfo::unavailable()
        }
    }

    struct Harness {
        controller: ConnectionController<MockTransport>,
        handle: MockHandle,
        draws: Arc<AtomicUsize>,
        _dir: TempDir,
    }

    fn harness_with(config: ConnectionConfig, script: &[u32], fallback: u32, upload_url: &str) -> Harness {
        let dir = tempdir().unwrap();
        let capture = Arc::new(LogCapture::create(dir.path().join("LogRecords.txt")).unwrap());

        let mut session = Session::new("sess-1");
        session.device_id = Some("42".into());
        let dispatcher = CommandDispatcher::new(
            Arc::new(session),
            DeviceIdentity::default(),
            capture.clone(),
            Arc::new(NoNetwork),
        );

        let (source, draws) = ScriptedSource::new(script, fallback);
        let fault = FaultSimulator::with_source(Box::new(source));

        let mut upload_config = UploadConfig::new(upload_url.parse().unwrap());
        upload_config.temp_dir = dir.path().to_path_buf();
        let pipeline = Arc::new(UploadPipeline::new(upload_config, capture).unwrap());

        let (transport, handle) = MockTransport::new();
        Harness {
            controller: ConnectionController::new(config, transport, dispatcher, fault, pipeline),
            handle,
            draws,
            _dir: dir,
        }
    }

    fn harness(script: &[u32], fallback: u32) -> Harness {
        harness_with(ConnectionConfig::default(), script, fallback, "http://127.0.0.1:9/up")
    }

    fn start(
        controller: ConnectionController<MockTransport>,
    ) -> (oneshot::Sender<()>, JoinHandle<RunOutcome>) {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(controller.run(async move {
            let _ = stop_rx.await;
        }));
        (stop_tx, task)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_registers_then_pings_every_five_seconds() {
        let h = harness(&[], 9);
        let state = h.controller.subscribe();
        let started = Instant::now();
        let (stop, task) = start(h.controller);

        advance(30_500).await;

        let sent = h.handle.sent();
        assert_eq!(sent[0].event, "r");
        assert_eq!(sent[0].data, Some(json!({"n": "sess-1", "r": "dev"})));
        assert_eq!(sent[0].at, started);

        let pings = h.handle.sent_named("ping");
        assert_eq!(pings.len(), 6);
        for (i, ping) in pings.iter().enumerate() {
            assert_eq!(ping.at - started, Duration::from_secs(5 * (i as u64 + 1)));
            assert_eq!(ping.data, None);
        }
        assert_eq!(h.handle.cookies(), vec!["S=sess-1".to_string()]);
        assert_eq!(*state.borrow(), ConnectionState::Connected);

        stop.send(()).unwrap();
        assert_eq!(task.await.unwrap(), RunOutcome::Interrupted);
        assert_eq!(h.handle.closes(), 1);
        assert_eq!(*state.borrow(), ConnectionState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unarmed_ticks_never_draw_or_reconnect() {
        let h = harness(&[0, 0, 0], 0);
        let (_stop, _task) = start(h.controller);

        advance(60_500).await;

        assert_eq!(h.handle.sent_named("ping").len(), 12);
        assert_eq!(h.draws.load(Ordering::SeqCst), 0);
        assert_eq!(h.handle.connects(), 1);
        assert_eq!(h.handle.closes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_armed_fault_reconnects_at_sixth_tick() {
        let h = harness(&[5, 4, 6, 3, 7, 2], 9);
        h.handle.send_command(json!({"f": "changed_parameters"}));
        let (_stop, _task) = start(h.controller);

        advance(29_000).await;
        assert_eq!(h.handle.connects(), 1);
        assert_eq!(h.draws.load(Ordering::SeqCst), 5);

        advance(1_500).await;
        assert_eq!(h.draws.load(Ordering::SeqCst), 6);
        assert_eq!(h.handle.connects(), 2);
        assert_eq!(h.handle.closes(), 1);
        assert_eq!(h.handle.sent_named("r").len(), 2);
        assert_eq!(h.handle.sent_named("ping").len(), 6);

        // Disarmed: the new link keeps its heartbeat and never draws again
        advance(60_000).await;
        assert_eq!(h.draws.load(Ordering::SeqCst), 6);
        assert_eq!(h.handle.connects(), 2);
        assert_eq!(h.handle.sent_named("ping").len(), 18);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_reboots_keep_single_heartbeat() {
        let h = harness(&[], 9);
        let state = h.controller.subscribe();
        let (_stop, _task) = start(h.controller);

        advance(2_000).await;
        h.handle.send_command(json!({"f": "reboot"}));
        advance(2_000).await;
        h.handle.send_command(json!({"f": "reboot"}));
        advance(500).await;
        // Repeated connect event on the live link
        h.handle.push(LinkEvent::Connected { sid: None });
        advance(1).await;

        let window_start = Instant::now();
        advance(30_100).await;

        let pings = h.handle.sent_named("ping");
        let in_window = pings
            .iter()
            .filter(|p| p.at > window_start && p.at <= window_start + Duration::from_millis(30_100))
            .count();
        assert_eq!(in_window, 6);
        assert_eq!(pings.len(), 6);
        assert_eq!(h.handle.connects(), 3);
        assert_eq!(h.handle.closes(), 2);
        assert_eq!(*state.borrow(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_off_terminates_run() {
        let h = harness(&[], 9);
        let state = h.controller.subscribe();
        h.handle.send_command(json!({"f": "Power_Off"}));
        let (_stop, task) = start(h.controller);

        assert_eq!(task.await.unwrap(), RunOutcome::PowerOff);
        assert_eq!(h.handle.closes(), 1);
        assert_eq!(h.handle.connects(), 1);
        assert!(h.handle.sent_named("ping").is_empty());
        assert_eq!(*state.borrow(), ConnectionState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_payloads_keep_connection() {
        let h = harness(&[], 9);
        h.handle.push(LinkEvent::Event {
            name: "m".into(),
            args: vec![json!({"t": "{not json"})],
        });
        h.handle.push(LinkEvent::Event {
            name: "m".into(),
            args: vec![json!({"t": "{\"msg\":\"no tag\"}"})],
        });
        h.handle.push(LinkEvent::Event {
            name: "m".into(),
            args: vec![],
        });
        h.handle.push(LinkEvent::Event {
            name: "pong".into(),
            args: vec![json!({"ok": true})],
        });
        let (_stop, _task) = start(h.controller);

        advance(5_100).await;

        assert_eq!(h.handle.sent_named("ping").len(), 1);
        assert_eq!(h.handle.connects(), 1);
        assert_eq!(h.handle.closes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_does_not_reconnect_by_default() {
        let h = harness(&[], 9);
        let state = h.controller.subscribe();
        h.handle.push(LinkEvent::Disconnected {
            reason: "io server disconnect".into(),
        });
        let (stop, task) = start(h.controller);

        advance(60_000).await;

        assert_eq!(h.handle.connects(), 1);
        assert!(h.handle.sent_named("ping").is_empty());
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);

        stop.send(()).unwrap();
        assert_eq!(task.await.unwrap(), RunOutcome::Interrupted);
        assert_eq!(*state.borrow(), ConnectionState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_reconnects_when_enabled() {
        let config = ConnectionConfig {
            reconnect_on_disconnect: true,
            reconnect_delay: Duration::from_secs(1),
            ..Default::default()
        };
        let h = harness_with(config, &[], 9, "http://127.0.0.1:9/up");
        let state = h.controller.subscribe();
        h.handle.push(LinkEvent::Disconnected {
            reason: "transport close".into(),
        });
        let (_stop, _task) = start(h.controller);

        advance(1_500).await;

        assert_eq!(h.handle.connects(), 2);
        assert_eq!(*state.borrow(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_parks_controller() {
        let h = harness(&[], 9);
        let state = h.controller.subscribe();
        h.handle.refuse_connections(true);
        let (_stop, _task) = start(h.controller);

        advance(60_000).await;

        assert_eq!(h.handle.connects(), 1);
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_retries_when_enabled() {
        let config = ConnectionConfig {
            reconnect_on_disconnect: true,
            reconnect_delay: Duration::from_secs(1),
            ..Default::default()
        };
        let h = harness_with(config, &[], 9, "http://127.0.0.1:9/up");
        h.handle.refuse_connections(true);
        let (_stop, _task) = start(h.controller);

        advance(3_500).await;

        assert_eq!(h.handle.connects(), 4);
    }

    #[tokio::test]
    async fn test_upload_finishes_before_power_off_returns() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/deviceslog/devlogup")
            .match_header("cookie", "S=sess-1")
            .match_header("p_devices_id", "42")
            .with_status(200)
            .with_body("stored")
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/deviceslog/devlogup", server.url());
        let h = harness_with(ConnectionConfig::default(), &[], 9, &url);
        h.handle.send_command(json!({"f": "send_logs"}));
        h.handle.send_command(json!({"f": "Power_Off"}));
        let (_stop, task) = start(h.controller);

        assert_eq!(task.await.unwrap(), RunOutcome::PowerOff);
        mock.assert_async().await;
    }
}
