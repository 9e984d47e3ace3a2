/// Lifecycle tests against a scripted terminal, no hardware or network needed

use async_trait::async_trait;
use mockall::mock;
use parking_lot::Mutex;
use reader_cycler::{
    ConnectionService, ConnectionStatus, CycleError, CycleEvent, CycleState,
    DiscoveryConfiguration, DiscoveryService, Location, LocationDirectory, ReaderDescriptor,
    ReaderLifecycleController, ReaderSink, ServiceError, ServiceResult, TokenError,
};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Fail {
    Discover,
    Connect,
    Disconnect,
}

#[derive(Debug, Default)]
struct Calls {
    discover: usize,
    connect: Vec<(String, String)>,
    disconnect: usize,
}

/// Terminal double that replays the same reader batches every round
struct ScriptedTerminal {
    batches: Vec<Vec<ReaderDescriptor>>,
    status: Mutex<ConnectionStatus>,
    sticky_disconnect: bool,
    connect_sets_status: bool,
    /// When set, disconnect waits for a permit before completing
    disconnect_gate: Option<Arc<Notify>>,
    fail: Mutex<Option<Fail>>,
    calls: Mutex<Calls>,
}

impl ScriptedTerminal {
    fn new(batches: Vec<Vec<ReaderDescriptor>>) -> Self {
        Self {
            batches,
            status: Mutex::new(ConnectionStatus::NotConnected),
            sticky_disconnect: false,
            connect_sets_status: true,
            disconnect_gate: None,
            fail: Mutex::new(None),
            calls: Mutex::new(Calls::default()),
        }
    }

    fn single_reader() -> Self {
        Self::new(vec![vec![reader("R1")]])
    }

    fn failing_at(mut self, point: Fail) -> Self {
        self.fail = Mutex::new(Some(point));
        self
    }

    fn should_fail(&self, point: Fail) -> bool {
        let mut fail = self.fail.lock();
        if *fail == Some(point) {
            *fail = None;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl DiscoveryService for ScriptedTerminal {
    async fn discover(
        &self,
        _config: DiscoveryConfiguration,
        sink: ReaderSink,
    ) -> ServiceResult<()> {
        self.calls.lock().discover += 1;
        if self.should_fail(Fail::Discover) {
            return Err(ServiceError::terminal("bluetooth unavailable"));
        }
        for batch in &self.batches {
            sink.readers_updated(batch.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionService for ScriptedTerminal {
    async fn connect(&self, reader: ReaderDescriptor, location: Location) -> ServiceResult<()> {
        self.calls
            .lock()
            .connect
            .push((reader.serial_number, location.id));
        if self.should_fail(Fail::Connect) {
            return Err(ServiceError::terminal("reader timed out"));
        }
        if self.connect_sets_status {
            *self.status.lock() = ConnectionStatus::Connected;
        }
        Ok(())
    }

    async fn disconnect(&self) -> ServiceResult<()> {
        self.calls.lock().disconnect += 1;
        if let Some(gate) = &self.disconnect_gate {
            gate.notified().await;
        }
        if self.should_fail(Fail::Disconnect) {
            return Err(ServiceError::terminal("reader busy"));
        }
        if !self.sticky_disconnect {
            *self.status.lock() = ConnectionStatus::NotConnected;
        }
        Ok(())
    }

    fn current_status(&self) -> ConnectionStatus {
        *self.status.lock()
    }
}

mock! {
    Directory {}

    #[async_trait]
    impl LocationDirectory for Directory {
        async fn list_locations(&self) -> ServiceResult<Vec<Location>>;
    }
}

fn reader(serial: &str) -> ReaderDescriptor {
    ReaderDescriptor::new(serial)
}

fn controller(terminal: &Arc<ScriptedTerminal>) -> ReaderLifecycleController {
    let discovery: Arc<dyn DiscoveryService> = terminal.clone();
    let connection: Arc<dyn ConnectionService> = terminal.clone();
    ReaderLifecycleController::new(
        discovery,
        connection,
        Location::new("L1"),
        DiscoveryConfiguration::default(),
    )
}

/// Let spawned requests reach the terminal
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_full_cycle_restarts_discovery() {
    let terminal = Arc::new(ScriptedTerminal::single_reader());
    let mut controller = controller(&terminal);

    controller.run(Some(1)).await.unwrap();
    settle().await;

    let calls = terminal.calls.lock();
    assert_eq!(calls.connect, vec![("R1".to_string(), "L1".to_string())]);
    assert_eq!(calls.disconnect, 1);
    assert_eq!(calls.discover, 2);
    drop(calls);

    assert_eq!(controller.state(), CycleState::Discovering);
    assert_eq!(controller.round(), 2);
    assert_eq!(terminal.current_status(), ConnectionStatus::NotConnected);

    let history = controller.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reader, "R1");
    assert_eq!(history[0].status_after_disconnect, ConnectionStatus::NotConnected);
    assert!(!history[0].discrepancy);
}

#[tokio::test]
async fn test_each_disconnect_rediscovers_exactly_once() {
    let terminal = Arc::new(ScriptedTerminal::single_reader());
    let mut controller = controller(&terminal);

    controller.run(Some(3)).await.unwrap();
    settle().await;

    let calls = terminal.calls.lock();
    assert_eq!(calls.connect.len(), 3);
    assert_eq!(calls.disconnect, 3);
    assert_eq!(calls.discover, 4);
    assert_eq!(controller.round(), 4);
    assert_eq!(controller.history().len(), 3);
}

#[tokio::test]
async fn test_zero_cycle_limit_does_not_start() {
    let terminal = Arc::new(ScriptedTerminal::single_reader());
    let mut controller = controller(&terminal);

    controller.run(Some(0)).await.unwrap();
    settle().await;

    assert_eq!(controller.state(), CycleState::Idle);
    assert_eq!(controller.round(), 0);
    assert!(controller.history().is_empty());
    assert_eq!(terminal.calls.lock().discover, 0);
}

#[tokio::test]
async fn test_empty_discovery_stays_discovering() {
    let terminal = Arc::new(ScriptedTerminal::new(vec![vec![]]));
    let mut controller = controller(&terminal);

    controller.start().unwrap();
    // Empty reader update, then the discovery completion.
    controller.step().await.unwrap();
    controller.step().await.unwrap();
    settle().await;

    assert_eq!(controller.state(), CycleState::Discovering);
    assert!(controller.target().is_none());
    assert!(terminal.calls.lock().connect.is_empty());
}

#[tokio::test]
async fn test_later_reader_updates_are_ignored() {
    let terminal = Arc::new(ScriptedTerminal::new(vec![
        vec![reader("R1"), reader("R9")],
        vec![reader("R2")],
    ]));
    let mut controller = controller(&terminal);

    controller.start().unwrap();
    controller.step().await.unwrap();
    assert_eq!(controller.state(), CycleState::Connecting);
    assert_eq!(controller.target().unwrap().serial_number, "R1");

    controller.step().await.unwrap();
    assert_eq!(controller.state(), CycleState::Connecting);
    assert_eq!(controller.target().unwrap().serial_number, "R1");

    // Direct calls while connecting change nothing either.
    controller.on_readers_updated(vec![reader("R3")]);
    assert_eq!(controller.target().unwrap().serial_number, "R1");

    settle().await;
    assert_eq!(terminal.calls.lock().connect.len(), 1);
}

#[tokio::test]
async fn test_reader_updates_ignored_while_disconnecting() {
    let gate = Arc::new(Notify::new());
    let mut scripted = ScriptedTerminal::single_reader();
    scripted.disconnect_gate = Some(gate.clone());
    let terminal = Arc::new(scripted);
    let mut controller = controller(&terminal);

    controller.start().unwrap();
    while controller.state() != CycleState::Disconnecting {
        controller.step().await.unwrap();
    }
    settle().await;
    assert_eq!(terminal.calls.lock().disconnect, 1);

    let round = controller.round();
    controller
        .handle(CycleEvent::ReadersUpdated {
            round,
            readers: vec![reader("R2")],
        })
        .unwrap();
    controller.on_readers_updated(vec![reader("R3")]);

    settle().await;
    assert_eq!(controller.state(), CycleState::Disconnecting);
    assert_eq!(controller.target().unwrap().serial_number, "R1");
    assert_eq!(terminal.calls.lock().connect.len(), 1);

    // Releasing the disconnect completes the cycle as usual.
    gate.notify_one();
    controller.step().await.unwrap();
    assert_eq!(controller.history().len(), 1);
    assert_eq!(controller.history()[0].reader, "R1");
    assert_eq!(controller.state(), CycleState::Discovering);
}

#[tokio::test]
async fn test_stale_round_updates_are_dropped() {
    let terminal = Arc::new(ScriptedTerminal::new(vec![vec![]]));
    let mut controller = controller(&terminal);

    controller.start().unwrap();
    controller
        .handle(CycleEvent::ReadersUpdated {
            round: 99,
            readers: vec![reader("R1")],
        })
        .unwrap();

    settle().await;
    assert_eq!(controller.state(), CycleState::Discovering);
    assert!(terminal.calls.lock().connect.is_empty());
}

#[tokio::test]
async fn test_start_requires_not_connected() {
    let terminal = Arc::new(ScriptedTerminal::single_reader());
    *terminal.status.lock() = ConnectionStatus::Connected;
    let mut controller = controller(&terminal);

    let err = controller.start().unwrap_err();
    assert!(matches!(err, CycleError::NotIdleAtStart(ConnectionStatus::Connected)));
    assert_eq!(err.exit_code(), 16);
    assert_eq!(controller.state(), CycleState::Idle);

    settle().await;
    assert_eq!(terminal.calls.lock().discover, 0);
}

#[tokio::test]
async fn test_second_start_is_ignored() {
    let terminal = Arc::new(ScriptedTerminal::new(vec![vec![]]));
    let mut controller = controller(&terminal);

    controller.start().unwrap();
    controller.start().unwrap();
    settle().await;

    assert_eq!(terminal.calls.lock().discover, 1);
    assert_eq!(controller.round(), 1);
}

#[tokio::test]
async fn test_discovery_failure_is_fatal() {
    let terminal = Arc::new(ScriptedTerminal::single_reader().failing_at(Fail::Discover));
    let mut controller = controller(&terminal);

    let err = controller.run(None).await.unwrap_err();
    assert!(matches!(err, CycleError::Discovery(_)));
    assert_eq!(err.exit_code(), 13);
    assert_eq!(controller.state(), CycleState::Discovering);
}

#[tokio::test]
async fn test_connect_failure_never_disconnects() {
    let terminal = Arc::new(ScriptedTerminal::single_reader().failing_at(Fail::Connect));
    let mut controller = controller(&terminal);

    let err = controller.run(None).await.unwrap_err();
    assert!(matches!(err, CycleError::Connect(_)));
    assert_eq!(err.exit_code(), 12);
    assert_eq!(controller.state(), CycleState::Connecting);

    settle().await;
    assert_eq!(terminal.calls.lock().disconnect, 0);
}

#[tokio::test]
async fn test_disconnect_refused_when_status_not_connected() {
    let mut scripted = ScriptedTerminal::single_reader();
    scripted.connect_sets_status = false;
    let terminal = Arc::new(scripted);
    let mut controller = controller(&terminal);

    let err = controller.run(None).await.unwrap_err();
    match &err {
        CycleError::DisconnectPrecondition { status, phase } => {
            assert_eq!(*status, ConnectionStatus::NotConnected);
            assert_eq!(*phase, CycleState::Connected);
        }
        other => panic!("expected precondition failure, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 14);
    assert_eq!(controller.state(), CycleState::Connected);

    settle().await;
    assert_eq!(terminal.calls.lock().disconnect, 0);
}

#[tokio::test]
async fn test_disconnect_outside_connected_phase_is_refused() {
    let terminal = Arc::new(ScriptedTerminal::new(vec![vec![]]));
    *terminal.status.lock() = ConnectionStatus::Connected;
    let mut controller = controller(&terminal);

    let err = controller.disconnect().unwrap_err();
    assert!(matches!(
        err,
        CycleError::DisconnectPrecondition {
            phase: CycleState::Idle,
            ..
        }
    ));
}

#[tokio::test]
async fn test_disconnect_failure_is_fatal() {
    let terminal = Arc::new(ScriptedTerminal::single_reader().failing_at(Fail::Disconnect));
    let mut controller = controller(&terminal);

    let err = controller.run(None).await.unwrap_err();
    assert!(matches!(err, CycleError::Disconnect(_)));
    assert_eq!(err.exit_code(), 15);
    assert_eq!(controller.state(), CycleState::Disconnecting);
    assert!(controller.history().is_empty());

    settle().await;
    assert_eq!(terminal.calls.lock().discover, 1);
}

#[tokio::test]
async fn test_sticky_disconnect_is_logged_and_discovery_continues() {
    let mut scripted = ScriptedTerminal::single_reader();
    scripted.sticky_disconnect = true;
    let terminal = Arc::new(scripted);
    let mut controller = controller(&terminal);

    controller.run(Some(1)).await.unwrap();
    settle().await;

    let record = &controller.history()[0];
    assert!(record.discrepancy);
    assert_eq!(record.status_after_disconnect, ConnectionStatus::Connected);
    assert_eq!(controller.state(), CycleState::Discovering);
    assert_eq!(terminal.calls.lock().discover, 2);
}

#[tokio::test]
async fn test_bootstrap_takes_first_location() {
    let terminal = Arc::new(ScriptedTerminal::single_reader());
    let mut directory = MockDirectory::new();
    directory
        .expect_list_locations()
        .times(1)
        .returning(|| Ok(vec![Location::new("L1"), Location::new("L2")]));

    let controller = ReaderLifecycleController::bootstrap(
        &directory,
        terminal.clone(),
        terminal.clone(),
        DiscoveryConfiguration::default(),
    )
    .await
    .unwrap();

    assert_eq!(controller.location().id, "L1");
    assert_eq!(controller.state(), CycleState::Idle);
}

#[tokio::test]
async fn test_bootstrap_without_locations() {
    let terminal = Arc::new(ScriptedTerminal::single_reader());
    let mut directory = MockDirectory::new();
    directory
        .expect_list_locations()
        .returning(|| Ok(Vec::new()));

    let result = ReaderLifecycleController::bootstrap(
        &directory,
        terminal.clone(),
        terminal.clone(),
        DiscoveryConfiguration::default(),
    )
    .await;

    let err = result.err().expect("bootstrap should fail");
    assert!(matches!(err, CycleError::NoLocations));
    assert_eq!(err.exit_code(), 11);
}

#[tokio::test]
async fn test_bootstrap_reports_token_misconfiguration() {
    let terminal = Arc::new(ScriptedTerminal::single_reader());
    let mut directory = MockDirectory::new();
    directory.expect_list_locations().returning(|| {
        Err(TokenError::Misconfigured("YOUR TOKEN SERVER URL".to_string()).into())
    });

    let result = ReaderLifecycleController::bootstrap(
        &directory,
        terminal.clone(),
        terminal.clone(),
        DiscoveryConfiguration::default(),
    )
    .await;

    let err = result.err().expect("bootstrap should fail");
    assert!(matches!(err, CycleError::TokenMisconfigured(_)));
    assert_eq!(err.exit_code(), 10);
}
