//! Reconnect Handler Tests
//!
//! Timing behaviour is driven with a scripted dialer and a manual clock;
//! successful hand-offs use real loopback sockets.

use super::*;
use crate::clock::ManualClock;
use crate::event_loop::EventLoop;
use crate::resolver::TcpRegistry;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::net::TcpListener;
use std::sync::atomic::AtomicUsize;

/// What the next `start` call does
#[derive(Debug, Clone, Copy)]
enum Outcome {
    Refuse,
    Duplicate,
    Connect,
    Hang,
}

/// Dialer replaying a script; an exhausted script refuses
struct ScriptedDialer {
    script: Mutex<VecDeque<Outcome>>,
    starts: Arc<AtomicUsize>,
    target: SocketAddr,
}

impl ScriptedDialer {
    fn new(target: SocketAddr, script: &[Outcome]) -> (Self, Arc<AtomicUsize>) {
        let starts = Arc::new(AtomicUsize::new(0));
        let dialer = Self {
            script: Mutex::new(script.iter().copied().collect()),
            starts: Arc::clone(&starts),
            target,
        };
        (dialer, starts)
    }
}

impl Dialer for ScriptedDialer {
    type Pending = Option<TcpStream>;

    fn start(&self, _addr: SocketAddr) -> std::result::Result<Option<TcpStream>, DialError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front().unwrap_or(Outcome::Refuse) {
            Outcome::Refuse => Err(DialError::Io(io::Error::from(io::ErrorKind::ConnectionRefused))),
            Outcome::Duplicate => Err(DialError::Duplicate),
            Outcome::Connect => Ok(Some(TcpStream::connect(self.target)?)),
            Outcome::Hang => Ok(None),
        }
    }

    fn poll(
        &self,
        pending: &mut Option<TcpStream>,
    ) -> std::result::Result<Option<TcpStream>, DialError> {
        Ok(pending.take())
    }
}

/// Protocol handler standing in for a real session
struct SessionHandler {
    channel: Option<Channel>,
    closes: Arc<AtomicUsize>,
}

impl EventHandler for SessionHandler {
    fn action(&mut self) -> Result<HandlerStatus> {
        Ok(HandlerStatus::Idle)
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.channel = None;
    }
}

/// Records what the factory was handed
#[derive(Default)]
struct FactoryProbe {
    builds: AtomicUsize,
    closes: Arc<AtomicUsize>,
    saw_initiator: AtomicBool,
    host_id: Mutex<Option<u32>>,
}

impl ConnectionHandlerFactory for FactoryProbe {
    fn build(&self, mut context: NetworkContext) -> Result<Box<dyn EventHandler>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.saw_initiator.store(!context.is_acceptor(), Ordering::SeqCst);
        *self.host_id.lock() = context.host_id();
        Ok(Box::new(SessionHandler {
            channel: context.take_channel(),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct Fixture {
    listener: TcpListener,
    registry: Arc<TcpRegistry>,
    clock: Arc<ManualClock>,
    event_loop: Arc<EventLoop>,
}

impl Fixture {
    fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = Arc::new(TcpRegistry::new());
        registry.register("peer", listener.local_addr().unwrap());
        Self {
            listener,
            registry,
            clock: Arc::new(ManualClock::new()),
            event_loop: Arc::new(EventLoop::new("connector-test")),
        }
    }

    fn connector(
        &self,
        script: &[Outcome],
        factory: Arc<dyn ConnectionHandlerFactory>,
    ) -> (RemoteConnector<ScriptedDialer>, Arc<AtomicUsize>) {
        let (dialer, starts) = ScriptedDialer::new(self.listener.local_addr().unwrap(), script);
        let connector =
            RemoteConnector::with_dialer(self.registry.clone(), factory, dialer, self.clock.clone());
        (connector, starts)
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.event_loop.clone()
    }
}

#[test]
fn test_attempts_spaced_by_retry_interval() {
    let fixture = Fixture::new();
    let (connector, starts) = fixture.connector(&[], Arc::new(FactoryProbe::default()));

    connector
        .connect(
            "peer",
            fixture.scheduler(),
            NetworkContext::new(),
            Duration::from_millis(1000),
        )
        .unwrap();

    // First tick always attempts
    fixture.event_loop.run_once();
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    // Four more ticks within 900ms make no attempt
    for _ in 0..4 {
        fixture.clock.advance(Duration::from_millis(225));
        fixture.event_loop.run_once();
    }
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    // At t0 + 1000 the next attempt is due
    fixture.clock.advance(Duration::from_millis(100));
    fixture.event_loop.run_once();
    assert_eq!(starts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_refusing_peer_is_retried_indefinitely() {
    let fixture = Fixture::new();
    let (connector, starts) = fixture.connector(&[], Arc::new(FactoryProbe::default()));

    let handle = connector
        .connect(
            "peer",
            fixture.scheduler(),
            NetworkContext::new(),
            Duration::from_millis(50),
        )
        .unwrap();

    for _ in 0..20 {
        fixture.event_loop.run_once();
        fixture.clock.advance(Duration::from_millis(50));
    }

    assert_eq!(starts.load(Ordering::SeqCst), 20);
    assert_eq!(fixture.event_loop.handler_count(), 1);
    assert!(!handle.is_closed());
}

#[test]
fn test_successful_hand_off_retires_reconnect_handler() {
    let fixture = Fixture::new();
    let probe = Arc::new(FactoryProbe::default());
    let (connector, starts) = fixture.connector(&[Outcome::Connect], probe.clone());

    connector
        .connect(
            "peer",
            fixture.scheduler(),
            NetworkContext::new().with_host_id(7),
            Duration::from_millis(10),
        )
        .unwrap();

    fixture.event_loop.run_once();
    let _server_side = fixture.listener.accept().unwrap();

    assert_eq!(probe.builds.load(Ordering::SeqCst), 1);
    assert!(probe.saw_initiator.load(Ordering::SeqCst));
    assert_eq!(*probe.host_id.lock(), Some(7));
    assert_eq!(connector.tracked_resources(), 1);

    // Only the session handler remains, and it is never re-dialled
    assert_eq!(fixture.event_loop.handler_count(), 1);
    for _ in 0..5 {
        fixture.clock.advance(Duration::from_millis(10));
        fixture.event_loop.run_once();
    }
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(probe.builds.load(Ordering::SeqCst), 1);
}

#[test]
fn test_handler_dropping_channel_ends_connection() {
    let fixture = Fixture::new();
    let factory = |mut context: NetworkContext| -> Result<Box<dyn EventHandler>> {
        // Session gives up on the connection straight away
        drop(context.take_channel());
        Ok(Box::new(SessionHandler {
            channel: None,
            closes: Arc::new(AtomicUsize::new(0)),
        }))
    };
    let (connector, _) = fixture.connector(&[Outcome::Connect], Arc::new(factory));

    connector
        .connect(
            "peer",
            fixture.scheduler(),
            NetworkContext::new(),
            Duration::from_millis(10),
        )
        .unwrap();
    fixture.event_loop.run_once();

    let (mut server_side, _) = fixture.listener.accept().unwrap();
    server_side
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    // The connector is still open, yet the peer sees the close
    assert!(!connector.is_closed());
    let mut buf = [0u8; 8];
    assert_eq!(server_side.read(&mut buf).unwrap(), 0);
    assert_eq!(connector.tracked_resources(), 0);

    connector.close();
}

#[test]
fn test_unbounded_retry_interval_attempts_once() {
    let fixture = Fixture::new();
    let (connector, starts) = fixture.connector(&[], Arc::new(FactoryProbe::default()));

    connector
        .connect("peer", fixture.scheduler(), NetworkContext::new(), Duration::MAX)
        .unwrap();

    for _ in 0..3 {
        fixture.event_loop.run_once();
        fixture.clock.advance(Duration::from_secs(3600));
    }

    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.event_loop.handler_count(), 1);
}

#[test]
fn test_duplicate_connection_retires_silently() {
    let fixture = Fixture::new();
    let probe = Arc::new(FactoryProbe::default());
    let (connector, starts) = fixture.connector(&[Outcome::Duplicate], probe.clone());

    connector
        .connect(
            "peer",
            fixture.scheduler(),
            NetworkContext::new(),
            Duration::from_millis(10),
        )
        .unwrap();

    fixture.event_loop.run_once();
    assert_eq!(fixture.event_loop.handler_count(), 0);

    fixture.clock.advance(Duration::from_millis(100));
    fixture.event_loop.run_once();
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(probe.builds.load(Ordering::SeqCst), 0);
}

#[test]
fn test_close_releases_every_handed_off_socket_once() {
    let fixture = Fixture::new();
    let probe = Arc::new(FactoryProbe::default());
    let (connector, _) = fixture.connector(
        &[Outcome::Connect, Outcome::Connect, Outcome::Connect],
        probe.clone(),
    );

    let mut server_sides = Vec::new();
    for _ in 0..3 {
        connector
            .connect(
                "peer",
                fixture.scheduler(),
                NetworkContext::new(),
                Duration::from_millis(10),
            )
            .unwrap();
        fixture.event_loop.run_once();
        server_sides.push(fixture.listener.accept().unwrap().0);
    }
    assert_eq!(connector.tracked_resources(), 3);

    connector.close();
    assert!(connector.is_closed());
    assert_eq!(connector.tracked_resources(), 0);

    for server_side in server_sides.iter_mut() {
        let mut buf = [0u8; 8];
        assert_eq!(server_side.read(&mut buf).unwrap(), 0);
    }

    // Double close is a no-op
    connector.close();
    assert_eq!(connector.tracked_resources(), 0);
}

#[test]
fn test_success_after_close_is_dropped_not_registered() {
    let fixture = Fixture::new();
    let closes = Arc::new(AtomicUsize::new(0));
    let (dialer, _) = ScriptedDialer::new(fixture.listener.local_addr().unwrap(), &[Outcome::Connect]);

    // The factory closes the connector mid hand-off, as a concurrent closer would
    let connector_slot: Arc<Mutex<Option<RemoteConnector<ScriptedDialer>>>> =
        Arc::new(Mutex::new(None));
    let factory = {
        let slot = Arc::clone(&connector_slot);
        let closes = Arc::clone(&closes);
        move |mut context: NetworkContext| -> Result<Box<dyn EventHandler>> {
            if let Some(connector) = slot.lock().as_ref() {
                connector.close();
            }
            Ok(Box::new(SessionHandler {
                channel: context.take_channel(),
                closes: Arc::clone(&closes),
            }) as Box<dyn EventHandler>)
        }
    };

    let connector = RemoteConnector::with_dialer(
        fixture.registry.clone(),
        Arc::new(factory),
        dialer,
        fixture.clock.clone(),
    );
    *connector_slot.lock() = Some(connector.clone());

    connector
        .connect(
            "peer",
            fixture.scheduler(),
            NetworkContext::new(),
            Duration::from_millis(10),
        )
        .unwrap();

    fixture.event_loop.run_once();
    let (mut server_side, _) = fixture.listener.accept().unwrap();

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.event_loop.handler_count(), 0);
    assert_eq!(connector.tracked_resources(), 0);

    let mut buf = [0u8; 8];
    assert_eq!(server_side.read(&mut buf).unwrap(), 0);

    connector_slot.lock().take();
}

#[test]
fn test_handle_close_stops_further_attempts() {
    let fixture = Fixture::new();
    let (connector, starts) = fixture.connector(&[], Arc::new(FactoryProbe::default()));

    let handle = connector
        .connect(
            "peer",
            fixture.scheduler(),
            NetworkContext::new(),
            Duration::from_millis(10),
        )
        .unwrap();
    fixture.event_loop.run_once();

    handle.close();
    fixture.clock.advance(Duration::from_millis(10));
    fixture.event_loop.run_once();

    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.event_loop.handler_count(), 0);
}

#[test]
fn test_factory_failure_surfaces_from_tick() {
    let fixture = Fixture::new();
    let factory = |_context: NetworkContext| -> Result<Box<dyn EventHandler>> {
        Err(NetworkError::protocol("handshake rejected"))
    };
    let (dialer, starts) = ScriptedDialer::new(
        fixture.listener.local_addr().unwrap(),
        &[Outcome::Connect, Outcome::Connect],
    );
    let connector = RemoteConnector::with_dialer(
        fixture.registry.clone(),
        Arc::new(factory),
        dialer,
        fixture.clock.clone(),
    );

    // Driven directly, the factory error comes out of the step
    let mut handler = ReconnectHandler::<ScriptedDialer> {
        endpoint: "peer".to_string(),
        address: fixture.listener.local_addr().unwrap(),
        retry_interval: Duration::from_millis(10),
        next_attempt: None,
        exhausted: false,
        pending: None,
        context: Some(NetworkContext::new()),
        closed: Arc::new(AtomicBool::new(false)),
        connector: Arc::clone(&connector.inner),
        scheduler: fixture.scheduler(),
    };
    let err = handler.action().unwrap_err();
    assert_eq!(err.category(), "handler_construction");
    assert_eq!(connector.tracked_resources(), 0);

    // Through the loop, the failing handler is removed rather than retried
    connector
        .connect(
            "peer",
            fixture.scheduler(),
            NetworkContext::new(),
            Duration::from_millis(10),
        )
        .unwrap();
    fixture.event_loop.run_once();
    assert_eq!(fixture.event_loop.handler_count(), 0);

    fixture.clock.advance(Duration::from_millis(10));
    fixture.event_loop.run_once();
    assert_eq!(starts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unresolvable_endpoint_fails_connect() {
    let fixture = Fixture::new();
    let (connector, starts) = fixture.connector(&[], Arc::new(FactoryProbe::default()));

    let err = connector
        .connect(
            "unknown-peer",
            fixture.scheduler(),
            NetworkContext::new(),
            Duration::from_millis(10),
        )
        .unwrap_err();

    assert_eq!(err.category(), "resolution");
    assert_eq!(fixture.event_loop.handler_count(), 0);
    assert_eq!(starts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_connect_after_close_is_rejected() {
    let fixture = Fixture::new();
    let (connector, _) = fixture.connector(&[], Arc::new(FactoryProbe::default()));
    connector.close();

    let err = connector
        .connect(
            "peer",
            fixture.scheduler(),
            NetworkContext::new(),
            Duration::from_millis(10),
        )
        .unwrap_err();
    assert_eq!(err.category(), "closed");
}

#[test]
fn test_pending_connect_abandoned_at_next_deadline() {
    let fixture = Fixture::new();
    let probe = Arc::new(FactoryProbe::default());
    let (connector, starts) = fixture.connector(&[Outcome::Hang, Outcome::Connect], probe.clone());

    connector
        .connect(
            "peer",
            fixture.scheduler(),
            NetworkContext::new(),
            Duration::from_millis(100),
        )
        .unwrap();

    assert!(fixture.event_loop.run_once());
    fixture.clock.advance(Duration::from_millis(50));
    fixture.event_loop.run_once();
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    fixture.clock.advance(Duration::from_millis(50));
    fixture.event_loop.run_once();
    let _server_side = fixture.listener.accept().unwrap();

    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert_eq!(probe.builds.load(Ordering::SeqCst), 1);
}

proptest! {
    #[test]
    fn prop_attempts_never_closer_than_interval(
        interval_ms in 1u64..500,
        gaps in proptest::collection::vec(0u64..300, 1..60),
    ) {
        let fixture = Fixture::new();
        let (connector, starts) = fixture.connector(&[], Arc::new(FactoryProbe::default()));
        connector
            .connect(
                "peer",
                fixture.scheduler(),
                NetworkContext::new(),
                Duration::from_millis(interval_ms),
            )
            .unwrap();

        let mut attempt_times = Vec::new();
        let mut seen = 0;
        for gap in gaps {
            fixture.clock.advance(Duration::from_millis(gap));
            fixture.event_loop.run_once();
            let now = starts.load(Ordering::SeqCst);
            if now > seen {
                attempt_times.push(fixture.clock.elapsed());
                seen = now;
            }
        }

        for pair in attempt_times.windows(2) {
            prop_assert!(pair[1] - pair[0] >= Duration::from_millis(interval_ms));
        }
    }
}
