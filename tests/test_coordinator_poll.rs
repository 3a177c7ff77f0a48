mod common;
use common::*;

use neptun_bridge::bits::AlarmModeBit;
use neptun_bridge::command::Switch;
use async_trait::async_trait;
use neptun_bridge::coordinator::{ChannelData, Coordinator, PollReason, PollState};
use neptun_bridge::Components;
use std::sync::atomic::{AtomicBool, Ordering};

/// A link that, while down, stalls every read for `stall` and then times
/// out. Once up it serves reads from the mock.
struct FlakyLink {
    inner: Arc<MockController>,
    down: AtomicBool,
    stall: Duration,
}

impl FlakyLink {
    fn new(stall: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MockController::new(),
            down: AtomicBool::new(true),
            stall,
        })
    }
}

#[async_trait]
impl RegisterIo for FlakyLink {
    async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        if self.down.load(Ordering::SeqCst) {
            tokio::time::sleep(self.stall).await;
            return Err(TransportError::timeout("no reply"));
        }
        self.inner.read_registers(start, count).await
    }

    async fn write_register(&self, address: u16, value: u16) -> Result<(), TransportError> {
        self.inner.write_register(address, value).await
    }

    async fn write_registers(&self, address: u16, values: &[u16]) -> Result<(), TransportError> {
        self.inner.write_registers(address, values).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

struct Subject {
    io: Arc<MockController>,
    store: StateStore,
    coordinator: Coordinator,
}

fn subject(controller: config::Controller) -> Subject {
    let config = Factory::config(controller);
    let map = Arc::new(RegisterMap::build(config.controller()).unwrap());
    let channels = Channels::new();
    let io = MockController::new();
    let store = StateStore::new(channels.clone(), &map, config.controller().scan_interval());
    let coordinator = Coordinator::new(config, map, io.clone(), store.clone(), channels);

    Subject {
        io,
        store,
        coordinator,
    }
}

#[tokio::test]
async fn poll_publishes_snapshot() {
    common_setup();

    let mut s = subject(Factory::wireless_controller(2));
    s.io.set(0, 0x0100);
    s.io.set_counter("s1_p1".parse().unwrap(), 4321);

    assert!(!s.store.get().is_valid);

    let snapshot = s.coordinator.poll(PollReason::Scheduled).await.unwrap();
    assert!(snapshot.is_valid);
    assert_eq!(snapshot.alarm_mode_raw, 0x0100);
    assert_eq!(snapshot.counter("s1_p1".parse().unwrap()), Some(4321));
    assert_eq!(snapshot.wireless_slots.len(), 2);

    // one read per span
    assert_eq!(s.io.reads(), 3);
    assert!(Arc::ptr_eq(&s.store.get(), &snapshot));
    assert_eq!(s.store.consecutive_failures(), 0);
}

#[tokio::test]
async fn failure_keeps_last_snapshot() {
    common_setup();

    let mut s = subject(Factory::controller());
    s.io.set(3, 1);
    let good = s.coordinator.poll(PollReason::Scheduled).await.unwrap();

    s.io.fail_reads(true);
    s.io.set(3, 0);
    let err = s.coordinator.poll(PollReason::Scheduled).await.unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::Timeout);

    assert!(Arc::ptr_eq(&s.store.get(), &good));
    assert_eq!(s.store.get().leak_raw, 1);
    assert_eq!(s.store.consecutive_failures(), 1);

    let stats = s.coordinator.stats();
    let stats = stats.lock().unwrap();
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.failures, 1);
}

#[tokio::test(start_paused = true)]
async fn staleness_after_two_intervals() {
    common_setup();

    let mut controller = Factory::controller();
    controller.scan_interval = Some(30);
    let mut s = subject(controller);

    s.coordinator.poll(PollReason::Scheduled).await.unwrap();
    let published = s.store.get();
    assert!(!s.store.is_stale());

    s.io.fail_reads(true);
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(s.coordinator.poll(PollReason::Scheduled).await.is_err());
    assert!(!s.store.is_stale());

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(s.coordinator.poll(PollReason::Scheduled).await.is_err());
    assert!(s.store.is_stale());
    assert!(Arc::ptr_eq(&s.store.get(), &published));

    // a good poll clears it
    s.io.fail_reads(false);
    s.coordinator.poll(PollReason::Scheduled).await.unwrap();
    assert!(!s.store.is_stale());
}

#[tokio::test(start_paused = true)]
async fn never_polled_goes_stale() {
    let mut controller = Factory::controller();
    controller.scan_interval = Some(10);
    let s = subject(controller);

    assert!(!s.store.is_stale());
    tokio::time::advance(Duration::from_secs(21)).await;
    assert!(s.store.is_stale());
}

#[tokio::test]
async fn ignore_zero_counters() {
    common_setup();

    let mut controller = Factory::controller();
    controller.ignore_zero_counter_values = true;
    let mut s = subject(controller);
    let id: CounterId = "s3_p2".parse().unwrap();

    s.io.set_counter(id, 100);
    s.coordinator.poll(PollReason::Scheduled).await.unwrap();

    s.io.set_counter(id, 0);
    let snapshot = s.coordinator.poll(PollReason::Scheduled).await.unwrap();
    assert_eq!(snapshot.counter(id), Some(100));
    assert_eq!(snapshot.raw_counters[&id], 0);
}

#[tokio::test(start_paused = true)]
async fn write_triggers_one_forced_poll() {
    common_setup();

    let mut controller = Factory::controller();
    controller.scan_interval = Some(30);
    let io = MockController::new();
    let components = Components::with_io(Factory::config(controller), io.clone()).unwrap();
    let mut receiver = components.subscribe();

    // first scheduled poll
    let first = match receiver.recv().await.unwrap() {
        state_store::ChannelData::Snapshot(s) => s,
        other => panic!("unexpected {:?}", other),
    };
    assert!(!AlarmModeBit::FloorWashing.is_set(first.alarm_mode_raw));

    components
        .send_command(Command::Switch(Switch::FloorWashing, true))
        .await
        .unwrap();

    let confirmed = match receiver.recv().await.unwrap() {
        state_store::ChannelData::Snapshot(s) => s,
        other => panic!("unexpected {:?}", other),
    };
    assert!(AlarmModeBit::FloorWashing.is_set(confirmed.alarm_mode_raw));
    assert!(Arc::ptr_eq(&components.snapshot(), &confirmed));

    // nothing else until the next tick
    assert!(
        tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .is_err()
    );

    let stats = components.stop().await;
    assert_eq!(stats.scheduled_polls, 1);
    assert_eq!(stats.forced_polls, 1);
    assert_eq!(stats.commands_written, 1);
    assert_eq!(io.closes(), 1);
}

#[tokio::test]
async fn reset_counters_lets_zero_through() {
    common_setup();

    let mut controller = Factory::controller();
    controller.ignore_zero_counter_values = true;
    let config = Factory::config(controller);
    let map = Arc::new(RegisterMap::build(config.controller()).unwrap());
    let channels = Channels::new();
    let io = MockController::new();
    let store = StateStore::new(channels.clone(), &map, config.controller().scan_interval());
    let coordinator = Coordinator::new(config, map, io.clone(), store.clone(), channels.clone());
    let handle = tokio::spawn(coordinator.start());

    let id: CounterId = "s1_p1".parse().unwrap();
    let mut receiver = store.subscribe();

    io.set_counter(id, 900);
    channels.to_coordinator.send(ChannelData::Poll(PollReason::Scheduled)).unwrap();
    receiver.recv().await.unwrap();
    assert_eq!(store.get().counter(id), Some(900));

    io.set_counter(id, 0);
    channels.to_coordinator.send(ChannelData::ResetCounters(vec![id])).unwrap();
    channels.to_coordinator.send(ChannelData::Poll(PollReason::Forced)).unwrap();
    receiver.recv().await.unwrap();
    assert_eq!(store.get().counter(id), Some(0));

    channels.to_coordinator.send(ChannelData::Shutdown).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(io.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_cycles_do_not_queue_scheduled_polls() {
    common_setup();

    let mut controller = Factory::controller();
    controller.scan_interval = Some(5);
    controller.timeout = Some(60);
    let link = FlakyLink::new(Duration::from_secs(60));
    let components = Components::with_io(Factory::config(controller), link.clone()).unwrap();

    // first cycle is stuck on its read
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(components.stats.lock().unwrap().state, PollState::Reading);

    tokio::time::sleep(Duration::from_secs(560)).await;
    let mut receiver = components.subscribe();
    link.down.store(false, Ordering::SeqCst);

    // the in-flight cycle still fails, then polling resumes at the normal rate
    tokio::time::sleep(Duration::from_secs(90)).await;
    let mut published = 0;
    while let Ok(state_store::ChannelData::Snapshot(_)) = receiver.try_recv() {
        published += 1;
    }
    assert!((1..=10).contains(&published), "{} snapshots in 90s", published);
    assert!(components.snapshot().is_valid);

    let stats = components.stop().await;
    assert!(stats.failures >= 9, "{} failures", stats.failures);
    assert!(stats.skipped_polls > 50, "{} skipped", stats.skipped_polls);
    assert_eq!(stats.state, PollState::Idle);
}

#[tokio::test]
async fn forced_poll_jumps_scheduled_backlog() {
    common_setup();

    let mut controller = Factory::controller();
    controller.ignore_zero_counter_values = true;
    let config = Factory::config(controller);
    let map = Arc::new(RegisterMap::build(config.controller()).unwrap());
    let channels = Channels::new();
    let io = MockController::new();
    let store = StateStore::new(channels.clone(), &map, config.controller().scan_interval());
    let coordinator = Coordinator::new(config, map, io.clone(), store.clone(), channels.clone());
    let stats = coordinator.stats();

    let id: CounterId = "s2_p2".parse().unwrap();
    io.set_counter(id, 0);

    // queued before the coordinator runs, as if it had been busy
    for _ in 0..5 {
        channels.to_coordinator.send(ChannelData::Poll(PollReason::Scheduled)).unwrap();
    }
    channels.to_coordinator.send(ChannelData::ResetCounters(vec![id])).unwrap();
    channels.to_coordinator.send(ChannelData::Poll(PollReason::Forced)).unwrap();
    channels.to_coordinator.send(ChannelData::Shutdown).unwrap();

    coordinator.start().await.unwrap();

    let stats = stats.lock().unwrap().clone();
    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.scheduled_polls, 1);
    assert_eq!(stats.skipped_polls, 4);
    assert_eq!(stats.forced_polls, 1);
    assert_eq!(store.get().counter(id), Some(0));
    assert_eq!(io.closes(), 1);
}
