use crate::prelude::*;

pub mod commands;

use crate::counter_filter::{CounterFilter, CounterPolicy};
use crate::decoder::Decoder;

use chrono::Utc;
use std::sync::{Arc, Mutex};

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Poll(PollReason),
    /// Counters were reset or calibrated; their next zero reading is real.
    ResetCounters(Vec<CounterId>),
    Shutdown,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum PollReason {
    Scheduled,
    /// Confirmation read after a successful command write.
    Forced,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum PollState {
    #[default]
    Idle,
    Reading,
    Decoding,
    Publishing,
}

#[derive(Default, Debug, Clone)]
pub struct PollStats {
    pub cycles: u64,
    pub successes: u64,
    pub failures: u64,
    pub scheduled_polls: u64,
    pub forced_polls: u64,
    /// Scheduled polls dropped because they queued up behind a running cycle.
    pub skipped_polls: u64,
    pub registers_read: u64,
    // commands
    pub commands_written: u64,
    pub commands_unchanged: u64,
    pub commands_failed: u64,
    pub last_error: Option<String>,
    pub state: PollState,
}

impl PollStats {
    pub fn print_summary(&self) {
        info!("Poll Statistics:");
        info!("  Total cycles: {}", self.cycles);
        info!("    Successful: {}", self.successes);
        info!("    Failed: {}", self.failures);
        info!("    Scheduled: {}", self.scheduled_polls);
        info!("    Forced: {}", self.forced_polls);
        info!("    Skipped while busy: {}", self.skipped_polls);
        info!("  Registers read: {}", self.registers_read);
        info!("  Commands:");
        info!("    Written: {}", self.commands_written);
        info!("    Already set: {}", self.commands_unchanged);
        info!("    Failed: {}", self.commands_failed);
        if let Some(last_error) = &self.last_error {
            info!("  Last error: {}", last_error);
        }
    }
}

/// Owns the poll cycle: read every span, decode, filter counters, publish.
pub struct Coordinator {
    map: Arc<RegisterMap>,
    io: Arc<dyn RegisterIo>,
    store: StateStore,
    filter: CounterFilter,
    receiver: broadcast::Receiver<ChannelData>,
    stats: Arc<Mutex<PollStats>>,
}

impl Coordinator {
    pub fn new(
        config: ConfigWrapper,
        map: Arc<RegisterMap>,
        io: Arc<dyn RegisterIo>,
        store: StateStore,
        channels: Channels,
    ) -> Self {
        // subscribe now so requests sent before start() are not lost
        let receiver = channels.to_coordinator.subscribe();
        let policy = CounterPolicy::new(config.controller().ignore_zero_counter_values());

        Self {
            map,
            io,
            store,
            filter: CounterFilter::new(policy),
            receiver,
            stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    pub fn stats(&self) -> Arc<Mutex<PollStats>> {
        self.stats.clone()
    }

    pub async fn start(mut self) -> Result<()> {
        debug!("coordinator starting");

        loop {
            match self.receiver.recv().await {
                Ok(ChannelData::Poll(reason)) => {
                    // failures are logged and counted; the loop carries on
                    let _ = self.poll(reason).await;
                    if !self.drain_backlog().await {
                        break;
                    }
                }
                Ok(ChannelData::ResetCounters(ids)) => self.reset_counters(&ids),
                Ok(ChannelData::Shutdown) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("coordinator lagged, skipped {} requests", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("coordinator shutting down, closing transport");
        self.io.close().await;

        Ok(())
    }

    /// Handles whatever arrived while a cycle was running. Scheduled polls
    /// that queued up are dropped so the next attempt comes at the normal
    /// interval. Everything else is handled in arrival order.
    /// Returns false once the loop should stop.
    async fn drain_backlog(&mut self) -> bool {
        use broadcast::error::TryRecvError;

        loop {
            match self.receiver.try_recv() {
                Ok(ChannelData::Poll(PollReason::Scheduled)) => {
                    self.with_stats(|stats| stats.skipped_polls += 1);
                }
                Ok(ChannelData::Poll(PollReason::Forced)) => {
                    let _ = self.poll(PollReason::Forced).await;
                }
                Ok(ChannelData::ResetCounters(ids)) => self.reset_counters(&ids),
                Ok(ChannelData::Shutdown) | Err(TryRecvError::Closed) => return false,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Lagged(n)) => {
                    warn!("coordinator lagged, skipped {} requests", n);
                }
            }
        }
    }

    fn reset_counters(&mut self, ids: &[CounterId]) {
        debug!("counters reset: {:?}", ids);
        self.filter.reset(ids);
    }

    /// Runs one full cycle. On failure the published snapshot is kept.
    pub async fn poll(&mut self, reason: PollReason) -> Result<Arc<ControllerSnapshot>, TransportError> {
        self.with_stats(|stats| {
            stats.cycles += 1;
            match reason {
                PollReason::Scheduled => stats.scheduled_polls += 1,
                PollReason::Forced => stats.forced_polls += 1,
            }
        });

        let result = self.cycle().await;
        self.enter(PollState::Idle);

        match &result {
            Ok(snapshot) => {
                debug!(
                    "{:?} poll ok: alarm_mode={:#06x} leak={:#06x}",
                    reason, snapshot.alarm_mode_raw, snapshot.leak_raw
                );
                self.with_stats(|stats| stats.successes += 1);
            }
            Err(e) => {
                let failures = self.store.record_failure();
                warn!("{:?} poll failed ({} in a row): {}", reason, failures, e);
                self.with_stats(|stats| {
                    stats.failures += 1;
                    stats.last_error = Some(e.to_string());
                });
            }
        }

        result
    }

    async fn cycle(&mut self) -> Result<Arc<ControllerSnapshot>, TransportError> {
        self.enter(PollState::Reading);
        let mut words = Vec::with_capacity(self.map.words_required());
        for span in self.map.spans() {
            let values = self.io.read_registers(span.start, span.count).await?;
            words.extend(values);
        }
        let words_read = words.len() as u64;
        self.with_stats(|stats| stats.registers_read += words_read);

        self.enter(PollState::Decoding);
        let now = Utc::now();
        let mut snapshot = Decoder::decode(&words, &self.map, now);
        if !snapshot.is_valid {
            return Err(TransportError::protocol(format!(
                "short read: {} of {} words",
                words.len(),
                self.map.words_required()
            )));
        }
        snapshot.counters = self.filter.apply_all(&snapshot.raw_counters, now);

        self.enter(PollState::Publishing);
        Ok(self.store.publish(snapshot))
    }

    fn enter(&self, state: PollState) {
        trace!("poll state -> {:?}", state);
        self.with_stats(|stats| stats.state = state);
    }

    fn with_stats(&self, f: impl FnOnce(&mut PollStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}
