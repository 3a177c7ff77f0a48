use crate::prelude::*;

use crate::coordinator::commands::{
    update_register::UpdateRegister, write_registers::WriteRegisters, Outcome, RegisterOp,
};
use crate::coordinator::{PollReason, PollStats};

use std::sync::{Arc, Mutex};

/// Turns commands into register writes and asks the coordinator for a
/// confirmation poll afterwards. Never touches the state store itself.
#[derive(Clone)]
pub struct CommandWriter {
    map: Arc<RegisterMap>,
    io: Arc<dyn RegisterIo>,
    channels: Channels,
    read_only: bool,
    // serializes read-modify-write sequences against each other
    lock: Arc<tokio::sync::Mutex<()>>,
    stats: Arc<Mutex<PollStats>>,
}

impl CommandWriter {
    pub fn new(
        config: &ConfigWrapper,
        map: Arc<RegisterMap>,
        io: Arc<dyn RegisterIo>,
        channels: Channels,
        stats: Arc<Mutex<PollStats>>,
    ) -> Self {
        Self {
            map,
            io,
            channels,
            read_only: config.controller().read_only(),
            lock: Arc::new(tokio::sync::Mutex::new(())),
            stats,
        }
    }

    pub async fn write(&self, command: Command) -> Result<(), CommandError> {
        let result = self.run(&command).await;

        match &result {
            Ok(Outcome::Written) => {
                info!("command {:?} written", command);
                self.with_stats(|stats| stats.commands_written += 1);
            }
            Ok(Outcome::Unchanged) => {
                info!("command {:?}: already set", command);
                self.with_stats(|stats| stats.commands_unchanged += 1);
            }
            Err(e) => {
                warn!("command {:?} failed: {}", command, e);
                self.with_stats(|stats| stats.commands_failed += 1);
            }
        }

        result.map(|_| ())
    }

    async fn run(&self, command: &Command) -> Result<Outcome, CommandError> {
        if self.read_only {
            return Err(CommandError::ReadOnly);
        }

        let op = command.resolve(&self.map)?;

        let outcome = {
            let _guard = self.lock.lock().await;
            match op {
                RegisterOp::Modify { address, edit } => {
                    UpdateRegister::new(self.io.clone(), address, edit).run().await?
                }
                RegisterOp::WriteMany { address, values } => {
                    WriteRegisters::new(self.io.clone(), address, values).run().await?
                }
            }
        };

        if outcome == Outcome::Written {
            let resets = command.resets();
            if !resets.is_empty() {
                self.send(coordinator::ChannelData::ResetCounters(resets));
            }
            self.send(coordinator::ChannelData::Poll(PollReason::Forced));
        }

        Ok(outcome)
    }

    fn send(&self, data: coordinator::ChannelData) {
        if self.channels.to_coordinator.send(data).is_err() {
            warn!("send(to_coordinator) failed - coordinator not running?");
        }
    }

    fn with_stats(&self, f: impl FnOnce(&mut PollStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}
