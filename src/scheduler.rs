use crate::prelude::*;

use crate::coordinator::{ChannelData, PollReason};
use tokio::time::MissedTickBehavior;

pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    /// Requests a poll every scan interval, the first one immediately.
    pub async fn start(&self) -> Result<()> {
        let mut shutdown = self.channels.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.config.controller().scan_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self
                        .channels
                        .to_coordinator
                        .send(ChannelData::Poll(PollReason::Scheduled))
                        .is_err()
                    {
                        bail!("send(to_coordinator) failed - channel closed?");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        debug!("scheduler exiting");
        Ok(())
    }
}
