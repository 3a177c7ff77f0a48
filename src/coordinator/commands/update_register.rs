use crate::prelude::*;

use super::{map_transport_error, Edit, Outcome};
use std::sync::Arc;

/// Read-modify-write of a single holding register. The read goes to the
/// controller, not the last snapshot, so a concurrent change made at the
/// keypad is not overwritten.
pub struct UpdateRegister {
    io: Arc<dyn RegisterIo>,
    address: u16,
    edit: Edit,
}

impl UpdateRegister {
    pub fn new(io: Arc<dyn RegisterIo>, address: u16, edit: Edit) -> Self {
        Self { io, address, edit }
    }

    pub async fn run(&self) -> Result<Outcome, CommandError> {
        let current = self
            .io
            .read_registers(self.address, 1)
            .await
            .map_err(|e| map_transport_error(self.address, e))?;
        let current = *current.first().ok_or_else(|| {
            CommandError::Transport(TransportError::protocol("empty register read"))
        })?;

        let new_value = self.edit.apply(current);
        if new_value == current {
            debug!(
                "register {} already {:#06x}, skipping write",
                self.address, current
            );
            return Ok(Outcome::Unchanged);
        }

        info!(
            "register {}: {:#06x} -> {:#06x}",
            self.address, current, new_value
        );
        self.io
            .write_register(self.address, new_value)
            .await
            .map_err(|e| map_transport_error(self.address, e))?;

        Ok(Outcome::Written)
    }
}
