use crate::prelude::*;

use super::{map_transport_error, Outcome};
use std::sync::Arc;

pub struct WriteRegisters {
    io: Arc<dyn RegisterIo>,
    address: u16,
    values: Vec<u16>,
}

impl WriteRegisters {
    pub fn new(io: Arc<dyn RegisterIo>, address: u16, values: Vec<u16>) -> Self {
        Self {
            io,
            address,
            values,
        }
    }

    pub async fn run(&self) -> Result<Outcome, CommandError> {
        info!(
            "writing {} registers at {}: {:?}",
            self.values.len(),
            self.address,
            self.values
        );

        self.io
            .write_registers(self.address, &self.values)
            .await
            .map_err(|e| map_transport_error(self.address, e))?;

        Ok(Outcome::Written)
    }
}
