pub mod update_register;
pub mod validation;
pub mod write_registers;

pub use validation::*;

use crate::bits;
use crate::prelude::*;

/// How a command changes one register, given its current value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Edit {
    Set(u16),
    Clear(u16),
    Field { shift: u8, width: u8, value: u16 },
    /// Zone 1 valve, which drags zone 2 along outside dual zone mode.
    Zone1(bool),
}

impl Edit {
    pub fn apply(&self, current: u16) -> u16 {
        match *self {
            Edit::Set(mask) => current | mask,
            Edit::Clear(mask) => current & !mask,
            Edit::Field {
                shift,
                width,
                value,
            } => bits::with_field(current, shift, width, value),
            Edit::Zone1(open) => bits::set_zone_1(current, open),
        }
    }

    pub fn flag(mask: u16, on: bool) -> Self {
        if on {
            Edit::Set(mask)
        } else {
            Edit::Clear(mask)
        }
    }
}

/// Register-level plan for one command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RegisterOp {
    /// Read, edit, write back if changed.
    Modify { address: u16, edit: Edit },
    /// Blind multi-register write.
    WriteMany { address: u16, values: Vec<u16> },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Written,
    /// Register already held the requested value; nothing was sent.
    Unchanged,
}

pub(crate) fn map_transport_error(address: u16, err: TransportError) -> CommandError {
    match err.kind {
        TransportErrorKind::Exception(code) => CommandError::Rejected { address, code },
        _ => CommandError::Transport(err),
    }
}
