pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::broadcast;

pub use crate::{
    channels::Channels,
    command::Command,
    config,
    config::ConfigWrapper,
    coordinator,
    error::{CommandError, ConfigError, TransportError, TransportErrorKind},
    modbus,
    modbus::transport::RegisterIo,
    register::RegisterMap,
    snapshot::{ControllerSnapshot, CounterId},
    state_store,
    state_store::StateStore,
};
