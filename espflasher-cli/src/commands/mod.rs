//! Command implementations.

mod config;
mod flash;
mod log;
mod ports;

pub(crate) use config::cmd_config;
pub(crate) use flash::{cmd_flash, cmd_read_mac};
pub(crate) use log::cmd_log;
pub(crate) use ports::cmd_list_ports;
