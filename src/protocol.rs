//! Inverter ASCII protocol: the query catalogue and the wire frames.

pub mod command;
pub mod frame;

pub use self::command::{Command, Query};
