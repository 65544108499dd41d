//! Byte-stream access to the inverter.
//!
//! The link is opened non-blocking: a read with nothing pending reports
//! [`std::io::ErrorKind::WouldBlock`] or zero bytes, both of which mean «try again later».

mod hidraw;
mod session;
mod strategy;
#[cfg(test)]
pub mod testing;

use std::io::{Read, Write};

pub use self::{
    hidraw::Hidraw,
    session::Session,
    strategy::WriteStrategy,
};

/// Opens a fresh exclusive link to the device.
pub trait Connector {
    type Link: Read + Write;

    fn open(&self) -> std::io::Result<Self::Link>;
}
