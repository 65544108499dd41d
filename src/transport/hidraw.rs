use std::{
    fs::{File, OpenOptions, TryLockError},
    io,
    os::unix::fs::OpenOptionsExt,
    path::PathBuf,
};

use crate::{prelude::*, transport::Connector};

/// Inverter attached as a character device, usually `/dev/hidraw0` or a USB serial adapter.
pub struct Hidraw {
    path: PathBuf,
}

impl Hidraw {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Connector for Hidraw {
    type Link = File;

    #[instrument(skip_all, level = Level::DEBUG, fields(path = %self.path.display()))]
    fn open(&self) -> io::Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(&self.path)?;
        file.try_lock().map_err(|error| match error {
            TryLockError::Error(error) => error,
            TryLockError::WouldBlock => io::Error::other("the device is locked by another process"),
        })?;
        debug!("opened");
        Ok(file)
    }
}
