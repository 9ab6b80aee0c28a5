// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Serial bus link.
//
// The device is opened non-blocking. With `raw_mode` the line is switched
// to raw 8N1 without flow control; otherwise the caller is expected to have
// configured it already (e.g. via `stty`).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};

use super::{read_status, write_status, Link, ReadStatus, WriteStatus};

/// Non-blocking handle on a serial device.
#[derive(Debug)]
pub struct SerialLink {
    device_path: String,
    file: File,
}

impl SerialLink {
    /// Open `device_path` read/write, non-blocking.
    pub fn open(device_path: &str, raw_mode: bool) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK);
        }
        let file = options.open(device_path)?;

        if raw_mode {
            configure_raw(&file)?;
        }

        tracing::debug!("Serial device {} opened (raw_mode={})", device_path, raw_mode);
        Ok(Self {
            device_path: device_path.to_string(),
            file,
        })
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

impl Link for SerialLink {
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus> {
        read_status(self.file.read(buf))
    }

    fn write_nonblocking(&mut self, data: &[u8]) -> io::Result<WriteStatus> {
        write_status(self.file.write(data))
    }
}

/// Raw mode, one stop bit, no flow control, receiver on, modem lines
/// ignored, VMIN=1 / VTIME=1, pending input flushed.
#[cfg(unix)]
fn configure_raw(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // SAFETY: `fd` is a valid open descriptor owned by `file` for the whole
    // call, and `settings` is a plain C struct fully initialized by
    // tcgetattr before use.
    unsafe {
        let mut settings: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut settings) < 0 {
            return Err(io::Error::last_os_error());
        }

        libc::cfmakeraw(&mut settings);
        settings.c_cflag &= !libc::CSTOPB;
        settings.c_cflag &= !libc::CRTSCTS;
        settings.c_cc[libc::VMIN] = 1;
        settings.c_cc[libc::VTIME] = 1;
        settings.c_cflag |= libc::CREAD | libc::CLOCAL;

        if libc::tcflush(fd, libc::TCIFLUSH) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &settings) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn configure_raw(_file: &File) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "raw serial mode is only supported on unix",
    ))
}
