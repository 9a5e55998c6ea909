// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::line::{self, Offset};
use crate::{close_file, Error, Result, UapiCall};
use gpioreq_uapi as uapi;
use std::fs::File;
use std::mem;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A GPIO character device, open for metadata access and line watching.
///
/// A chip never reserves lines; it reads chip and line information, and
/// can watch lines for reservation and configuration changes made by any
/// consumer. Reserving lines is the job of a
/// [`Request`](crate::request::Request).
///
/// The chip metadata is queried once, at open.
#[derive(Debug)]
pub struct Chip {
    /// The resolved path of the chip device.
    path: PathBuf,

    /// The open chip device file.
    f: File,

    /// The metadata snapshot taken at open.
    info: Info,
}

/// The publicly available information for a GPIO chip.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Info {
    /// The system name for the chip, such as "*gpiochip0*".
    pub name: String,

    /// A functional name for the chip.
    ///
    /// This typically identifies the type of GPIO chip.
    pub label: String,

    /// The number of lines provided by the chip.
    pub num_lines: u32,
}

impl From<uapi::ChipInfo> for Info {
    fn from(ci: uapi::ChipInfo) -> Self {
        Info {
            name: String::from(&ci.name),
            label: String::from(&ci.label),
            num_lines: ci.num_lines,
        }
    }
}

impl Chip {
    /// Open the chip at `path`.
    ///
    /// Fails with [`Error::Open`] if the device cannot be opened, or with
    /// a uAPI error if it does not answer the chip metadata query - which
    /// is what distinguishes a GPIO character device from any other file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Chip> {
        let path = path.as_ref().to_path_buf();
        let f = File::options()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;
        let info = uapi::chip_info(&f)
            .map(Info::from)
            .map_err(|e| Error::Uapi(UapiCall::ChipInfo, e))?;
        Ok(Chip { path, f, info })
    }

    /// The kernel name of the chip.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// The functional label of the chip.
    pub fn label(&self) -> &str {
        &self.info.label
    }

    /// The number of lines provided by the chip.
    pub fn num_lines(&self) -> u32 {
        self.info.num_lines
    }

    /// The path of the chip device.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The metadata snapshot taken when the chip was opened.
    pub fn info(&self) -> &Info {
        &self.info
    }

    /// Get the publicly available information for a line.
    ///
    /// The returned record is owned by the caller.
    pub fn line_info(&self, offset: Offset) -> Result<line::Info> {
        uapi::line_info(&self.f, offset)
            .map(|li| line::Info::from(&li))
            .map_err(|e| Error::Uapi(UapiCall::LineInfo, e))
    }

    /// Add a watch for changes to the information of a line.
    ///
    /// Repeatable to watch multiple lines on the one chip; change events
    /// are then collected with
    /// [`await_info_change`](Chip::await_info_change).
    ///
    /// Returns the current state of the line information. A null
    /// operation if the line is already watched.
    pub fn watch_line(&self, offset: Offset) -> Result<line::Info> {
        uapi::watch_line_info(&self.f, offset)
            .map(|li| line::Info::from(&li))
            .map_err(|e| Error::Uapi(UapiCall::WatchLineInfo, e))
    }

    /// Remove any watch on changes to the information of a line.
    ///
    /// A null operation if the line is not watched.
    pub fn unwatch_line(&self, offset: Offset) -> Result<()> {
        uapi::unwatch_line_info(&self.f, offset)
            .map_err(|e| Error::Uapi(UapiCall::UnwatchLineInfo, e))
    }

    /// Wait for and read one change event from the watched lines.
    ///
    /// With a timeout the call waits for the chip descriptor to become
    /// readable, returning [`Error::Timeout`] if it does not; without one
    /// the read itself blocks until a change arrives. Exactly one event is
    /// consumed per call and returned owned.
    pub fn await_info_change(&self, timeout: Option<Duration>) -> Result<line::InfoChangeEvent> {
        if timeout.is_some() {
            match uapi::wait_event(&self.f, timeout) {
                Ok(true) => (),
                Ok(false) => return Err(Error::Timeout),
                Err(e) => return Err(Error::Uapi(UapiCall::WaitEvent, e)),
            }
        }
        let mut buf = [0_u64; mem::size_of::<uapi::InfoChangeEvent>() / 8];
        let n =
            uapi::read_event(&self.f, &mut buf).map_err(|e| Error::Uapi(UapiCall::ReadEvent, e))?;
        let ice = uapi::InfoChangeEvent::from_slice(&buf[..n])
            .map_err(|e| Error::Uapi(UapiCall::InfoChangeEventFromSlice, e))?;
        line::InfoChangeEvent::try_from(ice)
    }

    /// Release the chip, closing its descriptor.
    ///
    /// Dropping the chip also releases it; use `close` to observe a close
    /// failure rather than discard it.
    pub fn close(self) -> Result<()> {
        close_file(self.f, "chip")
    }
}

impl AsFd for Chip {
    #[inline]
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.f.as_fd()
    }
}

impl AsRawFd for Chip {
    #[inline]
    fn as_raw_fd(&self) -> i32 {
        self.f.as_raw_fd()
    }
}
