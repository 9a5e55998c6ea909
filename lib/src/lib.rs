// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A library for reserving and manipulating GPIO lines on Linux platforms
//! using the GPIO character device.
//!
//! A [`Request`] is a session over one chip: lines are added to it with
//! their configuration, the request is committed to the kernel, and the
//! committed request is then the channel for value and edge event
//! operations.
//!
//! A [`Chip`] provides read-only access to chip and line metadata, and can
//! watch lines for reservation and configuration changes without
//! reserving them.
//!
//! To reserve a line, read it, and wait for it to change:
//! ```no_run
//! # use gpioreq::Result;
//! use gpioreq::line::LineFlags;
//! use gpioreq::Request;
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! let mut req = Request::open("/dev/gpiochip0", "myapp", LineFlags::empty())?;
//! req.add_line(23, LineFlags::INPUT | LineFlags::EDGE_RISING, None)?;
//! req.commit()?;
//! req.fetch()?;
//! let level = req.fetched(23)?;
//! let event = req.await_event(Some(Duration::from_millis(100)))?;
//! # Ok(())
//! # }
//! ```
//!
//! All calls are synchronous and block the calling thread; the only
//! unbounded waits are the event waits when no timeout is supplied.

use gpioreq_uapi as uapi;
use std::fmt;
use std::fs::File;
use std::os::unix::io::IntoRawFd;
use std::path::PathBuf;

/// Types and functions specific to chips.
pub mod chip;

/// Types specific to lines.
pub mod line;

/// Types and functions related to requesting lines.
pub mod request;

pub use chip::Chip;
pub use request::Request;

/// The result for [`gpioreq`] functions.
///
/// [`gpioreq`]: crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`gpioreq`] functions.
///
/// [`gpioreq`]: crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device node could not be opened.
    #[error("cannot open {}: {source}", .path.display())]
    Open {
        /// The path of the device node.
        path: PathBuf,
        source: std::io::Error,
    },

    /// The line is already reserved by another consumer.
    #[error("line {offset} is reserved by \"{consumer}\"")]
    LineReserved {
        /// The offset of the line.
        offset: line::Offset,
        /// The consumer holding the line.
        consumer: String,
    },

    /// The line is not part of the request.
    #[error("line {0} is not in the request")]
    LineNotFound(line::Offset),

    /// The request cannot register any more lines.
    #[error("a request is limited to {} lines", uapi::LINES_MAX)]
    TooManyLines,

    /// No attribute record slot is available for the configuration.
    #[error("a request is limited to {} attribute records", uapi::ATTRS_MAX)]
    TooManyAttrs,

    /// An error returned from an underlying uAPI call.
    #[error("uAPI {0} returned: {1}")]
    Uapi(UapiCall, #[source] uapi::Error),

    /// The wait for an event reached its timeout.
    #[error("timed out waiting for an event")]
    Timeout,

    /// A descriptor could not be closed.
    #[error("failed to close the {0} descriptor: {1}")]
    Close(&'static str, #[source] std::io::Error),

    /// The operation requires the request to have been committed.
    #[error("the request has not been committed")]
    NotCommitted,

    /// The operation is only available before the request is committed.
    #[error("the request is already committed")]
    Committed,
}

/// Identifiers for the underlying uAPI calls.
#[doc(hidden)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UapiCall {
    ChipInfo,
    EdgeEventFromSlice,
    GetLine,
    GetLineValues,
    InfoChangeEventFromSlice,
    LineInfo,
    ReadEvent,
    SetLineConfig,
    SetLineValues,
    UnwatchLineInfo,
    WaitEvent,
    WatchLineInfo,
}

impl fmt::Display for UapiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UapiCall::ChipInfo => "chip_info",
            UapiCall::EdgeEventFromSlice => "EdgeEvent::from_slice",
            UapiCall::GetLine => "get_line",
            UapiCall::GetLineValues => "get_values",
            UapiCall::InfoChangeEventFromSlice => "InfoChangeEvent::from_slice",
            UapiCall::LineInfo => "line_info",
            UapiCall::ReadEvent => "read_event",
            UapiCall::SetLineConfig => "set_config",
            UapiCall::SetLineValues => "set_values",
            UapiCall::UnwatchLineInfo => "unwatch_line_info",
            UapiCall::WaitEvent => "wait_event",
            UapiCall::WatchLineInfo => "watch_line_info",
        };
        write!(f, "{}", name)
    }
}

/// Close a descriptor, reporting rather than discarding any failure.
///
/// Takes ownership so the descriptor cannot be closed again afterwards.
pub(crate) fn close_file(f: File, which: &'static str) -> Result<()> {
    let fd = f.into_raw_fd();
    // SAFETY: into_raw_fd relinquished ownership, so this is the only close.
    match unsafe { libc::close(fd) } {
        0 => Ok(()),
        _ => Err(Error::Close(which, std::io::Error::last_os_error())),
    }
}
