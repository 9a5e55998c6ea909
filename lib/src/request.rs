// SPDX-License-Identifier: Apache-2.0 OR MIT

mod attrs;
use self::attrs::AttrBank;

use crate::line::{self, LineFlags, Offset};
use crate::{close_file, Error, Result, UapiCall};
use gpioreq_uapi as uapi;
use std::fs::File;
use std::mem;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A request session over a set of lines on one chip.
///
/// A request is created with [`open`], lines are added to it with
/// [`add_line`], and [`commit`] then reserves the lines and applies the
/// accumulated configuration. Values and edge events flow through the
/// committed request until it is dropped or explicitly closed.
///
/// # Output lifetime
///
/// The value of an output line is only guaranteed while the request is
/// live. Once the request is closed the line is released and its state is
/// up to the kernel driver for the hardware.
///
/// # Lifecycle
///
/// Before [`commit`] the request owns a descriptor for the chip device;
/// afterwards it owns the descriptor for the acquired line handle. The two
/// never coexist outside the commit call itself. Lines can only be added
/// while configuring; flags of already registered lines may be changed at
/// any time and pushed to the kernel with [`reconfigure`].
///
/// [`open`]: Request::open
/// [`add_line`]: Request::add_line
/// [`commit`]: Request::commit
/// [`reconfigure`]: Request::reconfigure
#[derive(Debug)]
pub struct Request {
    channel: Channel,

    /// The resolved path of the chip device.
    path: PathBuf,

    /// The consumer label presented to the kernel at commit.
    consumer: String,

    /// Flags applying to every line not overridden by an attribute record.
    base_flags: LineFlags,

    /// The registered lines; a line's index is its position here.
    lines: Vec<Line>,

    /// The per-line configuration, packed into shared records.
    attrs: AttrBank,

    /// The mask and bits scratch for value operations.
    values: uapi::Values,

    /// Kernel edge-event buffer size hint; zero selects the default.
    event_buffer_size: u32,
}

/// The descriptor a request operates through.
///
/// Exactly one of the two exists at any time; `commit` is the only
/// transition.
#[derive(Debug)]
enum Channel {
    /// The chip device, from open until commit.
    Configuring(File),

    /// The acquired line handle, from commit on.
    Committed(File),
}

#[derive(Clone, Debug)]
struct Line {
    offset: Offset,
    /// The chip-supplied name, captured at registration.
    name: String,
}

impl Request {
    /// Open the chip at `path` and start a request session on it.
    ///
    /// * `consumer` - The label to reserve lines under.
    /// * `base_flags` - The flags applied to every line that does not set
    ///   its own.
    pub fn open<P: AsRef<Path>>(path: P, consumer: &str, base_flags: LineFlags) -> Result<Request> {
        let path = path.as_ref().to_path_buf();
        let f = File::options()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Request {
            channel: Channel::Configuring(f),
            path,
            consumer: consumer.into(),
            base_flags,
            lines: Vec::new(),
            attrs: AttrBank::default(),
            values: uapi::Values::default(),
            event_buffer_size: 0,
        })
    }

    /// Add a line to the request, or update the configuration of a line
    /// already in it.
    ///
    /// A new line is checked against the device: the call fails with
    /// [`Error::LineReserved`] if another consumer already holds it. Its
    /// index is its position of first registration and never changes.
    ///
    /// Empty `flags` leave the line on the request's base flags. If
    /// `flags` contains [`LineFlags::OUTPUT`] then `initial`, when given,
    /// becomes the value the line drives once committed.
    ///
    /// Returns the chip-supplied name of the line, which may be empty.
    ///
    /// A call that fails leaves the request as it was: capacity of both
    /// the line registry and the attribute records is verified before
    /// anything is recorded.
    pub fn add_line(
        &mut self,
        offset: Offset,
        flags: LineFlags,
        initial: Option<bool>,
    ) -> Result<String> {
        let wants_value = flags.contains(LineFlags::OUTPUT) && initial.is_some();
        if let Some(idx) = self.line_index(offset) {
            if !self
                .attrs
                .can_apply(idx, (!flags.is_empty()).then_some(flags), wants_value)
            {
                return Err(Error::TooManyAttrs);
            }
            self.apply_line_config(idx, flags, initial)?;
            self.values.select(idx);
            return Ok(self.lines[idx].name.clone());
        }

        // a new line needs the chip device to vet it
        let dev = match &self.channel {
            Channel::Configuring(f) => f,
            Channel::Committed(_) => return Err(Error::Committed),
        };
        if self.lines.len() >= uapi::LINES_MAX {
            return Err(Error::TooManyLines);
        }
        let li = uapi::line_info(dev, offset).map_err(|e| Error::Uapi(UapiCall::LineInfo, e))?;
        if !li.consumer.is_empty() {
            return Err(Error::LineReserved {
                offset,
                consumer: String::from(&li.consumer),
            });
        }
        let idx = self.lines.len();
        if !self
            .attrs
            .can_apply(idx, (!flags.is_empty()).then_some(flags), wants_value)
        {
            return Err(Error::TooManyAttrs);
        }

        // nothing can fail from here on
        let name = String::from(&li.name);
        self.lines.push(Line {
            offset,
            name: name.clone(),
        });
        self.apply_line_config(idx, flags, initial)?;
        self.values.select(idx);
        Ok(name)
    }

    // Route a line's settings into the attribute records. Capacity has
    // already been vetted by the caller via can_apply.
    fn apply_line_config(
        &mut self,
        idx: usize,
        flags: LineFlags,
        initial: Option<bool>,
    ) -> Result<()> {
        if !flags.is_empty() {
            self.attrs.set_flags(idx, flags)?;
        }
        if flags.contains(LineFlags::OUTPUT) {
            if let Some(value) = initial {
                self.attrs.set_output_value(idx, value)?;
            }
        }
        Ok(())
    }

    /// Set the debounce period for a line already in the request.
    ///
    /// Takes effect at the next [`commit`](Request::commit) or
    /// [`reconfigure`](Request::reconfigure).
    pub fn set_debounce(&mut self, offset: Offset, period: Duration) -> Result<()> {
        let idx = self.line_index(offset).ok_or(Error::LineNotFound(offset))?;
        self.attrs.set_debounce(idx, period)
    }

    /// Suggest a minimum kernel buffer size for edge events.
    ///
    /// Only a hint, and only relevant for lines with edge detection.
    /// Must be set before the request is committed.
    pub fn set_event_buffer_size(&mut self, size: u32) -> Result<()> {
        if let Channel::Committed(_) = self.channel {
            return Err(Error::Committed);
        }
        self.event_buffer_size = size;
        Ok(())
    }

    /// Reserve the registered lines and apply the accumulated
    /// configuration.
    ///
    /// Two control-calls are made: the line handle is acquired under the
    /// base flags, then the full attribute set is pushed onto it. If
    /// either fails the request is left configuring, exactly as before
    /// the call.
    ///
    /// On success the chip descriptor is closed and the request operates
    /// through the line handle. A failure to close the spent chip
    /// descriptor is reported as [`Error::Close`]; the request is
    /// nonetheless committed and operable.
    pub fn commit(&mut self) -> Result<()> {
        let dev = match &self.channel {
            Channel::Configuring(f) => f,
            Channel::Committed(_) => return Err(Error::Committed),
        };
        let mut lr = uapi::LineRequest {
            consumer: self.consumer.as_str().into(),
            num_lines: self.lines.len() as u32,
            event_buffer_size: self.event_buffer_size,
            ..Default::default()
        };
        lr.config.flags = self.base_flags;
        for (idx, line) in self.lines.iter().enumerate() {
            lr.offsets.set(idx, line.offset);
        }
        let handle = uapi::get_line(dev, lr).map_err(|e| Error::Uapi(UapiCall::GetLine, e))?;
        let cfg = self.attrs.as_config(self.base_flags);
        // on failure the handle drops here, releasing the lines again
        uapi::set_config(&handle, &cfg).map_err(|e| Error::Uapi(UapiCall::SetLineConfig, e))?;

        let spent = mem::replace(&mut self.channel, Channel::Committed(handle));
        if let Channel::Configuring(dev) = spent {
            close_file(dev, "device")?;
        }
        Ok(())
    }

    /// Push the current attribute set to the committed line handle.
    ///
    /// Lets flag, output value and debounce changes made since the commit
    /// take effect without re-acquiring the lines. Idempotent.
    pub fn reconfigure(&self) -> Result<()> {
        let handle = self.committed_fd()?;
        let cfg = self.attrs.as_config(self.base_flags);
        uapi::set_config(handle, &cfg).map_err(|e| Error::Uapi(UapiCall::SetLineConfig, e))
    }

    /// Refresh the values of all selected lines from the hardware.
    ///
    /// The refreshed bits are read back with [`fetched`] or
    /// [`fetched_by_index`].
    ///
    /// [`fetched`]: Request::fetched
    /// [`fetched_by_index`]: Request::fetched_by_index
    pub fn fetch(&mut self) -> Result<()> {
        let handle = match &self.channel {
            Channel::Committed(f) => f,
            Channel::Configuring(_) => return Err(Error::NotCommitted),
        };
        uapi::get_values(handle, &mut self.values)
            .map_err(|e| Error::Uapi(UapiCall::GetLineValues, e))
    }

    /// Stage a value for an output line and select it for the next
    /// [`set`](Request::set).
    ///
    /// Initial output values belong in [`add_line`](Request::add_line);
    /// this is for driving a line that is already committed.
    pub fn set_line_value(&mut self, offset: Offset, value: bool) -> Result<()> {
        let idx = self.line_index(offset).ok_or(Error::LineNotFound(offset))?;
        self.values.set(idx, value);
        Ok(())
    }

    /// Push the staged values of all selected lines to the hardware.
    pub fn set(&self) -> Result<()> {
        let handle = self.committed_fd()?;
        uapi::set_values(handle, &self.values)
            .map_err(|e| Error::Uapi(UapiCall::SetLineValues, e))
    }

    /// The last fetched (or staged) value of a line.
    ///
    /// Only meaningful for lines selected in the mask at the last
    /// [`fetch`](Request::fetch).
    pub fn fetched(&self, offset: Offset) -> Result<bool> {
        let idx = self.line_index(offset).ok_or(Error::LineNotFound(offset))?;
        Ok(self.values.get(idx).unwrap_or(false))
    }

    /// The last fetched (or staged) value of the line at `index`, with its
    /// offset.
    pub fn fetched_by_index(&self, index: usize) -> Option<(Offset, bool)> {
        let line = self.lines.get(index)?;
        Some((line.offset, self.values.get(index).unwrap_or(false)))
    }

    /// Select a line for subsequent [`fetch`](Request::fetch) and
    /// [`set`](Request::set) operations.
    ///
    /// Lines are selected by default when added.
    pub fn select(&mut self, offset: Offset) -> Result<()> {
        let idx = self.line_index(offset).ok_or(Error::LineNotFound(offset))?;
        self.values.select(idx);
        Ok(())
    }

    /// Drop a line from subsequent [`fetch`](Request::fetch) and
    /// [`set`](Request::set) operations.
    pub fn deselect(&mut self, offset: Offset) -> Result<()> {
        let idx = self.line_index(offset).ok_or(Error::LineNotFound(offset))?;
        self.values.deselect(idx);
        Ok(())
    }

    /// Wait for and read one edge event from the committed request.
    ///
    /// With a timeout the call waits for the handle to become readable,
    /// returning [`Error::Timeout`] if it does not; without one the read
    /// itself blocks until an event arrives. Exactly one event is consumed
    /// per call and returned owned.
    pub fn await_event(&self, timeout: Option<Duration>) -> Result<line::EdgeEvent> {
        let handle = self.committed_fd()?;
        if timeout.is_some() {
            match uapi::wait_event(handle, timeout) {
                Ok(true) => (),
                Ok(false) => return Err(Error::Timeout),
                Err(e) => return Err(Error::Uapi(UapiCall::WaitEvent, e)),
            }
        }
        let mut buf = [0_u64; mem::size_of::<uapi::EdgeEvent>() / 8];
        let n =
            uapi::read_event(handle, &mut buf).map_err(|e| Error::Uapi(UapiCall::ReadEvent, e))?;
        let ee = uapi::EdgeEvent::from_slice(&buf[..n])
            .map_err(|e| Error::Uapi(UapiCall::EdgeEventFromSlice, e))?;
        line::EdgeEvent::try_from(ee)
    }

    /// Release the request, closing whichever descriptor it holds.
    ///
    /// Dropping the request also releases it; use `close` to observe a
    /// close failure rather than discard it.
    pub fn close(self) -> Result<()> {
        match self.channel {
            Channel::Configuring(f) => close_file(f, "device"),
            Channel::Committed(f) => close_file(f, "line handle"),
        }
    }

    /// The path of the chip this request operates on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The consumer label lines are reserved under.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// The number of registered lines.
    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    /// The offsets of the registered lines, in registration order.
    pub fn offsets(&self) -> Vec<Offset> {
        self.lines.iter().map(|l| l.offset).collect()
    }

    /// The index of a line within the request, assigned at first
    /// registration.
    pub fn line_index(&self, offset: Offset) -> Option<usize> {
        self.lines.iter().position(|l| l.offset == offset)
    }

    /// The cached chip-supplied name of a registered line.
    pub fn line_name(&self, offset: Offset) -> Option<&str> {
        self.line_index(offset).map(|i| self.lines[i].name.as_str())
    }

    /// Whether the request has been committed.
    pub fn is_committed(&self) -> bool {
        matches!(self.channel, Channel::Committed(_))
    }

    fn committed_fd(&self) -> Result<&File> {
        match &self.channel {
            Channel::Committed(f) => Ok(f),
            Channel::Configuring(_) => Err(Error::NotCommitted),
        }
    }
}

impl AsFd for Request {
    #[inline]
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.channel {
            Channel::Configuring(f) | Channel::Committed(f) => f.as_fd(),
        }
    }
}

impl AsRawFd for Request {
    #[inline]
    fn as_raw_fd(&self) -> i32 {
        match &self.channel {
            Channel::Configuring(f) | Channel::Committed(f) => f.as_raw_fd(),
        }
    }
}
