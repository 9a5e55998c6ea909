// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A thin but safe Rust layer over the Linux GPIO character device uAPI.
//!
//! Only the current (v2) ABI, released in Linux v5.10, is spoken here.
//! The structs mirror the kernel wire layout exactly and anything read
//! back from the kernel is validated before being handed to the caller.

use bitflags::bitflags;
use ioctl_sys::{ior, iorw};
use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io::Error as IoError;
use std::mem::{size_of, MaybeUninit};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::ptr;
use std::slice;
use std::time::Duration;

/// The ioctl identity of the GPIO subsystem.
const IOCTL_MAGIC: u32 = 0xB4;

#[repr(u8)]
enum Ioctl {
    ChipInfo = 1,
    LineInfo = 5,
    WatchLineInfo = 6,
    GetLine = 7,
    UnwatchLineInfo = 0xC,
    SetLineConfig = 0xD,
    GetLineValues = 0xE,
    SetLineValues = 0xF,
}

/// The result returned by [`gpioreq_uapi`] functions.
///
/// [`gpioreq_uapi`]: crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`gpioreq_uapi`] functions.
///
/// [`gpioreq_uapi`]: crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error returned from an underlying system call.
    #[error(transparent)]
    Os(#[from] IoError),

    /// A struct read from the kernel failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An event read returned fewer bytes than one event record.
    #[error(transparent)]
    UnderRead(#[from] UnderReadError),

    /// The descriptor polled ready without being readable.
    #[error("descriptor ready with unexpected events: {0:#x}")]
    UnexpectedPollEvents(i16),
}

impl Error {
    fn from_errno() -> Error {
        Error::Os(IoError::last_os_error())
    }
}

/// Result returned by struct validators.
type ValidationResult = std::result::Result<(), ValidationError>;

/// A failure to validate a struct returned from a system call.
//
// Only seen if a kernel update adds a discriminant we are unaware of.
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[error("kernel returned invalid {field}: {msg}")]
pub struct ValidationError {
    pub field: String,
    pub msg: String,
}

impl ValidationError {
    pub fn new<S: Into<String>, T: Into<String>>(field: S, msg: T) -> ValidationError {
        ValidationError {
            field: field.into(),
            msg: msg.into(),
        }
    }
}

/// A read that returned less than a complete event record.
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[error("short read of {kind}: expected {expected} bytes, got {actual}")]
pub struct UnderReadError {
    /// The record being read.
    pub kind: &'static str,
    pub expected: usize,
    pub actual: usize,
}

impl UnderReadError {
    pub fn new(kind: &'static str, expected: usize, actual: usize) -> UnderReadError {
        UnderReadError {
            kind,
            expected,
            actual,
        }
    }
}

/// The maximum number of bytes stored in a [`Name`], including any
/// terminating NUL.
pub const NAME_LEN_MAX: usize = 32;

/// The maximum number of lines in one request.
pub const LINES_MAX: usize = 64;

/// The number of attribute record slots in a request or line info.
pub const ATTRS_MAX: usize = 10;

/// An identifier for a line on a particular chip.
///
/// Valid offsets are in the range 0..`num_lines` as reported in the
/// [`ChipInfo`].
pub type Offset = u32;

/// A fixed-size NUL-padded name string.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Name([u8; NAME_LEN_MAX]);

impl Name {
    /// Checks whether the name is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    /// The length of the contained name.
    #[inline]
    pub fn strlen(&self) -> usize {
        self.0.iter().position(|&x| x == 0).unwrap_or(self.0.len())
    }

    /// View the contained name as an [`OsStr`] slice.
    pub fn as_os_str(&self) -> &OsStr {
        // SAFETY: the slice is bounded by strlen, which never exceeds the array.
        unsafe { OsStr::from_bytes(slice::from_raw_parts(&self.0[0], self.strlen())) }
    }
}

impl From<&str> for Name {
    /// Truncates to the wire length, as the kernel itself would.
    fn from(s: &str) -> Name {
        let mut n: Name = Default::default();
        for (src, dst) in s.as_bytes().iter().zip(n.0.iter_mut()) {
            *dst = *src;
        }
        // keep the final byte NUL so the kernel always sees a terminator
        n.0[NAME_LEN_MAX - 1] = 0;
        n
    }
}

impl From<&Name> for String {
    fn from(n: &Name) -> String {
        n.as_os_str().to_string_lossy().into_owned()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_os_str().to_string_lossy())
    }
}

/// The offsets of the lines belonging to a request, in registration order.
#[repr(C)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Offsets([Offset; LINES_MAX]);

impl Offsets {
    /// Create offsets from a slice, zero-filling the remainder.
    pub fn from_slice(s: &[Offset]) -> Self {
        let mut o: Offsets = Default::default();
        for (src, dst) in s.iter().zip(o.0.iter_mut()) {
            *dst = *src;
        }
        o
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Offset {
        self.0[idx]
    }

    #[inline]
    pub fn set(&mut self, idx: usize, offset: Offset) {
        self.0[idx] = offset;
    }
}

impl Default for Offsets {
    fn default() -> Self {
        Offsets([0; LINES_MAX])
    }
}

/// Space the ABI reserves for future use; must be zero filled.
///
/// Sized in multiples of u32 words.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[doc(hidden)]
pub struct Padding<const SIZE: usize>([u32; SIZE]);

impl<const SIZE: usize> Default for Padding<SIZE> {
    fn default() -> Self {
        Padding([0; SIZE])
    }
}

/// Information about a particular GPIO chip.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChipInfo {
    /// The Linux kernel name of this GPIO chip.
    pub name: Name,

    /// A functional name for this GPIO chip, such as a product number.
    ///
    /// May be empty.
    pub label: Name,

    /// The number of GPIO lines on this chip.
    pub num_lines: u32,
}

/// Get the publicly available information for a chip.
///
/// * `cf` - The open chip device file.
pub fn chip_info(cf: &File) -> Result<ChipInfo> {
    let mut ci = MaybeUninit::<ChipInfo>::uninit();
    // SAFETY: the returned struct contains only byte arrays and an integer,
    // all of which are valid for any bit pattern.
    match unsafe {
        libc::ioctl(
            cf.as_raw_fd(),
            ior!(IOCTL_MAGIC, Ioctl::ChipInfo as u8, size_of::<ChipInfo>()) as libc::c_ulong,
            ci.as_mut_ptr(),
        )
    } {
        0 => Ok(unsafe { ci.assume_init() }),
        _ => Err(Error::from_errno()),
    }
}

bitflags! {
    /// Flags describing the configuration of a line.
    ///
    /// Used both as the base flags of a request and as the payload of a
    /// FLAGS attribute record, where the attribute takes precedence.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct LineFlags: u64 {
        /// The line is in use and is not available for request.
        const USED = 1;

        /// The line active state corresponds to a physical low.
        const ACTIVE_LOW = 2;

        /// The line is an input.
        const INPUT = 4;

        /// The line is an output.
        const OUTPUT = 8;

        /// The line detects rising (*inactive* to *active*) edges.
        const EDGE_RISING = 16;

        /// The line detects falling (*active* to *inactive*) edges.
        const EDGE_FALLING = 32;

        /// The line is an open drain output.
        const OPEN_DRAIN = 64;

        /// The line is an open source output.
        const OPEN_SOURCE = 128;

        /// The line has pull-up bias enabled.
        const BIAS_PULL_UP = 256;

        /// The line has pull-down bias enabled.
        const BIAS_PULL_DOWN = 512;

        /// The line has bias disabled.
        const BIAS_DISABLED = 1024;

        /// The line events contain **CLOCK_REALTIME** timestamps.
        const EVENT_CLOCK_REALTIME = 2048;

        /// The line events contain hardware timestamp engine timestamps.
        const EVENT_CLOCK_HTE = 4096;
    }
}

/// The identifier tagging which field of an attribute payload is in use.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AttrId {
    /// The attribute slot is inactive.
    #[default]
    Unused = 0,

    /// The payload is a set of line flags.
    Flags = 1,

    /// The payload is a bitmap of output values.
    Values = 2,

    /// The payload is a debounce period in microseconds.
    Debounce = 3,
}

impl TryFrom<u32> for AttrId {
    type Error = String;

    fn try_from(v: u32) -> std::result::Result<Self, Self::Error> {
        Ok(match v {
            0 => AttrId::Unused,
            1 => AttrId::Flags,
            2 => AttrId::Values,
            3 => AttrId::Debounce,
            _ => return Err(format!("invalid value: {v}")),
        })
    }
}

/// The raw payload of a line attribute.
///
/// Which field is live is determined by the id alongside it in the
/// [`LineAttr`].
#[repr(C)]
#[derive(Clone, Copy)]
pub union AttrPayload {
    /// Line configuration flags.
    pub flags: u64,

    /// Output values, one bit per line index.
    pub values: u64,

    /// The debounce period, in microseconds.
    pub debounce_period_us: u32,
}

impl Default for AttrPayload {
    fn default() -> Self {
        AttrPayload { flags: 0 }
    }
}

/// A configurable attribute of a line.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct LineAttr {
    /// The [`AttrId`] discriminant identifying the payload, as a raw wire
    /// value.
    pub id: u32,

    /// Reserved for future use and must be zero filled.
    #[doc(hidden)]
    pub padding: Padding<1>,

    /// The attribute payload.
    pub payload: AttrPayload,
}

impl LineAttr {
    /// Make this attribute a flags attribute.
    pub fn set_flags(&mut self, flags: LineFlags) {
        self.id = AttrId::Flags as u32;
        self.payload.flags = flags.bits();
    }

    /// Make this attribute an output values attribute.
    pub fn set_values(&mut self, values: u64) {
        self.id = AttrId::Values as u32;
        self.payload.values = values;
    }

    /// Make this attribute a debounce period attribute.
    pub fn set_debounce_period_us(&mut self, period_us: u32) {
        self.id = AttrId::Debounce as u32;
        self.payload.debounce_period_us = period_us;
    }

    /// The contained payload, decoded into a safe enum.
    ///
    /// Returns `None` for an unused slot.
    pub fn value(&self) -> Option<AttrValue> {
        // SAFETY: the id is checked before the matching union field is read.
        unsafe {
            match AttrId::try_from(self.id).ok()? {
                AttrId::Unused => None,
                AttrId::Flags => Some(AttrValue::Flags(LineFlags::from_bits_retain(
                    self.payload.flags,
                ))),
                AttrId::Values => Some(AttrValue::Values(self.payload.values)),
                AttrId::Debounce => Some(AttrValue::DebouncePeriod(Duration::from_micros(
                    self.payload.debounce_period_us as u64,
                ))),
            }
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        AttrId::try_from(self.id).map(|_| ())
    }
}

impl fmt::Debug for LineAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            None => write!(f, "unused"),
            Some(v) => write!(f, "{v:?}"),
        }
    }
}

impl PartialEq for LineAttr {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.value() == other.value()
    }
}
impl Eq for LineAttr {}

/// The payload of a [`LineAttr`], decoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttrValue {
    /// The line configuration flags.
    Flags(LineFlags),

    /// The output values, one bit per line index.
    Values(u64),

    /// The debounce period.
    DebouncePeriod(Duration),
}

/// An attribute record shared by one or more of the lines of a request.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConfigAttr {
    /// The attribute.
    pub attr: LineAttr,

    /// The lines the attribute applies to, with each bit number
    /// corresponding to an index into [`LineRequest::offsets`].
    pub mask: u64,
}

/// Configuration for a set of requested lines.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// The flags applying to all requested lines unless overridden by an
    /// attribute record.
    pub flags: LineFlags,

    /// The number of records active in `attrs`.
    pub num_attrs: u32,

    /// Reserved for future use and must be zero filled.
    #[doc(hidden)]
    pub padding: Padding<5>,

    /// The attribute records associated with the requested lines.
    ///
    /// Only the first `num_attrs` entries are active.
    ///
    /// A line should be claimed by at most one record of a given kind; if
    /// it is claimed by several, the kernel gives the lowest index
    /// precedence.
    pub attrs: [ConfigAttr; ATTRS_MAX],
}

/// Apply a new configuration to an existing line request.
///
/// * `lf` - The request file returned by [`get_line`].
/// * `lc` - The configuration to apply.
pub fn set_config(lf: &File, lc: &Config) -> Result<()> {
    // SAFETY: lc is only read by the kernel.
    match unsafe {
        libc::ioctl(
            lf.as_raw_fd(),
            iorw!(IOCTL_MAGIC, Ioctl::SetLineConfig as u8, size_of::<Config>()) as libc::c_ulong,
            lc,
        )
    } {
        0 => Ok(()),
        _ => Err(Error::from_errno()),
    }
}

/// A request for exclusive access to a set of lines.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct LineRequest {
    /// The requested lines, identified by offset on the associated chip.
    pub offsets: Offsets,

    /// The requested consumer label for the selected lines.
    pub consumer: Name,

    /// The requested configuration for the lines.
    pub config: Config,

    /// The number of valid entries in `offsets`.
    pub num_lines: u32,

    /// A suggested minimum number of edge events the kernel should buffer.
    ///
    /// Only relevant if edge detection is enabled; zero selects the kernel
    /// default of `num_lines * 16`, and the kernel may round or cap the
    /// value in any case.
    pub event_buffer_size: u32,

    /// Reserved for future use and must be zero filled.
    #[doc(hidden)]
    pub padding: Padding<5>,

    /// Only used by the underlying ioctl to return the handle.
    #[doc(hidden)]
    pub fd: i32,
}

/// Request a set of lines for exclusive access.
///
/// Returns the file for the acquired line handle.
///
/// * `cf` - The open chip device file.
/// * `lr` - The line request.
pub fn get_line(cf: &File, mut lr: LineRequest) -> Result<File> {
    // SAFETY: lr is consumed and the returned File takes ownership of the
    // fd the kernel wrote into it.
    unsafe {
        match libc::ioctl(
            cf.as_raw_fd(),
            iorw!(IOCTL_MAGIC, Ioctl::GetLine as u8, size_of::<LineRequest>()) as libc::c_ulong,
            &mut lr,
        ) {
            0 => Ok(File::from_raw_fd(lr.fd)),
            _ => Err(Error::from_errno()),
        }
    }
}

/// Values of requested lines.
///
/// Bits in both bitmaps correspond to indices into
/// [`LineRequest::offsets`]; the first requested line is bit 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Values {
    /// The value of the lines, 1 for *active* and 0 for *inactive*.
    pub bits: u64,

    /// The lines to operate on, 1 to access and 0 to ignore.
    pub mask: u64,
}

impl Values {
    /// The value of the line at `idx`, or `None` if the line is not
    /// selected in the mask.
    #[inline]
    pub fn get(&self, idx: usize) -> Option<bool> {
        debug_assert!(idx < LINES_MAX);
        let bit = 0x01 << idx;
        if self.mask & bit == 0 {
            return None;
        }
        Some(self.bits & bit != 0)
    }

    /// Stage a value for the line at `idx`, selecting it in the mask.
    #[inline]
    pub fn set(&mut self, idx: usize, active: bool) {
        debug_assert!(idx < LINES_MAX);
        let bit = 0x01 << idx;
        self.mask |= bit;
        if active {
            self.bits |= bit;
        } else {
            self.bits &= !bit;
        }
    }

    /// Select the line at `idx` for subsequent operations.
    #[inline]
    pub fn select(&mut self, idx: usize) {
        debug_assert!(idx < LINES_MAX);
        self.mask |= 0x01 << idx;
    }

    /// Drop the line at `idx` from subsequent operations.
    #[inline]
    pub fn deselect(&mut self, idx: usize) {
        debug_assert!(idx < LINES_MAX);
        self.mask &= !(0x01 << idx);
    }
}

/// Read the values of requested lines.
///
/// Lines selected in the mask have their bit refreshed from the hardware;
/// other bits are returned zeroed by the kernel.
///
/// * `lf` - The request file returned by [`get_line`].
/// * `lv` - The line values to populate.
pub fn get_values(lf: &File, lv: &mut Values) -> Result<()> {
    // SAFETY: the kernel only writes the bits field, valid for any pattern.
    match unsafe {
        libc::ioctl(
            lf.as_raw_fd(),
            iorw!(IOCTL_MAGIC, Ioctl::GetLineValues as u8, size_of::<Values>()) as libc::c_ulong,
            lv,
        )
    } {
        0 => Ok(()),
        _ => Err(Error::from_errno()),
    }
}

/// Write the values of requested output lines.
///
/// Setting an input line is an error.
///
/// * `lf` - The request file returned by [`get_line`].
/// * `lv` - The line values to apply.
pub fn set_values(lf: &File, lv: &Values) -> Result<()> {
    // SAFETY: lv is only read by the kernel.
    match unsafe {
        libc::ioctl(
            lf.as_raw_fd(),
            iorw!(IOCTL_MAGIC, Ioctl::SetLineValues as u8, size_of::<Values>()) as libc::c_ulong,
            lv,
        )
    } {
        0 => Ok(()),
        _ => Err(Error::from_errno()),
    }
}

/// Information about a certain GPIO line.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Info {
    /// The name of this line as specified by the chip, such as a pin
    /// header name on a board.
    ///
    /// May be empty.
    pub name: Name,

    /// A functional name for the current consumer of this line.
    ///
    /// Empty if the line is not in use, and possibly empty even if it is.
    pub consumer: Name,

    /// The local offset on this chip.
    pub offset: Offset,

    /// The number of records active in `attrs`.
    pub num_attrs: u32,

    /// The base configuration flags for this line.
    pub flags: LineFlags,

    /// Additional configuration attributes associated with the line.
    ///
    /// Only the first `num_attrs` entries are active.
    pub attrs: [LineAttr; ATTRS_MAX],

    /// Reserved for future use.
    #[doc(hidden)]
    pub padding: Padding<4>,
}

impl Info {
    fn validate(&self) -> ValidationResult {
        if self.num_attrs > ATTRS_MAX as u32 {
            return Err(ValidationError::new(
                "num_attrs",
                format!("out of range: {}", self.num_attrs),
            ));
        }
        for (i, attr) in self.attrs.iter().enumerate() {
            if let Err(e) = attr.validate() {
                return Err(ValidationError::new(format!("attrs[{i}].id"), e));
            }
        }
        Ok(())
    }
}

/// Get the publicly available information for a line.
///
/// This does not include the line value; the line must be requested to
/// access that.
///
/// * `cf` - The open chip device file.
/// * `offset` - The offset of the line.
pub fn line_info(cf: &File, offset: Offset) -> Result<Info> {
    let mut li = Info {
        offset,
        ..Default::default()
    };
    // SAFETY: the returned struct is validated before being returned.
    match unsafe {
        libc::ioctl(
            cf.as_raw_fd(),
            iorw!(IOCTL_MAGIC, Ioctl::LineInfo as u8, size_of::<Info>()) as libc::c_ulong,
            &mut li,
        )
    } {
        0 => li.validate().map(|_| li).map_err(Error::from),
        _ => Err(Error::from_errno()),
    }
}

/// Add a watch on changes to the [`Info`] for a line.
///
/// Returns the current state of that information.
///
/// * `cf` - The open chip device file.
/// * `offset` - The offset of the line to watch.
pub fn watch_line_info(cf: &File, offset: Offset) -> Result<Info> {
    let mut li = Info {
        offset,
        ..Default::default()
    };
    // SAFETY: the returned struct is validated before being returned.
    match unsafe {
        libc::ioctl(
            cf.as_raw_fd(),
            iorw!(IOCTL_MAGIC, Ioctl::WatchLineInfo as u8, size_of::<Info>()) as libc::c_ulong,
            &mut li,
        )
    } {
        0 => li.validate().map(|_| li).map_err(Error::from),
        _ => Err(Error::from_errno()),
    }
}

/// Remove any watch on changes to the [`Info`] for a line.
///
/// * `cf` - The open chip device file.
/// * `offset` - The offset of the line to unwatch.
pub fn unwatch_line_info(cf: &File, offset: Offset) -> Result<()> {
    // SAFETY: the offset is only read by the kernel.
    match unsafe {
        libc::ioctl(
            cf.as_raw_fd(),
            iorw!(IOCTL_MAGIC, Ioctl::UnwatchLineInfo as u8, size_of::<u32>()) as libc::c_ulong,
            &offset,
        )
    } {
        0 => Ok(()),
        _ => Err(Error::from_errno()),
    }
}

/// The trigger identifier for an [`InfoChangeEvent`].
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InfoChangeKind {
    /// The line has been requested.
    Requested = 1,

    /// The line has been released.
    Released = 2,

    /// The line has been reconfigured.
    Reconfigured = 3,
}

impl TryFrom<u32> for InfoChangeKind {
    type Error = String;

    fn try_from(v: u32) -> std::result::Result<Self, Self::Error> {
        Ok(match v {
            1 => InfoChangeKind::Requested,
            2 => InfoChangeKind::Released,
            3 => InfoChangeKind::Reconfigured,
            _ => return Err(format!("invalid value: {v}")),
        })
    }
}

/// An event indicating a change to the info for a line.
#[repr(C)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InfoChangeEvent {
    /// The new line info.
    pub info: Info,

    /// The best estimate of time of change, in nanoseconds, read from
    /// **CLOCK_MONOTONIC**.
    pub timestamp_ns: u64,

    /// The [`InfoChangeKind`] trigger for the change, as a raw wire value.
    pub kind: u32,

    /// Reserved for future use.
    #[doc(hidden)]
    pub padding: Padding<5>,
}

impl InfoChangeEvent {
    /// Decode an info change event from a buffer populated by a read of
    /// the chip file, validating the content.
    pub fn from_slice(d: &[u64]) -> Result<&InfoChangeEvent> {
        debug_assert!(size_of::<InfoChangeEvent>() % 8 == 0);
        let len = d.len() * 8;
        if len < size_of::<InfoChangeEvent>() {
            return Err(Error::from(UnderReadError::new(
                "InfoChangeEvent",
                size_of::<InfoChangeEvent>(),
                len,
            )));
        }
        // SAFETY: the struct is validated before being returned.
        let ice = unsafe { &*(d.as_ptr() as *const InfoChangeEvent) };
        ice.validate().map(|_| ice).map_err(Error::from)
    }

    fn validate(&self) -> ValidationResult {
        InfoChangeKind::try_from(self.kind)
            .map(|_| ())
            .map_err(|e| ValidationError::new("kind", e))?;
        self.info.validate()
    }

    /// The number of u64 words required to store an [`InfoChangeEvent`].
    pub fn u64_size() -> usize {
        size_of::<InfoChangeEvent>() / 8
    }
}

/// The trigger identifier for an [`EdgeEvent`].
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EdgeEventKind {
    /// The line transitioned from *inactive* to *active*.
    Rising = 1,

    /// The line transitioned from *active* to *inactive*.
    Falling = 2,
}

impl TryFrom<u32> for EdgeEventKind {
    type Error = String;

    fn try_from(v: u32) -> std::result::Result<Self, Self::Error> {
        Ok(match v {
            1 => EdgeEventKind::Rising,
            2 => EdgeEventKind::Falling,
            _ => return Err(format!("invalid value: {v}")),
        })
    }
}

/// An edge detected on a requested line.
#[repr(C)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EdgeEvent {
    /// The best estimate of time of event occurrence, in nanoseconds.
    ///
    /// Read from **CLOCK_MONOTONIC** by default, or **CLOCK_REALTIME**
    /// if the line was configured with
    /// [`LineFlags::EVENT_CLOCK_REALTIME`].
    pub timestamp_ns: u64,

    /// The [`EdgeEventKind`] trigger for the event, as a raw wire value.
    pub kind: u32,

    /// The offset of the line that triggered the event.
    pub offset: Offset,

    /// The sequence number of this event across all lines in the request.
    pub seqno: u32,

    /// The sequence number of this event on this particular line.
    pub line_seqno: u32,

    /// Reserved for future use.
    #[doc(hidden)]
    pub padding: Padding<6>,
}

impl EdgeEvent {
    /// Decode an edge event from a buffer populated by a read of the
    /// request file, validating the content.
    #[inline]
    pub fn from_slice(d: &[u64]) -> Result<&EdgeEvent> {
        debug_assert!(size_of::<EdgeEvent>() % 8 == 0);
        let len = d.len() * 8;
        if len < size_of::<EdgeEvent>() {
            return Err(Error::from(UnderReadError::new(
                "EdgeEvent",
                size_of::<EdgeEvent>(),
                len,
            )));
        }
        // SAFETY: the struct is validated before being returned.
        let ee = unsafe { &*(d.as_ptr() as *const EdgeEvent) };
        ee.validate().map(|_| ee).map_err(Error::from)
    }

    fn validate(&self) -> ValidationResult {
        EdgeEventKind::try_from(self.kind)
            .map(|_| ())
            .map_err(|e| ValidationError::new("kind", e))
    }

    /// The number of u64 words required to store an [`EdgeEvent`].
    pub fn u64_size() -> usize {
        size_of::<EdgeEvent>() / 8
    }
}

/// Wait for the file to have an event available to read.
///
/// Blocks up to `timeout`, or indefinitely if `timeout` is `None`.
///
/// Returns `Ok(true)` when an event is ready, `Ok(false)` on timeout, and
/// an error if the wait fails or the descriptor becomes ready without
/// being readable.
pub fn wait_event(f: &File, timeout: Option<Duration>) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd: f.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let ts;
    let ts_ptr = match timeout {
        Some(d) => {
            ts = libc::timespec {
                tv_sec: d.as_secs() as libc::time_t,
                tv_nsec: d.subsec_nanos() as libc::c_long,
            };
            ptr::addr_of!(ts)
        }
        None => ptr::null(),
    };
    // SAFETY: ppoll reads one pollfd and an optional timespec, both live
    // for the duration of the call.
    match unsafe {
        libc::ppoll(
            ptr::addr_of_mut!(pfd),
            1,
            ts_ptr,
            ptr::null::<libc::sigset_t>(),
        )
    } {
        -1 => Err(Error::from_errno()),
        0 => Ok(false),
        _ => {
            if pfd.revents & libc::POLLIN != 0 {
                Ok(true)
            } else {
                Err(Error::UnexpectedPollEvents(pfd.revents))
            }
        }
    }
}

/// Read a single event from the file into a `[u64]` buffer.
///
/// The buffer is `u64` to satisfy alignment requirements on 32bit
/// platforms.
///
/// Blocks if no event is available, unless preceded by [`wait_event`].
///
/// Returns the number of u64 words read.
pub fn read_event(f: &File, buf: &mut [u64]) -> Result<usize> {
    // SAFETY: the kernel writes at most buf.len() * 8 bytes.
    let n = unsafe {
        libc::read(
            f.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len() * 8,
        )
    };
    if n < 0 {
        return Err(Error::from_errno());
    }
    Ok(n as usize / 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod name {
        use super::*;

        #[test]
        fn from_str() {
            let n = Name::from("relay-3");
            assert_eq!(n.strlen(), 7);
            assert_eq!(n.as_os_str(), "relay-3");
            assert!(!n.is_empty());
        }

        #[test]
        fn from_str_truncates() {
            let n = Name::from("a name well beyond the wire limit -><- cut");
            assert_eq!(n.strlen(), NAME_LEN_MAX - 1);
            assert_eq!(n.as_os_str(), "a name well beyond the wire lim");
        }

        #[test]
        fn default_is_empty() {
            let n = Name::default();
            assert!(n.is_empty());
            assert_eq!(n.strlen(), 0);
            assert_eq!(n.as_os_str(), "");
        }

        #[test]
        fn to_string() {
            let n = Name::from("banana");
            assert_eq!(String::from(&n), "banana");
        }
    }

    mod offsets {
        use super::*;

        #[test]
        fn from_slice() {
            let o = Offsets::from_slice(&[3, 1, 4, 1, 5]);
            assert_eq!(o.get(0), 3);
            assert_eq!(o.get(2), 4);
            assert_eq!(o.get(4), 5);
            assert_eq!(o.get(5), 0);
        }

        #[test]
        fn set() {
            let mut o = Offsets::default();
            o.set(2, 42);
            assert_eq!(o.get(2), 42);
            assert_eq!(o.get(1), 0);
        }
    }

    mod values {
        use super::Values;

        #[test]
        fn get() {
            let mut v = Values::default();
            assert!(v.get(3).is_none());
            v.mask = 0x08;
            assert_eq!(v.get(3), Some(false));
            v.bits = 0x08;
            assert_eq!(v.get(3), Some(true));
        }

        #[test]
        fn set() {
            let mut v = Values::default();
            v.set(0, true);
            v.set(4, false);
            assert_eq!(v.mask, 0x11);
            assert_eq!(v.bits, 0x01);
            v.set(0, false);
            assert_eq!(v.mask, 0x11);
            assert_eq!(v.bits, 0x00);
        }

        #[test]
        fn select_and_deselect() {
            let mut v = Values {
                bits: 0,
                mask: 0x07,
            };
            v.deselect(1);
            assert_eq!(v.mask, 0x05);
            v.select(3);
            assert_eq!(v.mask, 0x0d);
        }
    }

    mod line_attr {
        use super::*;

        #[test]
        fn flags_roundtrip() {
            let mut a = LineAttr::default();
            assert!(a.value().is_none());
            a.set_flags(LineFlags::INPUT | LineFlags::EDGE_RISING);
            assert_eq!(
                a.value(),
                Some(AttrValue::Flags(LineFlags::INPUT | LineFlags::EDGE_RISING))
            );
        }

        #[test]
        fn values_roundtrip() {
            let mut a = LineAttr::default();
            a.set_values(0xa5);
            assert_eq!(a.value(), Some(AttrValue::Values(0xa5)));
        }

        #[test]
        fn debounce_roundtrip() {
            let mut a = LineAttr::default();
            a.set_debounce_period_us(1250);
            assert_eq!(
                a.value(),
                Some(AttrValue::DebouncePeriod(Duration::from_micros(1250)))
            );
        }

        #[test]
        fn invalid_id() {
            let a = LineAttr {
                id: 4,
                ..Default::default()
            };
            assert!(a.value().is_none());
            assert!(a.validate().is_err());
        }
    }

    mod info {
        use super::*;

        #[test]
        fn validate() {
            let mut li = Info::default();
            assert!(li.validate().is_ok());

            li.num_attrs = ATTRS_MAX as u32;
            assert!(li.validate().is_ok());

            li.num_attrs += 1;
            let e = li.validate().unwrap_err();
            assert_eq!(e.field, "num_attrs");
            assert_eq!(e.msg, "out of range: 11");

            li.num_attrs = 1;
            li.attrs[4].id = 7;
            let e = li.validate().unwrap_err();
            assert_eq!(e.field, "attrs[4].id");
            assert_eq!(e.msg, "invalid value: 7");
        }
    }

    mod edge_event {
        use super::*;

        fn event() -> EdgeEvent {
            EdgeEvent {
                timestamp_ns: 1234,
                kind: EdgeEventKind::Rising as u32,
                offset: 23,
                seqno: 2,
                line_seqno: 1,
                padding: Default::default(),
            }
        }

        #[test]
        fn validate() {
            let mut ee = event();
            assert!(ee.validate().is_ok());
            ee.kind = EdgeEventKind::Falling as u32;
            assert!(ee.validate().is_ok());
            ee.kind = 3;
            let e = ee.validate().unwrap_err();
            assert_eq!(e.field, "kind");
            assert_eq!(e.msg, "invalid value: 3");
        }

        #[test]
        fn from_slice() {
            let mut buf = [0_u64; 6];
            buf[0] = 1234;
            buf[1] = (23_u64 << 32) | EdgeEventKind::Falling as u64;
            buf[2] = (7_u64 << 32) | 9;
            let ee = EdgeEvent::from_slice(&buf).unwrap();
            assert_eq!(ee.timestamp_ns, 1234);
            assert_eq!(ee.kind, EdgeEventKind::Falling as u32);
            assert_eq!(ee.offset, 23);
            assert_eq!(ee.seqno, 9);
            assert_eq!(ee.line_seqno, 7);
        }

        #[test]
        fn from_slice_short() {
            let buf = [0_u64; 3];
            match EdgeEvent::from_slice(&buf) {
                Err(Error::UnderRead(ur)) => {
                    assert_eq!(ur.kind, "EdgeEvent");
                    assert_eq!(ur.expected, 48);
                    assert_eq!(ur.actual, 24);
                }
                x => panic!("unexpected result: {x:?}"),
            }
        }
    }

    mod info_change_event {
        use super::*;

        #[test]
        fn from_slice_short() {
            let buf = [0_u64; 8];
            match InfoChangeEvent::from_slice(&buf) {
                Err(Error::UnderRead(ur)) => {
                    assert_eq!(ur.kind, "InfoChangeEvent");
                    assert_eq!(ur.expected, 288);
                    assert_eq!(ur.actual, 64);
                }
                x => panic!("unexpected result: {x:?}"),
            }
        }

        #[test]
        fn from_slice_invalid_kind() {
            let buf = [0_u64; 36];
            match InfoChangeEvent::from_slice(&buf) {
                Err(Error::Validation(e)) => {
                    assert_eq!(e.field, "kind");
                    assert_eq!(e.msg, "invalid value: 0");
                }
                x => panic!("unexpected result: {x:?}"),
            }
        }
    }

    mod sizes {
        use super::*;

        #[test]
        fn chip_info() {
            assert_eq!(size_of::<ChipInfo>(), 68);
        }

        #[test]
        fn name() {
            assert_eq!(size_of::<Name>(), NAME_LEN_MAX);
        }

        #[test]
        fn offsets() {
            assert_eq!(size_of::<Offsets>(), 256);
        }

        #[test]
        fn line_attr() {
            assert_eq!(size_of::<LineAttr>(), 16);
        }

        #[test]
        fn config_attr() {
            assert_eq!(size_of::<ConfigAttr>(), 24);
        }

        #[test]
        fn config() {
            assert_eq!(size_of::<Config>(), 272);
        }

        #[test]
        fn line_request() {
            assert_eq!(size_of::<LineRequest>(), 592);
        }

        #[test]
        fn values() {
            assert_eq!(size_of::<Values>(), 16);
        }

        #[test]
        fn info() {
            assert_eq!(size_of::<Info>(), 256);
        }

        #[test]
        fn info_change_event() {
            assert_eq!(size_of::<InfoChangeEvent>(), 288);
        }

        #[test]
        fn edge_event() {
            assert_eq!(size_of::<EdgeEvent>(), 48);
        }

        #[test]
        fn padding() {
            assert_eq!(size_of::<Padding<1>>(), 4);
            assert_eq!(size_of::<Padding<5>>(), 20);
        }
    }
}
