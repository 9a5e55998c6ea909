// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::{Error, UapiCall};
use gpioreq_uapi as uapi;
use std::time::Duration;

pub use gpioreq_uapi::{LineFlags, Offset};

/// The publicly available information for a line.
///
/// Returned caller-owned by [`Chip::line_info`](crate::chip::Chip::line_info)
/// and carried by [`InfoChangeEvent`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Info {
    /// The name of the line as supplied by the chip.
    ///
    /// May be empty.
    pub name: String,

    /// The consumer currently holding the line.
    ///
    /// Empty if the line is not reserved.
    pub consumer: String,

    /// The offset of the line on its chip.
    pub offset: Offset,

    /// The base configuration flags for the line.
    ///
    /// Overridden by any flags attribute in `attrs`.
    pub flags: LineFlags,

    /// The attribute records applying to the line.
    pub attrs: Vec<Attr>,
}

/// One decoded attribute record from a line's info.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Attr {
    /// Line configuration flags, overriding the base flags.
    Flags(LineFlags),

    /// The values driven on output lines, one bit per line index.
    OutputValues(u64),

    /// The debounce period applied to the line.
    Debounce(Duration),
}

impl Info {
    /// The flags currently applying to the line.
    ///
    /// Flags carried in attribute records take precedence over the base
    /// flags; the base flags are only returned when no flags attribute is
    /// present.
    pub fn effective_flags(&self) -> LineFlags {
        let mut flags = LineFlags::empty();
        let mut found = false;
        for attr in &self.attrs {
            if let Attr::Flags(f) = attr {
                flags |= *f;
                found = true;
            }
        }
        if found {
            flags
        } else {
            self.flags
        }
    }

    /// Any output values attribute payload set for the line.
    pub fn output_values(&self) -> Option<u64> {
        self.attrs.iter().find_map(|a| match a {
            Attr::OutputValues(v) => Some(*v),
            _ => None,
        })
    }

    /// Any debounce period set for the line.
    pub fn debounce(&self) -> Option<Duration> {
        self.attrs.iter().find_map(|a| match a {
            Attr::Debounce(d) => Some(*d),
            _ => None,
        })
    }
}

impl From<&uapi::Info> for Info {
    fn from(li: &uapi::Info) -> Self {
        let attrs = li
            .attrs
            .iter()
            .take(li.num_attrs as usize)
            .filter_map(|a| a.value())
            .map(|v| match v {
                uapi::AttrValue::Flags(f) => Attr::Flags(f),
                uapi::AttrValue::Values(v) => Attr::OutputValues(v),
                uapi::AttrValue::DebouncePeriod(d) => Attr::Debounce(d),
            })
            .collect();
        Info {
            name: String::from(&li.name),
            consumer: String::from(&li.consumer),
            offset: li.offset,
            flags: li.flags,
            attrs,
        }
    }
}

/// The direction of an edge detected on a line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EdgeKind {
    /// The line transitioned from inactive to active.
    Rising,

    /// The line transitioned from active to inactive.
    Falling,
}

impl From<uapi::EdgeEventKind> for EdgeKind {
    fn from(kind: uapi::EdgeEventKind) -> Self {
        match kind {
            uapi::EdgeEventKind::Rising => EdgeKind::Rising,
            uapi::EdgeEventKind::Falling => EdgeKind::Falling,
        }
    }
}

/// The details of an edge detected on a requested line.
///
/// Returned owned by [`Request::await_event`](crate::Request::await_event);
/// each call yields a fresh event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EdgeEvent {
    /// The best estimate of time of event occurrence, in nanoseconds.
    ///
    /// Taken from **CLOCK_MONOTONIC** unless the line was configured with
    /// [`LineFlags::EVENT_CLOCK_REALTIME`], so by default it measures the
    /// spacing between events rather than the wall-clock time.
    pub timestamp_ns: u64,

    /// The edge that triggered the event.
    pub kind: EdgeKind,

    /// The offset of the line that triggered the event.
    pub offset: Offset,

    /// The sequence number of the event across all lines in the request.
    pub seqno: u32,

    /// The sequence number of the event on this particular line.
    pub line_seqno: u32,
}

impl TryFrom<&uapi::EdgeEvent> for EdgeEvent {
    type Error = Error;

    fn try_from(ee: &uapi::EdgeEvent) -> Result<Self, Self::Error> {
        let kind = uapi::EdgeEventKind::try_from(ee.kind).map_err(|e| {
            Error::Uapi(
                UapiCall::EdgeEventFromSlice,
                uapi::ValidationError::new("kind", e).into(),
            )
        })?;
        Ok(EdgeEvent {
            timestamp_ns: ee.timestamp_ns,
            kind: kind.into(),
            offset: ee.offset,
            seqno: ee.seqno,
            line_seqno: ee.line_seqno,
        })
    }
}

/// The trigger for an [`InfoChangeEvent`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InfoChangeKind {
    /// The line has been requested.
    Requested,

    /// The line has been released.
    Released,

    /// The line has been reconfigured.
    Reconfigured,
}

impl From<uapi::InfoChangeKind> for InfoChangeKind {
    fn from(kind: uapi::InfoChangeKind) -> Self {
        match kind {
            uapi::InfoChangeKind::Requested => InfoChangeKind::Requested,
            uapi::InfoChangeKind::Released => InfoChangeKind::Released,
            uapi::InfoChangeKind::Reconfigured => InfoChangeKind::Reconfigured,
        }
    }
}

/// The details of a change to the info for a watched line.
///
/// Returned owned by
/// [`Chip::await_info_change`](crate::chip::Chip::await_info_change);
/// each call yields a fresh event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InfoChangeEvent {
    /// The updated line info.
    pub info: Info,

    /// The best estimate of time of change, in nanoseconds, taken from
    /// **CLOCK_MONOTONIC**.
    pub timestamp_ns: u64,

    /// The trigger for the change.
    pub kind: InfoChangeKind,
}

impl TryFrom<&uapi::InfoChangeEvent> for InfoChangeEvent {
    type Error = Error;

    fn try_from(ice: &uapi::InfoChangeEvent) -> Result<Self, Self::Error> {
        let kind = uapi::InfoChangeKind::try_from(ice.kind).map_err(|e| {
            Error::Uapi(
                UapiCall::InfoChangeEventFromSlice,
                uapi::ValidationError::new("kind", e).into(),
            )
        })?;
        Ok(InfoChangeEvent {
            info: Info::from(&ice.info),
            timestamp_ns: ice.timestamp_ns,
            kind: kind.into(),
        })
    }
}
