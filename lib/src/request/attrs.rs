// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The packed-attribute allocator.
//!
//! The kernel accepts per-line configuration as a small fixed array of
//! attribute records, each applying to a set of line indices via a bitmap.
//! This module maps per-line settings onto that array while keeping it
//! minimal: identical flag payloads are shared between lines, a single
//! OUTPUT_VALUES record accumulates all initial output values, and records
//! left with no owners are reclaimed.

use crate::Error;
use gpioreq_uapi as uapi;
use gpioreq_uapi::{AttrId, AttrValue, ConfigAttr, LineFlags, ATTRS_MAX};
use std::time::Duration;

/// A bounded arena of attribute records indexed by slot.
///
/// Slots below `len` are occupied; compaction preserves the relative order
/// of surviving records. The single OUTPUT_VALUES record, when present, is
/// tracked by slot index rather than rediscovered by scanning.
#[derive(Clone, Debug, Default)]
pub(crate) struct AttrBank {
    attrs: [ConfigAttr; ATTRS_MAX],
    len: usize,
    values_slot: Option<usize>,
}

fn flags_of(rec: &ConfigAttr) -> Option<LineFlags> {
    match rec.attr.value() {
        Some(AttrValue::Flags(f)) => Some(f),
        _ => None,
    }
}

fn debounce_of(rec: &ConfigAttr) -> Option<Duration> {
    match rec.attr.value() {
        Some(AttrValue::DebouncePeriod(d)) => Some(d),
        _ => None,
    }
}

impl AttrBank {
    /// The number of occupied slots.
    pub(crate) fn slots(&self) -> usize {
        self.len
    }

    /// The occupied records, in slot order.
    pub(crate) fn records(&self) -> &[ConfigAttr] {
        &self.attrs[..self.len]
    }

    /// Whether a FLAGS record with exactly this payload exists.
    pub(crate) fn has_flags_record(&self, flags: LineFlags) -> bool {
        self.records().iter().any(|r| flags_of(r) == Some(flags))
    }

    /// Whether the OUTPUT_VALUES record exists.
    pub(crate) fn has_values_record(&self) -> bool {
        self.values_slot.is_some()
    }

    /// Whether applying the given per-line settings can succeed without
    /// exceeding the record capacity.
    ///
    /// Used to vet a multi-record operation before any record is touched,
    /// so a rejected operation leaves the bank unchanged.
    pub(crate) fn can_apply(
        &self,
        index: usize,
        flags: Option<LineFlags>,
        needs_values: bool,
    ) -> bool {
        let bit = 1u64 << index;
        let mut len = self.len;
        if let Some(f) = flags {
            // clearing the line's sole-owner record frees a slot
            if self
                .records()
                .iter()
                .any(|r| flags_of(r).is_some() && r.mask == bit)
            {
                len -= 1;
            }
            let mergeable = self
                .records()
                .iter()
                .any(|r| flags_of(r) == Some(f) && r.mask != bit);
            if !mergeable {
                if len >= ATTRS_MAX {
                    return false;
                }
                len += 1;
            }
        }
        if needs_values && self.values_slot.is_none() && len >= ATTRS_MAX {
            return false;
        }
        true
    }

    /// Remove the line at `index` from every FLAGS record.
    ///
    /// Records left with an empty applicability mask are reclaimed and the
    /// array compacted once, preserving the order of survivors.
    pub(crate) fn clear_flags(&mut self, index: usize) {
        self.clear_kind(index, AttrId::Flags)
    }

    fn clear_kind(&mut self, index: usize, kind: AttrId) {
        let bit = 1u64 << index;
        let mut reclaim = false;
        for rec in self.attrs[..self.len].iter_mut() {
            if rec.attr.id == kind as u32 && rec.mask & bit != 0 {
                rec.mask &= !bit;
                if rec.mask == 0 {
                    rec.attr.id = AttrId::Unused as u32;
                    reclaim = true;
                }
            }
        }
        if reclaim {
            self.compact();
        }
    }

    // Shift surviving records down over reclaimed slots in a single pass,
    // keeping the tracked OUTPUT_VALUES slot in step.
    fn compact(&mut self) {
        let mut target = 0;
        for source in 0..self.len {
            if self.attrs[source].attr.id == AttrId::Unused as u32 {
                continue;
            }
            if source != target {
                self.attrs[target] = self.attrs[source];
            }
            if self.values_slot == Some(source) {
                self.values_slot = Some(target);
            }
            target += 1;
        }
        for rec in self.attrs[target..self.len].iter_mut() {
            *rec = ConfigAttr::default();
        }
        self.len = target;
    }

    /// Set the flags for the line at `index`, replacing any flags it
    /// already has.
    ///
    /// Lines with identical payloads share a record; a new record is only
    /// allocated when no record with this payload exists. Fails with
    /// [`Error::TooManyAttrs`], leaving the bank unchanged, if a record is
    /// needed and no slot is free.
    pub(crate) fn set_flags(&mut self, index: usize, flags: LineFlags) -> Result<(), Error> {
        if !self.can_apply(index, Some(flags), false) {
            return Err(Error::TooManyAttrs);
        }
        let bit = 1u64 << index;
        self.clear_flags(index);
        if let Some(rec) = self.attrs[..self.len]
            .iter_mut()
            .find(|r| flags_of(r) == Some(flags))
        {
            rec.mask |= bit;
            return Ok(());
        }
        let rec = &mut self.attrs[self.len];
        rec.attr.set_flags(flags);
        rec.mask = bit;
        self.len += 1;
        Ok(())
    }

    /// Record the initial output value for the line at `index`.
    ///
    /// All output values share the one OUTPUT_VALUES record; the line's
    /// membership and value bits are cumulative across calls. Fails with
    /// [`Error::TooManyAttrs`], leaving the bank unchanged, if the record
    /// does not exist and cannot be allocated.
    pub(crate) fn set_output_value(&mut self, index: usize, value: bool) -> Result<(), Error> {
        let bit = 1u64 << index;
        let slot = match self.values_slot {
            Some(slot) => slot,
            None => {
                if self.len >= ATTRS_MAX {
                    return Err(Error::TooManyAttrs);
                }
                let slot = self.len;
                self.attrs[slot].attr.set_values(0);
                self.attrs[slot].mask = 0;
                self.len += 1;
                self.values_slot = Some(slot);
                slot
            }
        };
        let rec = &mut self.attrs[slot];
        rec.mask |= bit;
        let mut values = match rec.attr.value() {
            Some(AttrValue::Values(v)) => v,
            _ => 0,
        };
        if value {
            values |= bit;
        } else {
            values &= !bit;
        }
        rec.attr.set_values(values);
        Ok(())
    }

    /// Set the debounce period for the line at `index`, replacing any
    /// period it already has.
    ///
    /// Follows the same sharing and reclamation discipline as flags, keyed
    /// by equal period.
    pub(crate) fn set_debounce(&mut self, index: usize, period: Duration) -> Result<(), Error> {
        let bit = 1u64 << index;
        // records are merged on the wire value, which is 32 bits of
        // microseconds
        let period = Duration::from_micros(period.as_micros().min(u32::MAX as u128) as u64);
        let freed = self
            .records()
            .iter()
            .any(|r| debounce_of(r).is_some() && r.mask == bit);
        let mergeable = self
            .records()
            .iter()
            .any(|r| debounce_of(r) == Some(period) && r.mask != bit);
        if !mergeable && self.len - usize::from(freed) >= ATTRS_MAX {
            return Err(Error::TooManyAttrs);
        }
        self.clear_kind(index, AttrId::Debounce);
        if let Some(rec) = self.attrs[..self.len]
            .iter_mut()
            .find(|r| debounce_of(r) == Some(period))
        {
            rec.mask |= bit;
            return Ok(());
        }
        let rec = &mut self.attrs[self.len];
        rec.attr.set_debounce_period_us(period.as_micros() as u32);
        rec.mask = bit;
        self.len += 1;
        Ok(())
    }

    /// Assemble the wire configuration from the base flags and the
    /// occupied records.
    pub(crate) fn as_config(&self, base_flags: LineFlags) -> uapi::Config {
        let mut cfg = uapi::Config {
            flags: base_flags,
            num_attrs: self.len as u32,
            ..Default::default()
        };
        cfg.attrs[..self.len].copy_from_slice(&self.attrs[..self.len]);
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: LineFlags = LineFlags::INPUT;
    const OUTPUT: LineFlags = LineFlags::OUTPUT;

    fn record_kinds(bank: &AttrBank) -> Vec<u32> {
        bank.records().iter().map(|r| r.attr.id).collect()
    }

    #[test]
    fn identical_flags_share_a_record() {
        let mut bank = AttrBank::default();
        bank.set_flags(0, INPUT).unwrap();
        bank.set_flags(1, INPUT).unwrap();
        assert_eq!(bank.slots(), 1);
        assert_eq!(bank.records()[0].mask, 0b11);
        assert_eq!(flags_of(&bank.records()[0]), Some(INPUT));
    }

    #[test]
    fn distinct_flags_allocate_separately() {
        let mut bank = AttrBank::default();
        bank.set_flags(0, INPUT).unwrap();
        bank.set_flags(1, OUTPUT).unwrap();
        assert_eq!(bank.slots(), 2);
        assert_eq!(bank.records()[0].mask, 0b01);
        assert_eq!(bank.records()[1].mask, 0b10);
    }

    #[test]
    fn reflag_reclaims_sole_owner_record() {
        let mut bank = AttrBank::default();
        bank.set_flags(0, INPUT).unwrap();
        bank.set_flags(1, OUTPUT).unwrap();
        assert_eq!(bank.slots(), 2);

        // line 0 moves to OUTPUT; its INPUT record had no other owners
        bank.set_flags(0, OUTPUT).unwrap();
        assert_eq!(bank.slots(), 1);
        assert_eq!(flags_of(&bank.records()[0]), Some(OUTPUT));
        assert_eq!(bank.records()[0].mask, 0b11);
    }

    #[test]
    fn reflag_leaves_shared_record_for_other_owners() {
        let mut bank = AttrBank::default();
        bank.set_flags(0, INPUT).unwrap();
        bank.set_flags(1, INPUT).unwrap();
        bank.set_flags(0, OUTPUT).unwrap();
        assert_eq!(bank.slots(), 2);
        assert_eq!(flags_of(&bank.records()[0]), Some(INPUT));
        assert_eq!(bank.records()[0].mask, 0b10);
        assert_eq!(flags_of(&bank.records()[1]), Some(OUTPUT));
        assert_eq!(bank.records()[1].mask, 0b01);
    }

    #[test]
    fn clear_flags_compacts_preserving_order() {
        let mut bank = AttrBank::default();
        bank.set_flags(0, INPUT).unwrap();
        bank.set_output_value(1, true).unwrap();
        bank.set_flags(2, OUTPUT).unwrap();
        assert_eq!(bank.slots(), 3);

        bank.clear_flags(0);
        assert_eq!(bank.slots(), 2);
        assert_eq!(
            record_kinds(&bank),
            vec![AttrId::Values as u32, AttrId::Flags as u32]
        );
        // the values record moved down a slot and is still found
        bank.set_output_value(3, true).unwrap();
        assert_eq!(bank.slots(), 2);
    }

    #[test]
    fn single_output_values_record() {
        let mut bank = AttrBank::default();
        bank.set_output_value(0, true).unwrap();
        bank.set_output_value(1, false).unwrap();
        bank.set_output_value(5, true).unwrap();
        assert_eq!(bank.slots(), 1);
        let rec = &bank.records()[0];
        assert_eq!(rec.mask, 0b100011);
        assert_eq!(rec.attr.value(), Some(AttrValue::Values(0b100001)));
    }

    #[test]
    fn output_value_can_be_rewritten() {
        let mut bank = AttrBank::default();
        bank.set_output_value(2, true).unwrap();
        bank.set_output_value(2, false).unwrap();
        assert_eq!(bank.slots(), 1);
        assert_eq!(bank.records()[0].attr.value(), Some(AttrValue::Values(0)));
        assert_eq!(bank.records()[0].mask, 0b100);
    }

    #[test]
    fn flags_capacity_exhaustion_is_clean() {
        let mut bank = AttrBank::default();
        for i in 0..ATTRS_MAX {
            bank.set_flags(i, LineFlags::from_bits_retain(1 << i)).unwrap();
        }
        assert_eq!(bank.slots(), ATTRS_MAX);

        // INPUT|EDGE_RISING matches no existing payload, so a slot is needed
        let before = bank.records().to_vec();
        let res = bank.set_flags(ATTRS_MAX, INPUT | LineFlags::EDGE_RISING);
        assert!(matches!(res, Err(Error::TooManyAttrs)));
        assert_eq!(bank.records(), before.as_slice());
    }

    #[test]
    fn full_bank_still_merges() {
        let mut bank = AttrBank::default();
        for i in 0..ATTRS_MAX {
            bank.set_flags(i, LineFlags::from_bits_retain(1 << i)).unwrap();
        }
        // no new record needed, so this succeeds at capacity
        bank.set_flags(10, LineFlags::from_bits_retain(1 << 3)).unwrap();
        assert_eq!(bank.slots(), ATTRS_MAX);
        let rec = bank
            .records()
            .iter()
            .find(|r| flags_of(r) == Some(LineFlags::from_bits_retain(1 << 3)))
            .unwrap();
        assert_eq!(rec.mask, (1 << 10) | (1 << 3));
    }

    #[test]
    fn full_bank_still_replaces_sole_owner() {
        let mut bank = AttrBank::default();
        for i in 0..ATTRS_MAX {
            bank.set_flags(i, LineFlags::from_bits_retain(1 << i)).unwrap();
        }
        // replacing line 4's flags frees its record before the allocation
        bank.set_flags(4, INPUT | LineFlags::ACTIVE_LOW).unwrap();
        assert_eq!(bank.slots(), ATTRS_MAX);
        assert!(bank.has_flags_record(INPUT | LineFlags::ACTIVE_LOW));
        assert!(!bank.has_flags_record(LineFlags::from_bits_retain(1 << 4)));
    }

    #[test]
    fn output_values_capacity_exhaustion_is_clean() {
        let mut bank = AttrBank::default();
        for i in 0..ATTRS_MAX {
            bank.set_flags(i, LineFlags::from_bits_retain(1 << i)).unwrap();
        }
        let before = bank.records().to_vec();
        assert!(matches!(
            bank.set_output_value(0, true),
            Err(Error::TooManyAttrs)
        ));
        assert_eq!(bank.records(), before.as_slice());
    }

    #[test]
    fn debounce_shares_by_period() {
        let mut bank = AttrBank::default();
        let fast = Duration::from_micros(100);
        let slow = Duration::from_millis(5);
        bank.set_debounce(0, fast).unwrap();
        bank.set_debounce(1, fast).unwrap();
        bank.set_debounce(2, slow).unwrap();
        assert_eq!(bank.slots(), 2);
        assert_eq!(bank.records()[0].mask, 0b011);
        assert_eq!(bank.records()[1].mask, 0b100);

        // a changed period leaves exactly one debounce record owning line 2
        bank.set_debounce(2, fast).unwrap();
        assert_eq!(bank.slots(), 1);
        assert_eq!(bank.records()[0].mask, 0b111);
    }

    #[test]
    fn debounce_does_not_disturb_flags() {
        let mut bank = AttrBank::default();
        bank.set_flags(0, INPUT).unwrap();
        bank.set_debounce(0, Duration::from_micros(10)).unwrap();
        bank.clear_flags(0);
        assert_eq!(bank.slots(), 1);
        assert_eq!(
            debounce_of(&bank.records()[0]),
            Some(Duration::from_micros(10))
        );
    }

    #[test]
    fn can_apply_accounts_for_freed_and_merged_slots() {
        let mut bank = AttrBank::default();
        for i in 0..ATTRS_MAX {
            bank.set_flags(i, LineFlags::from_bits_retain(1 << i)).unwrap();
        }
        // merge is possible even when full
        assert!(bank.can_apply(11, Some(LineFlags::from_bits_retain(1 << 2)), false));
        // replacement frees the sole-owner record first
        assert!(bank.can_apply(3, Some(INPUT | LineFlags::ACTIVE_LOW), false));
        // a genuinely new payload cannot fit
        assert!(!bank.can_apply(11, Some(INPUT | LineFlags::ACTIVE_LOW), false));
        // and neither can a first output value
        assert!(!bank.can_apply(11, None, true));
        assert!(bank.can_apply(11, None, false));
    }

    #[test]
    fn as_config_carries_base_flags_and_records() {
        let mut bank = AttrBank::default();
        bank.set_flags(1, OUTPUT).unwrap();
        bank.set_output_value(1, true).unwrap();
        let cfg = bank.as_config(INPUT);
        assert_eq!(cfg.flags, INPUT);
        assert_eq!(cfg.num_attrs, 2);
        assert_eq!(flags_of(&cfg.attrs[0]), Some(OUTPUT));
        assert_eq!(cfg.attrs[1].attr.value(), Some(AttrValue::Values(0b10)));
        assert_eq!(cfg.attrs[2], ConfigAttr::default());
    }
}
