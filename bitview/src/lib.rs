// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Bit-range views over unsigned integers and byte buffers.
//!
//! The instruction encoder packs hardware fields into byte streams at
//! arbitrary bit offsets. Bit 0 of a buffer is the least-significant bit of
//! byte 0, matching the LSB-first field numbering used by the ISA tables.

use std::ops::Range;

pub trait BitViewable {
    fn bits(&self) -> usize;

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64;
}

pub trait BitMutViewable: BitViewable {
    fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64);
}

fn u64_mask_for_bits(bits: usize) -> u64 {
    assert!(bits > 0 && bits <= 64);
    !0u64 >> (64 - bits)
}

macro_rules! decl_bit_viewable_for_uint {
    ($ty: ty) => {
        impl BitViewable for $ty {
            fn bits(&self) -> usize {
                <$ty>::BITS as usize
            }

            fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
                assert!(!range.is_empty());
                assert!(range.end <= self.bits());

                let mask = <$ty>::MAX >> (self.bits() - range.len());
                ((self >> range.start) & mask).into()
            }
        }

        impl BitMutViewable for $ty {
            fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64) {
                assert!(!range.is_empty());
                assert!(range.end <= self.bits());

                let mask = <$ty>::MAX >> (self.bits() - range.len());
                assert!((val & u64::from(mask)) == val);
                let val = val as $ty;

                *self = (*self & !(mask << range.start)) | (val << range.start);
            }
        }
    };
}

decl_bit_viewable_for_uint!(u8);
decl_bit_viewable_for_uint!(u16);
decl_bit_viewable_for_uint!(u32);
decl_bit_viewable_for_uint!(u64);

impl BitViewable for [u8] {
    fn bits(&self) -> usize {
        self.len() * 8
    }

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
        assert!(!range.is_empty());
        assert!(range.end <= self.bits());

        let mask = u64_mask_for_bits(range.len());
        let b0 = range.start / 8;
        let shift = range.start % 8;
        let bytes = (shift + range.len()).div_ceil(8);

        let mut val = 0_u64;
        for i in 0..bytes {
            let byte = u64::from(self[b0 + i]);
            if i == 0 {
                val |= byte >> shift;
            } else {
                val |= byte << (i * 8 - shift);
            }
        }
        val & mask
    }
}

impl BitMutViewable for [u8] {
    fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64) {
        assert!(!range.is_empty());
        assert!(range.end <= self.bits());

        let mask = u64_mask_for_bits(range.len());
        assert!((val & mask) == val);

        let b0 = range.start / 8;
        let shift = range.start % 8;
        let bytes = (shift + range.len()).div_ceil(8);

        for i in 0..bytes {
            let byte = &mut self[b0 + i];
            if i == 0 {
                *byte &= !((mask << shift) as u8);
                *byte |= (val << shift) as u8;
            } else {
                let down = i * 8 - shift;
                *byte &= !((mask >> down) as u8);
                *byte |= (val >> down) as u8;
            }
        }
    }
}

impl<const N: usize> BitViewable for [u8; N] {
    fn bits(&self) -> usize {
        N * 8
    }

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
        self[..].get_bit_range_u64(range)
    }
}

impl<const N: usize> BitMutViewable for [u8; N] {
    fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64) {
        self[..].set_bit_range_u64(range, val);
    }
}

/// Read-only view of a bit range within some backing storage.
pub struct BitView<'a, BS: BitViewable + ?Sized> {
    parent: &'a BS,
    range: Range<usize>,
}

impl<'a, BS: BitViewable + ?Sized> BitView<'a, BS> {
    pub fn new(parent: &'a BS) -> Self {
        let len = parent.bits();
        Self {
            parent,
            range: 0..len,
        }
    }

    pub fn new_subset(parent: &'a BS, range: Range<usize>) -> Self {
        assert!(range.end <= parent.bits());
        Self { parent, range }
    }

    fn range_in_parent(&self, range: Range<usize>) -> Range<usize> {
        let start = self.range.start + range.start;
        let end = self.range.start + range.end;
        assert!(end <= self.range.end);
        start..end
    }

    pub fn get_bit(&self, bit: usize) -> bool {
        self.get_bit_range_u64(bit..bit + 1) != 0
    }

    pub fn get_field<T: TryFrom<u64>>(&self, range: Range<usize>) -> T {
        match T::try_from(self.get_bit_range_u64(range)) {
            Ok(v) => v,
            Err(_) => panic!("Field value out of range"),
        }
    }
}

impl<'a, BS: BitViewable + ?Sized> BitViewable for BitView<'a, BS> {
    fn bits(&self) -> usize {
        self.range.end - self.range.start
    }

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
        self.parent.get_bit_range_u64(self.range_in_parent(range))
    }
}

/// Mutable view of a bit range within some backing storage.
pub struct BitMutView<'a, BS: BitMutViewable + ?Sized> {
    parent: &'a mut BS,
    range: Range<usize>,
}

impl<'a, BS: BitMutViewable + ?Sized> BitMutView<'a, BS> {
    pub fn new(parent: &'a mut BS) -> Self {
        let len = parent.bits();
        Self {
            parent,
            range: 0..len,
        }
    }

    pub fn new_subset(parent: &'a mut BS, range: Range<usize>) -> Self {
        assert!(range.end <= parent.bits());
        Self { parent, range }
    }

    fn range_in_parent(&self, range: Range<usize>) -> Range<usize> {
        let start = self.range.start + range.start;
        let end = self.range.start + range.end;
        assert!(end <= self.range.end);
        start..end
    }

    pub fn set_field<T: Into<u64>>(&mut self, range: Range<usize>, val: T) {
        self.set_bit_range_u64(range, val.into());
    }

    pub fn set_bit(&mut self, bit: usize, val: bool) {
        self.set_bit_range_u64(bit..bit + 1, u64::from(val));
    }
}

impl<'a, BS: BitMutViewable + ?Sized> BitViewable for BitMutView<'a, BS> {
    fn bits(&self) -> usize {
        self.range.end - self.range.start
    }

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
        self.parent.get_bit_range_u64(self.range_in_parent(range))
    }
}

impl<'a, BS: BitMutViewable + ?Sized> BitMutViewable for BitMutView<'a, BS> {
    fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64) {
        self.parent
            .set_bit_range_u64(self.range_in_parent(range), val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_get_set() {
        let mut v = 0_u32;
        v.set_bit_range_u64(4..12, 0xab);
        assert_eq!(v, 0xab0);
        assert_eq!(v.get_bit_range_u64(4..12), 0xab);
        assert_eq!(v.get_bit_range_u64(0..4), 0);
    }

    #[test]
    fn bytes_cross_boundary() {
        let mut buf = [0_u8; 4];
        buf.set_bit_range_u64(6..18, 0xfff);
        assert_eq!(buf, [0xc0, 0xff, 0x03, 0x00]);
        assert_eq!(buf.get_bit_range_u64(6..18), 0xfff);

        let mut buf = [0_u8; 3];
        buf.set_bit_range_u64(3..21, 0x2aaaa);
        assert_eq!(buf.get_bit_range_u64(3..21), 0x2aaaa);
        assert_eq!(buf.get_bit_range_u64(0..3), 0);
        assert_eq!(buf.get_bit_range_u64(21..24), 0);
    }

    #[test]
    fn set_preserves_neighbours() {
        let mut buf = [0xff_u8; 2];
        buf.set_bit_range_u64(4..12, 0);
        assert_eq!(buf, [0x0f, 0xf0]);
    }

    #[test]
    fn subset_view() {
        let mut buf = [0_u8; 4];
        {
            let mut v = BitMutView::new_subset(&mut buf, 8..24);
            v.set_field(0..8, 0x5a_u8);
            v.set_bit(15, true);
        }
        assert_eq!(buf, [0x00, 0x5a, 0x80, 0x00]);

        let v = BitView::new(&buf);
        let sub = BitView::new_subset(&buf, 8..24);
        assert_eq!(sub.get_bit_range_u64(0..8), 0x5a);
        assert_eq!(v.get_field::<u32>(8..16), 0x5a);
    }

    #[test]
    #[should_panic]
    fn value_too_wide() {
        let mut buf = [0_u8; 1];
        buf.set_bit_range_u64(0..4, 0x1f);
    }
}
