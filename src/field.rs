use core::fmt;

use num_traits::NumCast;

/// one bit range within a 64-bit instruction word.
///
/// descriptors are plain values; nothing here checks `offset + width <= 64`. that is the job of
/// [`FormatRegistry::build`](crate::FormatRegistry::build), which refuses any definition holding
/// a descriptor that fails [`FieldDescriptor::is_valid`]. extraction on an invalid descriptor does
/// not panic, it just produces whatever bits survive the shifts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    offset: u8,
    width: u8,
    signed: bool,
}

impl FieldDescriptor {
    pub const fn unsigned(offset: u8, width: u8) -> Self {
        FieldDescriptor { offset, width, signed: false }
    }

    pub const fn signed(offset: u8, width: u8) -> Self {
        FieldDescriptor { offset, width, signed: true }
    }

    pub fn offset(&self) -> u8 {
        self.offset
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn is_valid(&self) -> bool {
        self.width >= 1 && self.width <= 64 && (self.offset as u32 + self.width as u32) <= 64
    }

    /// the bits of a word this field covers, in place.
    pub fn mask(&self) -> u64 {
        low_mask(self.width).checked_shl(self.offset as u32).unwrap_or(0)
    }

    /// the field's raw bits, right-aligned, with no sign extension.
    pub fn raw(&self, word: u64) -> u64 {
        word.checked_shr(self.offset as u32).unwrap_or(0) & low_mask(self.width)
    }

    pub fn extract(&self, word: u64) -> FieldValue {
        let raw = self.raw(word);
        if self.signed {
            FieldValue::Signed(sign_extend(raw, self.width))
        } else {
            FieldValue::Unsigned(raw)
        }
    }

    /// true if the two descriptors share any bit.
    pub fn overlaps(&self, other: &FieldDescriptor) -> bool {
        self.mask() & other.mask() != 0
    }
}

fn low_mask(width: u8) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// sign-extend the low `width` bits of `value` to an i64.
pub fn sign_extend(value: u64, width: u8) -> i64 {
    if width == 0 {
        return 0;
    }
    if width >= 64 {
        return value as i64;
    }
    let shift = 64 - width as u32;
    ((value << shift) as i64) >> shift
}

/// a field as pulled out of an instruction word.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
}

impl FieldValue {
    /// the value's bits as a u64. signed values are reinterpreted, not clamped.
    pub fn bits(&self) -> u64 {
        match self {
            FieldValue::Unsigned(v) => *v,
            FieldValue::Signed(v) => *v as u64,
        }
    }

    /// numeric conversion into any primitive, `None` if the value does not fit.
    pub fn get<T: NumCast>(&self) -> Option<T> {
        match self {
            FieldValue::Unsigned(v) => num_traits::cast(*v),
            FieldValue::Signed(v) => num_traits::cast(*v),
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, FieldValue::Signed(_))
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Unsigned(v) => write!(f, "{:#x}", v),
            FieldValue::Signed(v) => {
                if *v < 0 {
                    write!(f, "-{:#x}", v.unsigned_abs())
                } else {
                    write!(f, "{:#x}", v)
                }
            }
        }
    }
}
