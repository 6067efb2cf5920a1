//! A very simple u4/nibble implementation.
//!
//! HID++2.0 packs the function ID and the software ID into the two halves of
//! the fourth byte of every message.

/// Represents an unsigned 4-bit value (nibble) encoded as a byte.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct U4(u8);

impl U4 {
    /// The largest value a nibble can hold.
    pub const MAX: U4 = U4(0x0f);

    /// Constructs a nibble from a value, returning [`None`] if it does not fit
    /// into 4 bits.
    pub const fn new(value: u8) -> Option<Self> {
        if value <= 0x0f { Some(Self(value)) } else { None }
    }

    /// Constructs a nibble from the 4 low/rightmost bits of a byte.
    pub const fn from_lo(raw: u8) -> Self {
        Self(raw & 0x0f)
    }

    /// Constructs a nibble from the 4 high/leftmost bits of a byte.
    pub const fn from_hi(raw: u8) -> Self {
        Self(raw >> 4)
    }

    /// Constructs a byte with the nibble set as the 4 low/rightmost bits.
    pub const fn to_lo(self) -> u8 {
        self.0
    }

    /// Constructs a byte with the nibble set as the 4 high/leftmost bits.
    pub const fn to_hi(self) -> u8 {
        self.0 << 4
    }
}

impl From<U4> for u8 {
    fn from(value: U4) -> Self {
        value.0
    }
}

/// Combines two nibbles to a byte, with `a` being set to the 4 leftmost and
/// `b` being set to the 4 rightmost bits.
pub const fn combine(a: U4, b: U4) -> u8 {
    a.to_hi() | b.to_lo()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_places_function_in_high_nibble() {
        assert_eq!(combine(U4::from_lo(0x1), U4::from_lo(0x8)), 0x18);
        assert_eq!(U4::from_hi(0x18), U4::from_lo(0x1));
        assert_eq!(U4::from_lo(0x18), U4::from_lo(0x8));
    }

    #[test]
    fn new_rejects_values_wider_than_four_bits() {
        assert_eq!(U4::new(0x0f), Some(U4::MAX));
        assert_eq!(U4::new(0x10), None);
    }
}
