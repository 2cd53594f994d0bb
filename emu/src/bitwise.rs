use std::fmt::Debug;
use std::mem::size_of;
use std::ops::RangeInclusive;

/// Helper methods to manipulate bits; `bit_idx` counts from lsb to msb
/// (right to left).
pub trait Bits
where
    Self: Clone + Sized + Into<u128> + TryFrom<u128> + From<bool> + TryInto<u8> + From<u8>,
    <Self as TryFrom<u128>>::Error: Debug,
    <Self as TryInto<u8>>::Error: Debug,
{
    fn get_bit(&self, bit_idx: u8) -> bool {
        debug_assert!(bit_idx < (size_of::<Self>() * 8) as u8);
        let bitwise: u128 = <Self as Into<u128>>::into(self.clone());
        (bitwise & (1 << bit_idx)) != 0
    }

    fn set_bit(&mut self, bit_idx: u8, value: bool) {
        debug_assert!(bit_idx < (size_of::<Self>() * 8) as u8);
        let mut bitwise: u128 = <Self as Into<u128>>::into(self.clone());
        let mask = 1 << bit_idx;
        if value {
            bitwise |= mask;
        } else {
            bitwise &= !mask;
        }
        *self = <Self as TryFrom<u128>>::try_from(bitwise).unwrap();
    }

    fn get_bits(&self, bits_range: RangeInclusive<u8>) -> Self {
        let mut bits = 0;
        for (shift_value, bit_index) in bits_range.enumerate() {
            let bit_value: u128 = self.get_bit(bit_index).into();
            bits |= bit_value << shift_value;
        }
        bits.try_into().unwrap()
    }

    fn get_byte(&self, byte_nth: u8) -> u8 {
        debug_assert!(byte_nth < size_of::<Self>() as u8);
        self.get_bits(byte_nth * 8..=byte_nth * 8 + 7)
            .try_into()
            .unwrap()
    }

    fn set_byte(&mut self, byte_nth: u8, value: u8) {
        debug_assert!(byte_nth < size_of::<Self>() as u8);
        let mut bitwise: u128 = <Self as Into<u128>>::into(self.clone());
        let mask: u128 = !(0xFF << (8 * byte_nth));
        let shifted_value = u128::from(value) << (8 * byte_nth);
        bitwise = (bitwise & mask) | shifted_value;
        *self = <Self as TryFrom<u128>>::try_from(bitwise).unwrap();
    }
}

impl Bits for u128 {}
impl Bits for u64 {}
impl Bits for u32 {}
impl Bits for u16 {}
impl Bits for u8 {}
