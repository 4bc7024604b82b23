//! Bit layout of a stack slot.
//!
//! Slot bit 0 holds the sign bit of the value, slot bits 1..=31 hold value
//! bits 0..=30 least-significant first. Slot bit `k` lives in byte `k / 8`
//! at bit position `k % 8`.

use crate::common::STACK_ENTRY_SIZE;

pub type Slot = [u8; STACK_ENTRY_SIZE];

fn set_bit(slot: &mut Slot, bit: usize, value: bool) {
    if value {
        slot[bit / 8] |= 1 << (bit % 8);
    } else {
        slot[bit / 8] &= !(1 << (bit % 8));
    }
}

fn get_bit(slot: &Slot, bit: usize) -> bool {
    slot[bit / 8] >> (bit % 8) & 1 == 1
}

pub fn encode(value: i32) -> Slot {
    let bits = value as u32;
    let mut slot = Slot::default();

    set_bit(&mut slot, 0, bits >> 31 & 1 == 1);
    for i in 0..31 {
        set_bit(&mut slot, i + 1, bits >> i & 1 == 1);
    }

    slot
}

pub fn decode(slot: &Slot) -> i32 {
    let mut bits = (get_bit(slot, 0) as u32) << 31;
    for i in 0..31 {
        bits |= (get_bit(slot, i + 1) as u32) << i;
    }

    bits as i32
}
