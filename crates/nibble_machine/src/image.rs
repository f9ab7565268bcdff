//! Packing of the nibble stream into a byte image.
//!
//! The encoder and the interpreter both go through [`nibble_at`] and
//! [`pack`], so an image decoded with the packing it was encoded with
//! always yields the original stream.

use alloc::vec::Vec;

use crate::Nibble;

pub const NIBBLE_MASK: u8 = 0x0F;

/// Which half of a byte holds the even-positioned nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NibbleOrder {
    /// Even positions live in the high nibble.
    #[default]
    Little,
    /// Even positions live in the low nibble.
    Big,
}

impl NibbleOrder {
    fn is_high(self, position: usize) -> bool {
        let even = position % 2 == 0;
        match self {
            NibbleOrder::Little => even,
            NibbleOrder::Big => !even,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    /// Two stream values per byte.
    Nibbles(NibbleOrder),
    /// One stream value per byte, stored in the low nibble.
    Bytes,
}

impl Default for Packing {
    fn default() -> Self {
        Packing::Nibbles(NibbleOrder::default())
    }
}

/// Location of one stream position inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub byte_index: usize,
    /// 0 for the first nibble of a byte, 1 for the second.
    pub selector: u8,
    pub byte: u8,
    pub nibble: Nibble,
}

/// Decodes the value at stream `position`, or `None` past the end of `image`.
pub fn nibble_at(image: &[u8], position: usize, packing: Packing) -> Option<Slot> {
    match packing {
        Packing::Nibbles(order) => {
            let byte_index = position / 2;
            let byte = *image.get(byte_index)?;
            let nibble = if order.is_high(position) {
                byte >> 4
            } else {
                byte & NIBBLE_MASK
            };
            Some(Slot {
                byte_index,
                selector: (position % 2) as u8,
                byte,
                nibble,
            })
        }
        Packing::Bytes => {
            let byte = *image.get(position)?;
            Some(Slot {
                byte_index: position,
                selector: 0,
                byte,
                nibble: byte & NIBBLE_MASK,
            })
        }
    }
}

/// Packs stream values into bytes. Values are masked to 4 bits. A trailing
/// unpaired nibble is flushed with its partner nibble zero.
pub fn pack(values: &[Nibble], packing: Packing) -> Vec<u8> {
    match packing {
        Packing::Bytes => values.iter().map(|value| value & NIBBLE_MASK).collect(),
        Packing::Nibbles(order) => {
            let mut bytes = Vec::with_capacity(values.len().div_ceil(2));
            for (position, value) in values.iter().enumerate() {
                let value = value & NIBBLE_MASK;
                let shifted = if order.is_high(position) {
                    value << 4
                } else {
                    value
                };
                if position % 2 == 0 {
                    bytes.push(shifted);
                } else if let Some(byte) = bytes.last_mut() {
                    *byte |= shifted;
                }
            }
            bytes
        }
    }
}

/// Recovers every stream value held by `image`.
pub fn unpack(image: &[u8], packing: Packing) -> Vec<Nibble> {
    let positions = match packing {
        Packing::Nibbles(_) => image.len().saturating_mul(2),
        Packing::Bytes => image.len(),
    };
    (0..positions)
        .filter_map(|position| nibble_at(image, position, packing))
        .map(|slot| slot.nibble)
        .collect()
}
