//! Named bit-fields over 32-bit hardware registers.
//!
//! Register layouts are explicit shift/width tables rather than packed
//! struct overlays, so the bit positions are independent of host endianness
//! and compiler layout.

use std::fmt;

/// A contiguous run of bits inside a 32-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitField {
    /// Field name as used in logs
    pub name: &'static str,
    /// Position of the least significant bit
    pub shift: u8,
    /// Number of bits, 1..=32
    pub width: u8,
}

impl BitField {
    /// A multi-bit field.
    pub const fn new(name: &'static str, shift: u8, width: u8) -> Self {
        Self { name, shift, width }
    }

    /// A single-bit flag.
    pub const fn flag(name: &'static str, shift: u8) -> Self {
        Self::new(name, shift, 1)
    }

    /// Mask of the field in register position.
    pub const fn mask(&self) -> u32 {
        let low = if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        };
        low << self.shift
    }

    /// Extract the field value from a register word.
    pub const fn get(&self, word: u32) -> u32 {
        (word & self.mask()) >> self.shift
    }

    /// Check a single-bit flag.
    pub const fn is_set(&self, word: u32) -> bool {
        self.get(word) != 0
    }

    /// Return `word` with the field replaced by `value` (truncated to width).
    pub const fn set(&self, word: u32, value: u32) -> u32 {
        (word & !self.mask()) | ((value << self.shift) & self.mask())
    }

    /// A register word with only this field set to `value`.
    pub const fn value(&self, value: u32) -> u32 {
        self.set(0, value)
    }

    /// A register word with only this flag set.
    pub const fn bit(&self) -> u32 {
        self.value(1)
    }
}

/// A named register at a fixed offset inside one mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterLayout {
    /// Register name
    pub name: &'static str,
    /// Index of the region the register lives in
    pub region: usize,
    /// Byte offset within the region
    pub offset: usize,
    /// Known fields, ascending by shift
    pub fields: &'static [BitField],
}

impl RegisterLayout {
    /// A register without documented fields.
    pub const fn plain(name: &'static str, region: usize, offset: usize) -> Self {
        Self {
            name,
            region,
            offset,
            fields: &[],
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&BitField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Render the non-zero fields of `word` for logs.
    pub fn decode(&self, word: u32) -> Decoded<'_> {
        Decoded { layout: self, word }
    }
}

/// Display adapter returned by [`RegisterLayout::decode`].
#[derive(Debug, Clone, Copy)]
pub struct Decoded<'a> {
    layout: &'a RegisterLayout,
    word: u32,
}

impl fmt::Display for Decoded<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=0x{:08x}", self.layout.name, self.word)?;
        let mut first = true;
        for field in self.layout.fields {
            let v = field.get(self.word);
            if v == 0 {
                continue;
            }
            f.write_str(if first { " [" } else { " " })?;
            first = false;
            if field.width == 1 {
                f.write_str(field.name)?;
            } else {
                write!(f, "{}={v:#x}", field.name)?;
            }
        }
        if !first {
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// All documented registers of one device family.
#[derive(Debug, Clone, Copy)]
pub struct RegisterTable {
    /// Device family name
    pub family: &'static str,
    /// Registers in the family
    pub registers: &'static [RegisterLayout],
}

impl RegisterTable {
    /// Look up a register by name.
    pub fn get(&self, name: &str) -> Option<&RegisterLayout> {
        self.registers.iter().find(|r| r.name == name)
    }

    /// Look up the register at `offset` in `region`.
    pub fn at(&self, region: usize, offset: usize) -> Option<&RegisterLayout> {
        self.registers
            .iter()
            .find(|r| r.region == region && r.offset == offset)
    }
}
