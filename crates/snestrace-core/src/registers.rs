use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /* 65C816 processor status, as the emulator stores it in a 16 bit word
        15      8 7  bit  0
        ---- ---E NVMX DIZC
                | |||| ||||
                | |||| |||+- Carry
                | |||| ||+-- Zero
                | |||| |+--- IRQ disable
                | |||| +---- Decimal mode
                | |||+------ Index register width (X)
                | ||+------- Accumulator width (M)
                | |+-------- Overflow
                | +--------- Negative
                +----------- Emulation mode
     */
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct StatusFlags: u16 {
        const CARRY =       0b0000_0000_0000_0001;
        const ZERO =        0b0000_0000_0000_0010;
        const IRQ_DISABLE = 0b0000_0000_0000_0100;
        const DECIMAL =     0b0000_0000_0000_1000;
        const INDEX_8BIT =  0b0000_0000_0001_0000;
        const MEMORY_8BIT = 0b0000_0000_0010_0000;
        const OVERFLOW =    0b0000_0000_0100_0000;
        const NEGATIVE =    0b0000_0000_1000_0000;
        const EMULATION =   0b0000_0001_0000_0000;
    }
}

/// Flags the interpreter evaluates lazily and keeps outside the packed status word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LazyFlags {
    pub carry: bool,
    pub zero: bool,
    pub negative: bool,
    pub overflow: bool,
}

impl StatusFlags {
    /// Packs the status word, replacing N/V/Z/C with their lazily tracked values.
    pub fn normalize(p: u16, lazy: LazyFlags) -> u16 {
        let mut flags = StatusFlags::from_bits_retain(p);
        flags.remove(
            StatusFlags::OVERFLOW | StatusFlags::CARRY | StatusFlags::NEGATIVE | StatusFlags::ZERO,
        );
        flags.set(StatusFlags::OVERFLOW, lazy.overflow);
        flags.set(StatusFlags::CARRY, lazy.carry);
        flags.set(StatusFlags::NEGATIVE, lazy.negative);
        flags.set(StatusFlags::ZERO, lazy.zero);
        flags.bits()
    }
}

/// Register state as the emulator hands it over.
///
/// `pc` and `wram` are 24 bit bank:offset pointers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawRegisters {
    pub pc: u32,
    pub wram: u32,
    pub p: u16,
    pub a: u16,
    pub x: u16,
    pub y: u16,
    pub s: u16,
    pub d: u16,
    pub db: u8,
}

pub const SNAPSHOT_SIZE: usize = 19;

/// Byte span of one snapshot field inside the packed 19 byte record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpan {
    pub offset: usize,
    pub width: usize,
}

const fn span(offset: usize, width: usize) -> FieldSpan {
    FieldSpan { offset, width }
}

/// pc_bank, pc_address, P, A, X, Y, S, DP, DB, wram_bank, wram_address
pub const SNAPSHOT_FIELDS: [FieldSpan; 11] = [
    span(0, 1),
    span(1, 2),
    span(3, 2),
    span(5, 2),
    span(7, 2),
    span(9, 2),
    span(11, 2),
    span(13, 2),
    span(15, 1),
    span(16, 1),
    span(17, 2),
];

/// Fixed wire representation of the CPU/PPU registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSnapshot {
    pub pc_bank: u8,
    pub pc_address: u16,
    pub p: u16,
    pub a: u16,
    pub x: u16,
    pub y: u16,
    pub s: u16,
    pub dp: u16,
    pub db: u8,
    pub wram_bank: u8,
    pub wram_address: u16,
}

impl From<&RawRegisters> for RegisterSnapshot {
    fn from(raw: &RawRegisters) -> Self {
        RegisterSnapshot {
            pc_bank: (raw.pc >> 16) as u8,
            pc_address: (raw.pc & 0xFFFF) as u16,
            p: raw.p,
            a: raw.a,
            x: raw.x,
            y: raw.y,
            s: raw.s,
            dp: raw.d,
            db: raw.db,
            wram_bank: (raw.wram >> 16) as u8,
            wram_address: (raw.wram & 0xFFFF) as u16,
        }
    }
}

impl RegisterSnapshot {
    pub fn pc(&self) -> u32 {
        ((self.pc_bank as u32) << 16) | self.pc_address as u32
    }

    pub fn to_bytes(&self) -> [u8; SNAPSHOT_SIZE] {
        let mut out = [0u8; SNAPSHOT_SIZE];
        out[0] = self.pc_bank;
        out[1..3].copy_from_slice(&self.pc_address.to_le_bytes());
        out[3..5].copy_from_slice(&self.p.to_le_bytes());
        out[5..7].copy_from_slice(&self.a.to_le_bytes());
        out[7..9].copy_from_slice(&self.x.to_le_bytes());
        out[9..11].copy_from_slice(&self.y.to_le_bytes());
        out[11..13].copy_from_slice(&self.s.to_le_bytes());
        out[13..15].copy_from_slice(&self.dp.to_le_bytes());
        out[15] = self.db;
        out[16] = self.wram_bank;
        out[17..19].copy_from_slice(&self.wram_address.to_le_bytes());
        out
    }

    pub fn from_bytes(raw: &[u8; SNAPSHOT_SIZE]) -> Self {
        let word = |at: usize| u16::from_le_bytes([raw[at], raw[at + 1]]);
        RegisterSnapshot {
            pc_bank: raw[0],
            pc_address: word(1),
            p: word(3),
            a: word(5),
            x: word(7),
            y: word(9),
            s: word(11),
            dp: word(13),
            db: raw[15],
            wram_bank: raw[16],
            wram_address: word(17),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_snapshot_splits_bank_and_offset() {
        let raw = RawRegisters {
            pc: 0x80_8123,
            wram: 0x01_2345,
            p: 0x0134,
            a: 0xBEEF,
            x: 0x0010,
            y: 0x0020,
            s: 0x01FF,
            d: 0x0300,
            db: 0x7E,
        };
        let snap = RegisterSnapshot::from(&raw);

        assert_eq!(snap.pc_bank, 0x80);
        assert_eq!(snap.pc_address, 0x8123);
        assert_eq!(snap.wram_bank, 0x01);
        assert_eq!(snap.wram_address, 0x2345);
        assert_eq!(snap.dp, 0x0300);
        assert_eq!(snap.pc(), 0x80_8123);
    }

    #[test]
    fn test_snapshot_layout_is_packed_little_endian() {
        let snap = RegisterSnapshot {
            pc_bank: 0xC0,
            pc_address: 0x1234,
            p: 0x0201,
            a: 0x0403,
            x: 0x0605,
            y: 0x0807,
            s: 0x0A09,
            dp: 0x0C0B,
            db: 0x0D,
            wram_bank: 0x0E,
            wram_address: 0x100F,
        };
        let bytes = snap.to_bytes();
        assert_eq!(
            bytes,
            [
                0xC0, 0x34, 0x12, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A,
                0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10
            ]
        );
        assert_eq!(RegisterSnapshot::from_bytes(&bytes), snap);
    }

    #[test]
    fn test_field_spans_cover_record() {
        let mut next = 0;
        for field in SNAPSHOT_FIELDS {
            assert_eq!(field.offset, next);
            next += field.width;
        }
        assert_eq!(next, SNAPSHOT_SIZE);
    }

    #[test]
    fn test_normalize_replaces_lazy_flags() {
        let stored = (StatusFlags::EMULATION | StatusFlags::ZERO | StatusFlags::IRQ_DISABLE).bits();
        let lazy = LazyFlags {
            carry: true,
            zero: false,
            negative: true,
            overflow: false,
        };
        let p = StatusFlags::normalize(stored, lazy);
        assert_eq!(
            StatusFlags::from_bits_retain(p),
            StatusFlags::EMULATION
                | StatusFlags::IRQ_DISABLE
                | StatusFlags::CARRY
                | StatusFlags::NEGATIVE
        );
    }
}
