//! Decides which memory reads are worth a trace event.
//!
//! Only save RAM and memory mapped I/O are interesting to the analysis tool;
//! ROM reads and plain work RAM reads are reconstructed from the instruction
//! stream and the RESET memory image instead.

pub const ROM_OFFSET_START: u16 = 0x8000;
pub const LOW_RAM_MIRROR_END: u16 = 0x2000;

pub const WRAM_BANK: u8 = 0x7E;
pub const SYSTEM_BANK: u8 = 0x00;

/// Classification of a bank:offset pair after system-area remapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    Rom,
    WorkRam,
    Mmio,
    SaveRam,
    Other,
}

impl Region {
    pub fn is_recorded(self) -> bool {
        matches!(self, Region::Mmio | Region::SaveRam)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AddressCuller;

impl AddressCuller {
    pub fn new() -> Self {
        Self
    }

    pub fn should_record(&self, address: u32) -> bool {
        Self::classify(address).is_recorded()
    }

    pub fn classify(address: u32) -> Region {
        let mut bank = ((address >> 16) & 0xFF) as u8;
        let offset = (address & 0xFFFF) as u16;

        if offset >= ROM_OFFSET_START {
            return Region::Rom;
        }

        // System banks mirror low RAM and the register area below $8000
        if matches!(bank, 0x00..=0x3F | 0x80..=0xBF) {
            bank = if offset < LOW_RAM_MIRROR_END {
                WRAM_BANK
            } else {
                SYSTEM_BANK
            };
        }

        match bank {
            0x70..=0x7D | 0xF0..=0xFF => Region::SaveRam,
            SYSTEM_BANK if offset >= LOW_RAM_MIRROR_END => Region::Mmio,
            0x7E | 0x7F => Region::WorkRam,
            _ => Region::Other,
        }
    }
}
