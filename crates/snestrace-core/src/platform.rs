//! Host emulator services the recorder depends on.

use crate::format::{RomMode, WRAM_BLOCK_SIZE};
use crate::registers::RawRegisters;
use serde::{Deserialize, Serialize};

/// Supplies the CPU/PPU register state on demand.
pub trait RegisterCapture {
    fn capture_registers(&self) -> RawRegisters;
}

/// Metadata of the loaded program image.
pub trait RomDescriptor {
    fn rom_mode(&self) -> RomMode;
    fn rom_size(&self) -> u32;
    fn rom_checksum(&self) -> u32;
}

/// Source of the 8 byte content id stamped into every header.
pub trait UniqueIdProvider {
    fn next_id(&mut self) -> [u8; 8];
}

/// Work RAM banks $7E and $7F, in that order.
pub trait WorkingMemoryAccess {
    fn wram_blocks(&self) -> [&[u8; WRAM_BLOCK_SIZE]; 2];
}

impl WorkingMemoryAccess for [[u8; WRAM_BLOCK_SIZE]; 2] {
    fn wram_blocks(&self) -> [&[u8; WRAM_BLOCK_SIZE]; 2] {
        [&self[0], &self[1]]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomInfo {
    pub mode: RomMode,
    pub size: u32,
    pub checksum: u32,
}

impl RomInfo {
    pub fn from_descriptor(rom: &dyn RomDescriptor) -> Self {
        Self {
            mode: rom.rom_mode(),
            size: rom.rom_size(),
            checksum: rom.rom_checksum(),
        }
    }
}

impl RomDescriptor for RomInfo {
    fn rom_mode(&self) -> RomMode {
        self.mode
    }

    fn rom_size(&self) -> u32 {
        self.size
    }

    fn rom_checksum(&self) -> u32 {
        self.checksum
    }
}

#[derive(Debug, Default)]
pub struct RandomIdProvider;

impl UniqueIdProvider for RandomIdProvider {
    fn next_id(&mut self) -> [u8; 8] {
        rand::random()
    }
}

/// Hands out ids from a counter. Useful when logs must be reproducible.
#[derive(Debug, Default)]
pub struct SequentialIdProvider {
    next: u64,
}

impl SequentialIdProvider {
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }
}

impl UniqueIdProvider for SequentialIdProvider {
    fn next_id(&mut self) -> [u8; 8] {
        let id = self.next.to_le_bytes();
        self.next = self.next.wrapping_add(1);
        id
    }
}
