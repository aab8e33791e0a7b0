//! On-disk layout of `.trace` logs and harness helper streams.
//!
//! Everything is little-endian and unpadded. A log is a [`Header`] followed by
//! event frames (`kind:u8, counter_delta:u64`, then the kind's payload) up to and
//! including a `FINISHED` frame.

pub mod encoder;
pub mod io;

use crate::error::DecodeError;
use crate::registers::SNAPSHOT_SIZE;
use self::io::{ReadLeExt, WriteLeExt};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

pub use encoder::{Event, EventEncoder, TraceEvent};

pub const FRAME_SIZE: usize = 9;
pub const WRAM_BLOCK_SIZE: usize = 0x1_0000;
pub const WRAM_BLOCK_ADDRESSES: [u32; 2] = [0x7E_0000, 0x7F_0000];
pub const RESET_PAYLOAD_SIZE: usize = SNAPSHOT_SIZE + 2 * WRAM_BLOCK_SIZE;

pub const HELPER_MAGIC: &[u8; 4] = b"STCH";
pub const HELPER_HEADER_SIZE: usize = 7;

/// Tag byte of an event frame.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    ReadByte = 0,
    ReadWord = 1,
    Irq = 2,
    Nmi = 3,
    Reset = 4,
    Finished = 5,
}

impl TryFrom<u8> for EventKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventKind::ReadByte),
            1 => Ok(EventKind::ReadWord),
            2 => Ok(EventKind::Irq),
            3 => Ok(EventKind::Nmi),
            4 => Ok(EventKind::Reset),
            5 => Ok(EventKind::Finished),
            other => Err(DecodeError::UnknownEventKind(other)),
        }
    }
}

impl EventKind {
    /// Size of the fixed payload that follows the frame.
    pub fn payload_size(self) -> usize {
        match self {
            EventKind::ReadByte => 5,
            EventKind::ReadWord => 6,
            EventKind::Reset => RESET_PAYLOAD_SIZE,
            EventKind::Irq | EventKind::Nmi | EventKind::Finished => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RomMode {
    #[default]
    Unknown = 0,
    LoRom = 1,
    HiRom = 2,
}

impl TryFrom<u32> for RomMode {
    type Error = DecodeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RomMode::Unknown),
            1 => Ok(RomMode::LoRom),
            2 => Ok(RomMode::HiRom),
            other => Err(DecodeError::UnknownRomMode(other)),
        }
    }
}

/// Versioned layout, chosen once when a session opens.
///
/// - `V1`: header without `rom_mode`; helper streams carry raw strategy output.
/// - `V2`: header carries `rom_mode`; helper streams start with a helper header
///   naming the strategy that wrote them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    V1,
    #[default]
    V2,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion::V2;

    pub fn number(self) -> u32 {
        match self {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
        }
    }

    pub fn from_number(number: u32) -> Result<Self, DecodeError> {
        match number {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            other => Err(DecodeError::UnsupportedVersion(other)),
        }
    }

    pub fn header_size(self) -> usize {
        match self {
            FormatVersion::V1 => 20,
            FormatVersion::V2 => 24,
        }
    }

    pub fn write_helper_header<W: Write + ?Sized>(
        self,
        out: &mut W,
        strategy: u8,
    ) -> std::io::Result<()> {
        if self == FormatVersion::V1 {
            return Ok(());
        }
        out.write_all(HELPER_MAGIC)?;
        out.write_u8(strategy)?;
        out.write_u16_le(SNAPSHOT_SIZE as u16)
    }

    /// Consumes and checks the helper header (if this version has one) at the start of `input`.
    pub fn read_helper_header<R: Read + ?Sized>(
        self,
        input: &mut R,
        strategy: u8,
    ) -> Result<(), DecodeError> {
        if self == FormatVersion::V1 {
            return Ok(());
        }
        let mut header = [0u8; HELPER_HEADER_SIZE];
        if input.read_up_to(&mut header)? < HELPER_HEADER_SIZE {
            return Err(DecodeError::BadHelperMagic);
        }
        self.helper_body(&header, strategy).map(|_| ())
    }

    /// Strips the helper header (if this version has one) and returns the strategy body.
    pub fn helper_body(self, stream: &[u8], strategy: u8) -> Result<&[u8], DecodeError> {
        if self == FormatVersion::V1 {
            return Ok(stream);
        }
        if stream.len() < HELPER_HEADER_SIZE || &stream[0..4] != HELPER_MAGIC {
            return Err(DecodeError::BadHelperMagic);
        }
        if stream[4] != strategy {
            return Err(DecodeError::StrategyMismatch {
                expected: strategy,
                found: stream[4],
            });
        }
        let record_size = u16::from_le_bytes([stream[5], stream[6]]);
        if record_size as usize != SNAPSHOT_SIZE {
            return Err(DecodeError::Corrupt("helper record size mismatch"));
        }
        Ok(&stream[HELPER_HEADER_SIZE..])
    }
}

/// Leading block of every trace log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub format: FormatVersion,
    pub rom_mode: RomMode,
    pub rom_size: u32,
    pub rom_checksum: u32,
    pub content_id: [u8; 8],
}

impl Header {
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_u32_le(self.format.number())?;
        if self.format == FormatVersion::V2 {
            out.write_u32_le(self.rom_mode as u32)?;
        }
        out.write_u32_le(self.rom_size)?;
        out.write_u32_le(self.rom_checksum)?;
        out.write_all(&self.content_id)
    }

    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<Self, DecodeError> {
        let format = FormatVersion::from_number(input.read_u32_le()?)?;
        let rom_mode = match format {
            FormatVersion::V1 => RomMode::Unknown,
            FormatVersion::V2 => RomMode::try_from(input.read_u32_le()?)?,
        };
        let rom_size = input.read_u32_le()?;
        let rom_checksum = input.read_u32_le()?;
        let mut content_id = [0u8; 8];
        input.read_exact(&mut content_id)?;
        Ok(Header {
            format,
            rom_mode,
            rom_size,
            rom_checksum,
            content_id,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn header(format: FormatVersion) -> Header {
        Header {
            format,
            rom_mode: RomMode::HiRom,
            rom_size: 0x40_0000,
            rom_checksum: 0xA1B2,
            content_id: [1, 2, 3, 4, 5, 6, 7, 8],
        }
    }

    #[test]
    fn test_header_sizes_match_version() {
        for format in [FormatVersion::V1, FormatVersion::V2] {
            let mut out = Vec::new();
            header(format).write_to(&mut out).unwrap();
            assert_eq!(out.len(), format.header_size());
            assert_eq!(&out[0..4], &format.number().to_le_bytes());
        }
    }

    #[test]
    fn test_v1_header_drops_rom_mode() {
        let mut out = Vec::new();
        header(FormatVersion::V1).write_to(&mut out).unwrap();
        let parsed = Header::read_from(&mut Cursor::new(out)).unwrap();
        assert_eq!(parsed.rom_mode, RomMode::Unknown);
        assert_eq!(parsed.rom_size, 0x40_0000);
        assert_eq!(parsed.content_id, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_v2_header_keeps_rom_mode() {
        let mut out = Vec::new();
        header(FormatVersion::V2).write_to(&mut out).unwrap();
        assert_eq!(&out[4..8], &2u32.to_le_bytes());
        let parsed = Header::read_from(&mut Cursor::new(out)).unwrap();
        assert_eq!(parsed, header(FormatVersion::V2));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let bytes = 9u32.to_le_bytes().to_vec();
        let err = Header::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_event_kind_tags() {
        for tag in 0..=5u8 {
            let kind = EventKind::try_from(tag).unwrap();
            assert_eq!(kind as u8, tag);
        }
        assert!(matches!(
            EventKind::try_from(6),
            Err(DecodeError::UnknownEventKind(6))
        ));
    }

    #[test]
    fn test_helper_header_checks_strategy() {
        let mut stream = Vec::new();
        FormatVersion::V2.write_helper_header(&mut stream, 3).unwrap();
        stream.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(stream.len(), HELPER_HEADER_SIZE + 2);

        let body = FormatVersion::V2.helper_body(&stream, 3).unwrap();
        assert_eq!(body, &[0xAA, 0xBB]);

        let err = FormatVersion::V2.helper_body(&stream, 1).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::StrategyMismatch {
                expected: 1,
                found: 3
            }
        ));
        assert!(matches!(
            FormatVersion::V2.helper_body(b"nope", 0),
            Err(DecodeError::BadHelperMagic)
        ));
    }

    #[test]
    fn test_helper_header_read_from_stream() {
        let mut stream = Vec::new();
        FormatVersion::V2.write_helper_header(&mut stream, 2).unwrap();
        stream.push(0x42);

        let mut input = Cursor::new(stream);
        FormatVersion::V2.read_helper_header(&mut input, 2).unwrap();
        assert_eq!(input.read_u8().unwrap(), 0x42);

        assert!(matches!(
            FormatVersion::V2.read_helper_header(&mut Cursor::new(b"STC".to_vec()), 2),
            Err(DecodeError::BadHelperMagic)
        ));
    }

    #[test]
    fn test_v1_helper_streams_are_unframed() {
        let mut stream = Vec::new();
        FormatVersion::V1.write_helper_header(&mut stream, 2).unwrap();
        assert!(stream.is_empty());
        assert_eq!(FormatVersion::V1.helper_body(&[7, 8], 2).unwrap(), &[7, 8]);
    }
}
