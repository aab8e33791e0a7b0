//! Candidate encodings for the register snapshot stream.
//!
//! Every strategy turns a sequence of [`RegisterSnapshot`]s into a byte stream and
//! back. Decoders yield the packed 19 byte records one at a time, so outputs of
//! different strategies can be compared byte for byte without holding them in memory.

use crate::error::DecodeError;
use crate::format::io::ReadLeExt;
use crate::registers::{RegisterSnapshot, SNAPSHOT_FIELDS, SNAPSHOT_SIZE};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Records stored verbatim. The reference every other strategy is checked against.
    Raw,
    /// Bitmask of changed fields followed by those fields.
    ChangeMask,
    /// XOR against the previous record, zero runs collapsed.
    XorRle,
    /// Records batched into LZ4 blocks.
    Lz4Blocks,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Raw,
        StrategyKind::ChangeMask,
        StrategyKind::XorRle,
        StrategyKind::Lz4Blocks,
    ];

    pub fn tag(self) -> u8 {
        match self {
            StrategyKind::Raw => 0,
            StrategyKind::ChangeMask => 1,
            StrategyKind::XorRle => 2,
            StrategyKind::Lz4Blocks => 3,
        }
    }

    pub fn build(self) -> Box<dyn CompressionStrategy> {
        match self {
            StrategyKind::Raw => Box::new(RawStrategy),
            StrategyKind::ChangeMask => Box::new(ChangeMaskStrategy::default()),
            StrategyKind::XorRle => Box::new(XorRleStrategy::default()),
            StrategyKind::Lz4Blocks => Box::new(Lz4BlockStrategy::default()),
        }
    }
}

/// One decoded 19 byte snapshot record.
pub type PackedRecord = [u8; SNAPSHOT_SIZE];

/// Pulls records out of an encoded stream one at a time.
pub trait RecordDecoder {
    /// Next record, or `None` at a clean end of stream.
    fn next_record(&mut self) -> Result<Option<PackedRecord>, DecodeError>;
}

pub trait CompressionStrategy {
    fn kind(&self) -> StrategyKind;

    /// Appends one snapshot. Strategies may hold data back until [`finish`](Self::finish).
    fn add(&mut self, snapshot: &RegisterSnapshot, out: &mut dyn Write) -> io::Result<()>;

    /// Writes anything still buffered. Called once, after the last `add`.
    fn finish(&mut self, out: &mut dyn Write) -> io::Result<()>;

    /// Decoder reading this strategy's stream from `input` as records are requested.
    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> Box<dyn RecordDecoder + 'a>;

    /// Decodes a complete in-memory stream into packed records back to back.
    fn decode(&self, stream: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let mut decoder = self.decoder(Box::new(stream));
        let mut out = Vec::new();
        while let Some(record) = decoder.next_record()? {
            out.extend_from_slice(&record);
        }
        Ok(out)
    }
}

/// `read_exact` that reports a short stream as corruption.
fn read_exact_or<R: Read + ?Sized>(
    input: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), DecodeError> {
    input.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => DecodeError::Corrupt(what),
        _ => DecodeError::Io(err),
    })
}

#[derive(Debug, Default)]
pub struct RawStrategy;

impl CompressionStrategy for RawStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Raw
    }

    fn add(&mut self, snapshot: &RegisterSnapshot, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&snapshot.to_bytes())
    }

    fn finish(&mut self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> Box<dyn RecordDecoder + 'a> {
        Box::new(RawDecoder { input })
    }
}

struct RawDecoder<'a> {
    input: Box<dyn Read + 'a>,
}

impl RecordDecoder for RawDecoder<'_> {
    fn next_record(&mut self) -> Result<Option<PackedRecord>, DecodeError> {
        let mut record = [0u8; SNAPSHOT_SIZE];
        match self.input.read_up_to(&mut record)? {
            0 => Ok(None),
            SNAPSHOT_SIZE => Ok(Some(record)),
            _ => Err(DecodeError::Corrupt("raw stream is not a whole number of records")),
        }
    }
}

#[derive(Debug, Default)]
pub struct ChangeMaskStrategy {
    previous: PackedRecord,
}

impl CompressionStrategy for ChangeMaskStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ChangeMask
    }

    fn add(&mut self, snapshot: &RegisterSnapshot, out: &mut dyn Write) -> io::Result<()> {
        let current = snapshot.to_bytes();
        let mut mask = 0u16;
        for (i, field) in SNAPSHOT_FIELDS.iter().enumerate() {
            let range = field.offset..field.offset + field.width;
            if current[range.clone()] != self.previous[range] {
                mask |= 1 << i;
            }
        }

        out.write_all(&mask.to_le_bytes())?;
        for (i, field) in SNAPSHOT_FIELDS.iter().enumerate() {
            if mask & (1 << i) != 0 {
                out.write_all(&current[field.offset..field.offset + field.width])?;
            }
        }
        self.previous = current;
        Ok(())
    }

    fn finish(&mut self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> Box<dyn RecordDecoder + 'a> {
        Box::new(ChangeMaskDecoder {
            input,
            current: [0; SNAPSHOT_SIZE],
        })
    }
}

struct ChangeMaskDecoder<'a> {
    input: Box<dyn Read + 'a>,
    current: PackedRecord,
}

impl RecordDecoder for ChangeMaskDecoder<'_> {
    fn next_record(&mut self) -> Result<Option<PackedRecord>, DecodeError> {
        let mut mask_bytes = [0u8; 2];
        match self.input.read_up_to(&mut mask_bytes)? {
            0 => return Ok(None),
            2 => {}
            _ => return Err(DecodeError::Corrupt("truncated change mask")),
        }
        let mask = u16::from_le_bytes(mask_bytes);
        if mask >> SNAPSHOT_FIELDS.len() != 0 {
            return Err(DecodeError::Corrupt("change mask names unknown fields"));
        }

        for (i, field) in SNAPSHOT_FIELDS.iter().enumerate() {
            if mask & (1 << i) != 0 {
                read_exact_or(
                    &mut self.input,
                    &mut self.current[field.offset..field.offset + field.width],
                    "truncated changed field",
                )?;
            }
        }
        Ok(Some(self.current))
    }
}

const RLE_LITERAL: u8 = 0x80;
const RLE_MAX_RUN: usize = 0x7F;

/// Each record is XORed with its predecessor and written as runs.
///
/// Control byte `0nnnnnnn` is a run of `n` zero bytes, `1nnnnnnn` is followed
/// by `n` literal bytes. A run never crosses a record boundary.
#[derive(Debug, Default)]
pub struct XorRleStrategy {
    previous: PackedRecord,
}

impl CompressionStrategy for XorRleStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::XorRle
    }

    fn add(&mut self, snapshot: &RegisterSnapshot, out: &mut dyn Write) -> io::Result<()> {
        let current = snapshot.to_bytes();
        let mut xored = [0u8; SNAPSHOT_SIZE];
        for i in 0..SNAPSHOT_SIZE {
            xored[i] = current[i] ^ self.previous[i];
        }

        let mut i = 0;
        while i < SNAPSHOT_SIZE {
            let zero = xored[i] == 0;
            let mut end = i + 1;
            while end < SNAPSHOT_SIZE && (xored[end] == 0) == zero && end - i < RLE_MAX_RUN {
                end += 1;
            }
            let run = (end - i) as u8;
            if zero {
                out.write_all(&[run])?;
            } else {
                out.write_all(&[RLE_LITERAL | run])?;
                out.write_all(&xored[i..end])?;
            }
            i = end;
        }

        self.previous = current;
        Ok(())
    }

    fn finish(&mut self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> Box<dyn RecordDecoder + 'a> {
        Box::new(XorRleDecoder {
            input,
            previous: [0; SNAPSHOT_SIZE],
        })
    }
}

struct XorRleDecoder<'a> {
    input: Box<dyn Read + 'a>,
    previous: PackedRecord,
}

impl RecordDecoder for XorRleDecoder<'_> {
    fn next_record(&mut self) -> Result<Option<PackedRecord>, DecodeError> {
        let mut xored = [0u8; SNAPSHOT_SIZE];
        let mut filled = 0;

        while filled < SNAPSHOT_SIZE {
            let Some(control) = self.input.read_u8_or_eof()? else {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(DecodeError::Corrupt("stream ends inside a record"));
            };
            let run = (control & !RLE_LITERAL) as usize;
            if run == 0 {
                return Err(DecodeError::Corrupt("empty rle run"));
            }
            if filled + run > SNAPSHOT_SIZE {
                return Err(DecodeError::Corrupt("rle run crosses record boundary"));
            }
            // zero runs are already zero in `xored`
            if control & RLE_LITERAL != 0 {
                read_exact_or(
                    &mut self.input,
                    &mut xored[filled..filled + run],
                    "truncated rle literal",
                )?;
            }
            filled += run;
        }

        for i in 0..SNAPSHOT_SIZE {
            self.previous[i] ^= xored[i];
        }
        Ok(Some(self.previous))
    }
}

pub const LZ4_BLOCK_RECORDS: usize = 1024;
const LZ4_BLOCK_BYTES: usize = LZ4_BLOCK_RECORDS * SNAPSHOT_SIZE;

/// Block layout: `uncompressed_len:u32, compressed_len:u32, lz4 block`.
#[derive(Debug, Default)]
pub struct Lz4BlockStrategy {
    pending: Vec<u8>,
}

impl Lz4BlockStrategy {
    fn flush_block(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let compressed = lz4_flex::block::compress(&self.pending);
        out.write_all(&(self.pending.len() as u32).to_le_bytes())?;
        out.write_all(&(compressed.len() as u32).to_le_bytes())?;
        out.write_all(&compressed)?;
        self.pending.clear();
        Ok(())
    }
}

impl CompressionStrategy for Lz4BlockStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Lz4Blocks
    }

    fn add(&mut self, snapshot: &RegisterSnapshot, out: &mut dyn Write) -> io::Result<()> {
        self.pending.extend_from_slice(&snapshot.to_bytes());
        if self.pending.len() >= LZ4_BLOCK_BYTES {
            self.flush_block(out)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut dyn Write) -> io::Result<()> {
        self.flush_block(out)
    }

    fn decoder<'a>(&self, input: Box<dyn Read + 'a>) -> Box<dyn RecordDecoder + 'a> {
        Box::new(Lz4BlockDecoder {
            input,
            block: Vec::new(),
            pos: 0,
        })
    }
}

/// Holds at most one decompressed block.
struct Lz4BlockDecoder<'a> {
    input: Box<dyn Read + 'a>,
    block: Vec<u8>,
    pos: usize,
}

impl Lz4BlockDecoder<'_> {
    /// Loads the next block. Returns false at a clean end of stream.
    fn load_block(&mut self) -> Result<bool, DecodeError> {
        let mut lens = [0u8; 8];
        match self.input.read_up_to(&mut lens)? {
            0 => return Ok(false),
            8 => {}
            _ => return Err(DecodeError::Corrupt("truncated lz4 block header")),
        }
        let raw_len = u32::from_le_bytes([lens[0], lens[1], lens[2], lens[3]]) as usize;
        let packed_len = u32::from_le_bytes([lens[4], lens[5], lens[6], lens[7]]) as usize;

        if raw_len == 0 || raw_len > LZ4_BLOCK_BYTES || !raw_len.is_multiple_of(SNAPSHOT_SIZE) {
            return Err(DecodeError::Corrupt("lz4 block has a bad record length"));
        }
        if packed_len > lz4_flex::block::get_maximum_output_size(raw_len) {
            return Err(DecodeError::Corrupt("lz4 block is larger than its records"));
        }

        let mut packed = vec![0u8; packed_len];
        read_exact_or(&mut self.input, &mut packed, "truncated lz4 block")?;
        let block = lz4_flex::block::decompress(&packed, raw_len)?;
        if block.len() != raw_len {
            return Err(DecodeError::Corrupt("lz4 block length mismatch"));
        }
        self.block = block;
        self.pos = 0;
        Ok(true)
    }
}

impl RecordDecoder for Lz4BlockDecoder<'_> {
    fn next_record(&mut self) -> Result<Option<PackedRecord>, DecodeError> {
        if self.pos == self.block.len() && !self.load_block()? {
            return Ok(None);
        }
        let mut record = [0u8; SNAPSHOT_SIZE];
        record.copy_from_slice(&self.block[self.pos..self.pos + SNAPSHOT_SIZE]);
        self.pos += SNAPSHOT_SIZE;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn snapshots(count: usize) -> Vec<RegisterSnapshot> {
        (0..count)
            .map(|i| RegisterSnapshot {
                pc_bank: 0x80,
                pc_address: 0x8000 + (i as u16 * 3),
                p: if i % 7 == 0 { 0x30 } else { 0x31 },
                a: (i as u16).wrapping_mul(0x0101),
                x: 0x10,
                y: (i / 4) as u16,
                s: 0x1FF - (i % 3) as u16,
                dp: 0,
                db: 0x7E,
                wram_bank: 0,
                wram_address: (i * 2) as u16,
            })
            .collect()
    }

    fn encode(kind: StrategyKind, input: &[RegisterSnapshot]) -> Vec<u8> {
        let mut strategy = kind.build();
        let mut out = Vec::new();
        for snap in input {
            strategy.add(snap, &mut out).unwrap();
        }
        strategy.finish(&mut out).unwrap();
        out
    }

    fn packed(input: &[RegisterSnapshot]) -> Vec<u8> {
        input.iter().flat_map(|s| s.to_bytes()).collect()
    }

    #[test]
    fn test_every_strategy_reproduces_records() {
        // spans more than one lz4 block
        let input = snapshots(LZ4_BLOCK_RECORDS + 37);
        let expected = packed(&input);
        for kind in StrategyKind::ALL {
            let stream = encode(kind, &input);
            let decoded = kind.build().decode(&stream).unwrap();
            assert_eq!(decoded, expected, "{:?} did not reproduce its input", kind);
        }
    }

    #[test]
    fn test_decoders_yield_records_before_reading_the_rest() {
        let input = snapshots(10);
        let expected = packed(&input);
        for kind in StrategyKind::ALL {
            let mut stream = encode(kind, &input);
            // garbage after the last record only fails once it is reached
            stream.extend_from_slice(&[0xFF; 3]);

            let mut decoder = kind.build().decoder(Box::new(&stream[..]));
            for want in expected.chunks(SNAPSHOT_SIZE) {
                let record = decoder.next_record().unwrap().unwrap();
                assert_eq!(&record[..], want, "{:?}", kind);
            }
            assert!(
                matches!(decoder.next_record(), Err(DecodeError::Corrupt(_))),
                "{:?} accepted trailing garbage",
                kind
            );
        }
    }

    #[test]
    fn test_lz4_rejects_oversized_block() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&(SNAPSHOT_SIZE as u32).to_le_bytes());
        stream.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            Lz4BlockStrategy::default().decode(&stream),
            Err(DecodeError::Corrupt(_))
        ));
    }

    #[test]
    fn test_empty_streams_decode_empty() {
        for kind in StrategyKind::ALL {
            let stream = encode(kind, &[]);
            assert!(stream.is_empty(), "{:?} wrote bytes for no input", kind);
            assert!(kind.build().decode(&stream).unwrap().is_empty());
        }
    }

    #[test]
    fn test_repeated_snapshot_is_compact() {
        let snap = snapshots(1)[0];
        let input = vec![snap; 100];

        let change_mask = encode(StrategyKind::ChangeMask, &input);
        // first record carries changed fields, the rest are bare masks
        assert_eq!(change_mask.len() - 2 * 99, 2 + 19 - count_zero_fields(&snap));

        let xor = encode(StrategyKind::XorRle, &input);
        assert!(xor.len() < 3 * 19 + 99 * 2);
    }

    fn count_zero_fields(snap: &RegisterSnapshot) -> usize {
        let bytes = snap.to_bytes();
        SNAPSHOT_FIELDS
            .iter()
            .filter(|f| bytes[f.offset..f.offset + f.width].iter().all(|&b| b == 0))
            .map(|f| f.width)
            .sum()
    }

    #[test]
    fn test_raw_rejects_partial_record() {
        assert!(matches!(
            RawStrategy.decode(&[0u8; 20]),
            Err(DecodeError::Corrupt(_))
        ));
    }

    #[test]
    fn test_change_mask_rejects_unknown_bits() {
        let stream = 0x8000u16.to_le_bytes();
        assert!(ChangeMaskStrategy::default().decode(&stream).is_err());
    }

    #[test]
    fn test_xor_rle_rejects_overlong_run() {
        // 20 zero bytes cannot fit in one 19 byte record
        assert!(XorRleStrategy::default().decode(&[20]).is_err());
        assert!(XorRleStrategy::default().decode(&[RLE_LITERAL | 2, 0xAA]).is_err());
        assert!(XorRleStrategy::default().decode(&[0]).is_err());
    }

    #[test]
    fn test_lz4_rejects_truncated_block() {
        let input = snapshots(10);
        let mut stream = encode(StrategyKind::Lz4Blocks, &input);
        stream.truncate(stream.len() - 1);
        assert!(Lz4BlockStrategy::default().decode(&stream).is_err());
    }

    #[test]
    fn test_tags_are_unique() {
        let mut tags: Vec<u8> = StrategyKind::ALL.iter().map(|k| k.tag()).collect();
        tags.dedup();
        assert_eq!(tags.len(), StrategyKind::ALL.len());
        for kind in StrategyKind::ALL {
            assert_eq!(kind.build().kind(), kind);
        }
    }
}
