use crate::error::DecodeError;
use crate::format::io::ReadLeExt;
use crate::format::{EventKind, Header, WRAM_BLOCK_SIZE};
use crate::registers::{RegisterSnapshot, SNAPSHOT_SIZE};
use std::io::Read;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceRecord {
    ReadByte {
        address: u32,
        value: u8,
    },
    ReadWord {
        address: u32,
        value: u16,
    },
    Irq,
    Nmi,
    Reset {
        registers: RegisterSnapshot,
        /// Banks $7E and $7F back to back.
        wram: Vec<u8>,
    },
    Finished,
}

impl TraceRecord {
    pub fn kind(&self) -> EventKind {
        match self {
            TraceRecord::ReadByte { .. } => EventKind::ReadByte,
            TraceRecord::ReadWord { .. } => EventKind::ReadWord,
            TraceRecord::Irq => EventKind::Irq,
            TraceRecord::Nmi => EventKind::Nmi,
            TraceRecord::Reset { .. } => EventKind::Reset,
            TraceRecord::Finished => EventKind::Finished,
        }
    }
}

/// A decoded frame with its absolute instruction index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedRecord {
    pub counter: u64,
    pub counter_delta: u64,
    pub record: TraceRecord,
}

/// Sequential decoder for one `.trace` log.
///
/// Absolute instruction indices are rebuilt with a running sum over the frame deltas.
pub struct TraceReader<R> {
    reader: R,
    pub header: Header,
    counter: u64,
    finished: bool,
}

impl<R: Read> TraceReader<R> {
    pub fn open(mut reader: R) -> Result<Self, DecodeError> {
        let header = Header::read_from(&mut reader)?;
        Ok(Self {
            reader,
            header,
            counter: 0,
            finished: false,
        })
    }

    /// True once the `FINISHED` frame has been read.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reads the next frame. Returns `Ok(None)` after `FINISHED` or at a clean end of stream.
    pub fn next_record(&mut self) -> Result<Option<TimedRecord>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        let Some(tag) = self.reader.read_u8_or_eof()? else {
            return Ok(None);
        };
        let kind = EventKind::try_from(tag)?;
        let counter_delta = self.reader.read_u64_le()?;

        let record = match kind {
            EventKind::ReadByte => TraceRecord::ReadByte {
                address: self.reader.read_u32_le()?,
                value: self.reader.read_u8()?,
            },
            EventKind::ReadWord => TraceRecord::ReadWord {
                address: self.reader.read_u32_le()?,
                value: self.reader.read_u16_le()?,
            },
            EventKind::Irq => TraceRecord::Irq,
            EventKind::Nmi => TraceRecord::Nmi,
            EventKind::Reset => {
                let mut regs = [0u8; SNAPSHOT_SIZE];
                self.reader.read_exact(&mut regs)?;
                let mut wram = vec![0u8; 2 * WRAM_BLOCK_SIZE];
                self.reader.read_exact(&mut wram)?;
                TraceRecord::Reset {
                    registers: RegisterSnapshot::from_bytes(&regs),
                    wram,
                }
            }
            EventKind::Finished => {
                self.finished = true;
                TraceRecord::Finished
            }
        };

        self.counter = self
            .counter
            .checked_add(counter_delta)
            .ok_or(DecodeError::Corrupt("instruction counter overflow"))?;

        Ok(Some(TimedRecord {
            counter: self.counter,
            counter_delta,
            record,
        }))
    }

    /// Drains the remaining frames.
    pub fn read_all(&mut self) -> Result<Vec<TimedRecord>, DecodeError> {
        let mut out = Vec::new();
        while let Some(record) = self.next_record()? {
            out.push(record);
        }
        Ok(out)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<TimedRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format::{Event, EventEncoder, FormatVersion, RomMode};
    use proptest::prelude::*;
    use std::io::Cursor;

    fn header(format: FormatVersion) -> Header {
        Header {
            format,
            rom_mode: RomMode::LoRom,
            rom_size: 0x10_0000,
            rom_checksum: 0x1234,
            content_id: *b"abcdefgh",
        }
    }

    fn encode(counters: &[u64], format: FormatVersion) -> Vec<u8> {
        let mut enc = EventEncoder::new(Vec::new(), format);
        enc.write_header(&header(format)).unwrap();
        for (i, &counter) in counters.iter().enumerate() {
            let event = match i % 3 {
                0 => Event::ReadByte {
                    address: 0x70_0000 + i as u32,
                    value: i as u8,
                },
                1 => Event::Nmi,
                _ => Event::ReadWord {
                    address: 0x00_2100,
                    value: i as u16,
                },
            };
            enc.emit(&event, counter).unwrap();
        }
        let last = counters.last().copied().unwrap_or(0);
        enc.emit(&Event::Finished, last).unwrap();
        enc.into_inner()
    }

    #[test]
    fn test_reads_back_events() {
        let bytes = encode(&[3, 3, 10], FormatVersion::V2);
        let mut reader = TraceReader::open(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.header, header(FormatVersion::V2));

        let records = reader.read_all().unwrap();
        assert!(reader.is_finished());
        assert_eq!(records.len(), 4);
        assert_eq!(
            records[0].record,
            TraceRecord::ReadByte {
                address: 0x70_0000,
                value: 0
            }
        );
        assert_eq!(records[1].record, TraceRecord::Nmi);
        assert_eq!(records[1].counter_delta, 0);
        assert_eq!(records[2].counter, 10);
        assert_eq!(records[3].record, TraceRecord::Finished);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let mut bytes = Vec::new();
        header(FormatVersion::V1).write_to(&mut bytes).unwrap();
        bytes.push(0x7F);
        bytes.extend_from_slice(&[0; 8]);

        let mut reader = TraceReader::open(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(DecodeError::UnknownEventKind(0x7F))
        ));
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let mut bytes = encode(&[1], FormatVersion::V2);
        // drop FINISHED and half of the READ_BYTE payload
        bytes.truncate(bytes.len() - 9 - 3);
        let mut reader = TraceReader::open(Cursor::new(bytes)).unwrap();
        assert!(matches!(reader.next_record(), Err(DecodeError::Io(_))));
    }

    #[test]
    fn test_missing_finished_ends_cleanly() {
        let mut bytes = encode(&[5], FormatVersion::V2);
        bytes.truncate(bytes.len() - 9);
        let mut reader = TraceReader::open(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 1);
        assert!(!reader.is_finished());
    }

    proptest! {
        #[test]
        fn prop_prefix_sum_restores_counters(steps in prop::collection::vec(0u64..5_000, 0..64)) {
            let mut counters = Vec::with_capacity(steps.len());
            let mut counter = 0u64;
            for step in steps {
                counter += step;
                counters.push(counter);
            }

            for format in [FormatVersion::V1, FormatVersion::V2] {
                let bytes = encode(&counters, format);
                let reader = TraceReader::open(Cursor::new(bytes)).unwrap();
                let decoded: Vec<u64> = reader
                    .map(|r| r.unwrap().counter)
                    .collect();
                prop_assert_eq!(&decoded[..counters.len()], &counters[..]);
                prop_assert_eq!(decoded.len(), counters.len() + 1);
            }
        }
    }
}
