use super::io::WriteLeExt;
use super::{EventKind, FormatVersion, Header, WRAM_BLOCK_SIZE};
use crate::registers::RegisterSnapshot;
use std::io::{self, Write};

/// Frame written ahead of every event payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceEvent {
    pub kind: EventKind,
    pub counter_delta: u64,
}

/// An event together with its payload.
#[derive(Clone, Copy, Debug)]
pub enum Event<'a> {
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
        wram: [&'a [u8; WRAM_BLOCK_SIZE]; 2],
    },
    Finished,
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ReadByte { .. } => EventKind::ReadByte,
            Event::ReadWord { .. } => EventKind::ReadWord,
            Event::Irq => EventKind::Irq,
            Event::Nmi => EventKind::Nmi,
            Event::Reset { .. } => EventKind::Reset,
            Event::Finished => EventKind::Finished,
        }
    }
}

/// Serializes events onto one log output.
///
/// Tracks the counter value of the last written frame so every frame carries
/// the distance to its predecessor.
pub struct EventEncoder<W: Write> {
    out: W,
    format: FormatVersion,
    last_written_counter: u64,
    events_written: u64,
}

impl<W: Write> EventEncoder<W> {
    pub fn new(out: W, format: FormatVersion) -> Self {
        Self {
            out,
            format,
            last_written_counter: 0,
            events_written: 0,
        }
    }

    pub fn format(&self) -> FormatVersion {
        self.format
    }

    pub fn last_written_counter(&self) -> u64 {
        self.last_written_counter
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    pub fn write_header(&mut self, header: &Header) -> io::Result<()> {
        if header.format != self.format {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "header format differs from encoder format",
            ));
        }
        header.write_to(&mut self.out)
    }

    /// Writes `event` stamped with the absolute instruction counter `counter`.
    pub fn emit(&mut self, event: &Event<'_>, counter: u64) -> io::Result<TraceEvent> {
        let counter_delta = counter
            .checked_sub(self.last_written_counter)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "instruction counter went backwards",
                )
            })?;
        let frame = TraceEvent {
            kind: event.kind(),
            counter_delta,
        };

        self.out.write_u8(frame.kind as u8)?;
        self.out.write_u64_le(frame.counter_delta)?;

        match event {
            Event::ReadByte { address, value } => {
                self.out.write_u32_le(*address)?;
                self.out.write_u8(*value)?;
            }
            Event::ReadWord { address, value } => {
                self.out.write_u32_le(*address)?;
                self.out.write_u16_le(*value)?;
            }
            Event::Reset { registers, wram } => {
                self.out.write_all(&registers.to_bytes())?;
                for block in wram {
                    self.out.write_all(&block[..])?;
                }
            }
            Event::Irq | Event::Nmi | Event::Finished => {}
        }

        self.last_written_counter = counter;
        self.events_written += 1;
        Ok(frame)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
