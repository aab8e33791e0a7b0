//! The recorder the emulator talks to.
//!
//! One [`TraceSession`] lives for the whole emulator run. It owns at most one open
//! `.trace` file at a time; a CPU reset closes that file and starts
//! `trace<N+1>.trace` with a snapshot of work RAM.

use crate::config::TraceConfig;
use crate::culler::AddressCuller;
use crate::error::{Result, TraceError};
use crate::format::{Event, EventEncoder, Header};
use crate::harness::StateCompressionHarness;
use crate::platform::{
    RandomIdProvider, RegisterCapture, RomDescriptor, RomInfo, UniqueIdProvider,
    WorkingMemoryAccess,
};
use crate::registers::{RawRegisters, RegisterSnapshot};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Interrupt-class events reported by the CPU core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuEvent {
    Irq,
    Nmi,
    Reset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryAccess {
    Byte(u8),
    Word(u16),
}

struct ActiveSession {
    index: u32,
    path: PathBuf,
    content_id: [u8; 8],
    encoder: EventEncoder<Box<dyn Write>>,
    harness: Option<StateCompressionHarness>,
}

#[derive(Serialize)]
struct RomSidecar<'a> {
    session_index: u32,
    format_version: u32,
    content_id: String,
    rom: &'a RomInfo,
}

pub struct TraceSession {
    config: TraceConfig,
    rom: RomInfo,
    ids: Box<dyn UniqueIdProvider>,
    culler: AddressCuller,
    active: Option<ActiveSession>,
    /// Index the next opened file will get.
    rotation_index: u32,
    instruction_counter: u64,
    paused: bool,
    warned_inactive: bool,
}

impl TraceSession {
    pub fn new(
        config: TraceConfig,
        rom: &dyn RomDescriptor,
        ids: Box<dyn UniqueIdProvider>,
    ) -> Self {
        Self {
            config,
            rom: RomInfo::from_descriptor(rom),
            ids,
            culler: AddressCuller::new(),
            active: None,
            rotation_index: 0,
            instruction_counter: 0,
            paused: false,
            warned_inactive: false,
        }
    }

    pub fn with_random_ids(config: TraceConfig, rom: &dyn RomDescriptor) -> Self {
        Self::new(config, rom, Box::new(RandomIdProvider))
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn rotation_index(&self) -> u32 {
        self.rotation_index
    }

    /// Index of the file currently being written.
    pub fn session_index(&self) -> Option<u32> {
        self.active.as_ref().map(|a| a.index)
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    pub fn content_id(&self) -> Option<[u8; 8]> {
        self.active.as_ref().map(|a| a.content_id)
    }

    pub fn instruction_counter(&self) -> u64 {
        self.instruction_counter
    }

    pub fn last_written_counter(&self) -> Option<u64> {
        self.active
            .as_ref()
            .map(|a| a.encoder.last_written_counter())
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn harness_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.harness.is_some())
    }

    /// Opens `trace<rotation_index>.trace`, finalizing any file that is still open.
    pub fn open(&mut self) -> Result<()> {
        self.open_index(self.rotation_index)
    }

    /// Like [`open`](Self::open), but continues the rotation from `name_index`.
    ///
    /// An error from finalizing the previous file takes precedence over one from
    /// opening the new file. Both are logged.
    pub fn open_index(&mut self, name_index: u32) -> Result<()> {
        let finalized = self.finalize();
        let opened = self.open_file(name_index);
        finalized.and(opened)
    }

    fn open_file(&mut self, index: u32) -> Result<()> {
        let path = self.config.trace_path(index);
        let format = self.config.format;
        let header = Header {
            format,
            rom_mode: self.rom.mode,
            rom_size: self.rom.size,
            rom_checksum: self.rom.checksum,
            content_id: self.ids.next_id(),
        };

        let mut encoder = match self.create_output(&path) {
            Ok(out) => EventEncoder::new(out, format),
            Err(err) => {
                log::error!("could not create {}: {err}; tracing disabled", path.display());
                return Err(err.into());
            }
        };
        if let Err(err) = encoder.write_header(&header) {
            log::error!("could not write header to {}: {err}; tracing disabled", path.display());
            return Err(err.into());
        }

        let mut harness_error = None;
        let harness = if self.config.harness_enabled() {
            let config = &self.config;
            match StateCompressionHarness::with_files(format, &config.helper_strategies, |i| {
                config.helper_path(index, i)
            }) {
                Ok(harness) => Some(harness),
                Err(err) => {
                    log::error!("state compression harness unavailable for session {index}: {err}");
                    harness_error = Some(err);
                    None
                }
            }
        } else {
            None
        };

        if self.config.write_rom_sidecar
            && let Err(err) = self.write_sidecar(index, format.number(), header.content_id)
        {
            log::warn!("could not write rom sidecar for session {index}: {err}");
        }

        log::info!(
            "trace session {} opened at {} ({:?})",
            index,
            path.display(),
            format
        );
        self.active = Some(ActiveSession {
            index,
            path,
            content_id: header.content_id,
            encoder,
            harness,
        });
        self.instruction_counter = 0;
        self.rotation_index = index + 1;
        self.warned_inactive = false;

        match harness_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn create_output(&self, path: &Path) -> io::Result<Box<dyn Write>> {
        let file = File::create(path)?;
        let out: Box<dyn Write> = if self.config.buffered {
            Box::new(BufWriter::new(file))
        } else {
            Box::new(file)
        };
        Ok(out)
    }

    fn write_sidecar(&self, index: u32, format_version: u32, content_id: [u8; 8]) -> io::Result<()> {
        let sidecar = RomSidecar {
            session_index: index,
            format_version,
            content_id: content_id.iter().map(|b| format!("{b:02x}")).collect(),
            rom: &self.rom,
        };
        let mut out = BufWriter::new(File::create(self.config.sidecar_path(index))?);
        serde_json::to_writer_pretty(&mut out, &sidecar)?;
        out.flush()
    }

    /// Writes `FINISHED`, closes the file and validates the harness streams.
    ///
    /// Does nothing when no file is open, so it is safe to call more than once.
    pub fn finalize(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        let ActiveSession {
            index,
            path,
            mut encoder,
            harness,
            ..
        } = active;

        let closed = encoder
            .emit(&Event::Finished, self.instruction_counter)
            .and_then(|_| encoder.flush());
        let events = encoder.events_written();
        drop(encoder);

        let validated = match harness {
            Some(harness) => harness.finalize().map(|report| {
                log::info!(
                    "session {} harness: {} strategies agree on {} snapshots",
                    index,
                    report.strategies.len(),
                    report.records
                );
            }),
            None => Ok(()),
        };

        if let Err(err) = closed {
            log::error!("could not finish {}: {err}", path.display());
            return Err(err.into());
        }
        if let Err(err) = validated {
            log::error!("session {index} failed harness validation: {err}");
            return Err(err.into());
        }
        log::info!(
            "trace session {} finalized at {} ({} events)",
            index,
            path.display(),
            events
        );
        Ok(())
    }

    /// Counts one executed instruction.
    pub fn record_instruction(&mut self, before: &RawRegisters, after: &RawRegisters) -> Result<()> {
        let fed = self.feed_harness(before, after);
        self.instruction_counter += 1;
        fed
    }

    /// Captures registers around `step` and records it as one instruction.
    pub fn step_traced<C: RegisterCapture, T>(
        &mut self,
        cpu: &mut C,
        step: impl FnOnce(&mut C) -> T,
    ) -> Result<T> {
        let before = cpu.capture_registers();
        let out = step(cpu);
        let after = cpu.capture_registers();
        self.record_instruction(&before, &after)?;
        Ok(out)
    }

    /// Records an interrupt or reset.
    ///
    /// A reset first finalizes the current file and opens the next one, then writes
    /// the post-reset registers and both work RAM banks after the frame.
    pub fn record_event(
        &mut self,
        event: CpuEvent,
        before: &RawRegisters,
        after: &RawRegisters,
        memory: &dyn WorkingMemoryAccess,
    ) -> Result<()> {
        let result = self.write_cpu_event(event, before, after, memory);
        self.instruction_counter += 1;
        result
    }

    fn write_cpu_event(
        &mut self,
        event: CpuEvent,
        before: &RawRegisters,
        after: &RawRegisters,
        memory: &dyn WorkingMemoryAccess,
    ) -> Result<()> {
        // only the last reset is kept, earlier history goes to the previous file
        let rotated = match event {
            CpuEvent::Reset => self.open(),
            CpuEvent::Irq | CpuEvent::Nmi => Ok(()),
        };
        if event == CpuEvent::Reset && !self.is_active() {
            return rotated;
        }

        let frame = match event {
            CpuEvent::Irq => Event::Irq,
            CpuEvent::Nmi => Event::Nmi,
            CpuEvent::Reset => Event::Reset {
                registers: RegisterSnapshot::from(after),
                wram: memory.wram_blocks(),
            },
        };
        let written = self
            .write_event(&frame)
            .and_then(|()| self.feed_harness(before, after));
        // a failed check of the previous file is reported ahead of a failure in the new one
        rotated.and(written)
    }

    /// Records a memory read if the address is in a range the analysis cares about.
    pub fn record_memory_access(&mut self, address: u32, access: MemoryAccess) -> Result<()> {
        if self.paused || !self.culler.should_record(address) {
            return Ok(());
        }
        let event = match access {
            MemoryAccess::Byte(value) => Event::ReadByte { address, value },
            MemoryAccess::Word(value) => Event::ReadWord { address, value },
        };
        self.write_event(&event)
    }

    pub fn record_read_byte(&mut self, address: u32, value: u8) -> Result<()> {
        self.record_memory_access(address, MemoryAccess::Byte(value))
    }

    pub fn record_read_word(&mut self, address: u32, value: u16) -> Result<()> {
        self.record_memory_access(address, MemoryAccess::Word(value))
    }

    /// Suspends memory access recording while the caller does its own reads.
    ///
    /// # Panics
    ///
    /// If `paused` equals the current state. Unbalanced pause calls are a caller bug.
    pub fn set_paused(&mut self, paused: bool) {
        assert_ne!(
            self.paused, paused,
            "trace session pause toggled to its current state ({paused})"
        );
        self.paused = paused;
    }

    fn write_event(&mut self, event: &Event<'_>) -> Result<()> {
        let counter = self.instruction_counter;
        let Some(active) = self.active.as_mut() else {
            self.warn_inactive();
            return Ok(());
        };
        if let Err(err) = active.encoder.emit(event, counter) {
            return Err(self.disable(err));
        }
        Ok(())
    }

    fn feed_harness(&mut self, before: &RawRegisters, after: &RawRegisters) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        let Some(harness) = active.harness.as_mut() else {
            return Ok(());
        };
        let result = harness.add_pair(&RegisterSnapshot::from(before), &RegisterSnapshot::from(after));
        if let Err(err) = result {
            log::error!("state compression harness for session {} dropped: {err}", active.index);
            active.harness = None;
            return Err(err.into());
        }
        Ok(())
    }

    /// Drops the open file after a write failure. Recording resumes on the next open.
    fn disable(&mut self, err: io::Error) -> TraceError {
        if let Some(active) = self.active.take() {
            log::error!(
                "write to {} failed: {err}; tracing disabled until the next reset",
                active.path.display()
            );
        }
        TraceError::Io(err)
    }

    fn warn_inactive(&mut self) {
        if !self.warned_inactive {
            log::warn!("trace event dropped, no trace file is open");
            self.warned_inactive = true;
        }
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        if let Err(err) = self.finalize() {
            log::error!("trace session finalize on drop failed: {err}");
        }
    }
}
