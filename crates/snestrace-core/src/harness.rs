//! Runs several snapshot encodings side by side and proves they agree.
//!
//! Strategy 0 is the reference. Every other strategy must decode to exactly the
//! same bytes, otherwise finalizing reports which strategy diverged and where.
//! Finished streams are read back and compared record by record.

use crate::error::{DecodeError, HarnessError, ValidationError};
use crate::format::FormatVersion;
use crate::registers::{RegisterSnapshot, SNAPSHOT_SIZE};
use crate::strategy::{CompressionStrategy, PackedRecord, RecordDecoder, StrategyKind};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Destination of one strategy's stream.
pub enum HelperOutput {
    File {
        path: PathBuf,
        writer: BufWriter<File>,
    },
    Memory(Vec<u8>),
}

impl HelperOutput {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = BufWriter::new(File::create(&path)?);
        Ok(HelperOutput::File { path, writer })
    }

    pub fn memory() -> Self {
        HelperOutput::Memory(Vec::new())
    }

    /// Closes the output and opens what was written to it for reading.
    fn into_source(self, kind: StrategyKind) -> io::Result<HelperSource<'static>> {
        match self {
            HelperOutput::File { path, writer } => {
                let file = writer.into_inner().map_err(|e| e.into_error())?;
                drop(file);
                let file = File::open(&path)?;
                let encoded_bytes = file.metadata()?.len() as usize;
                Ok(HelperSource::new(kind, encoded_bytes, BufReader::new(file)))
            }
            HelperOutput::Memory(bytes) => {
                Ok(HelperSource::new(kind, bytes.len(), io::Cursor::new(bytes)))
            }
        }
    }

    /// Closes the output and removes its file, if it has one.
    pub fn discard(self) {
        if let HelperOutput::File { path, writer } = self {
            drop(writer);
            if let Err(err) = fs::remove_file(&path) {
                log::warn!("could not remove helper file {}: {err}", path.display());
            }
        }
    }
}

impl Write for HelperOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            HelperOutput::File { writer, .. } => writer.write(buf),
            HelperOutput::Memory(bytes) => bytes.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            HelperOutput::File { writer, .. } => writer.flush(),
            HelperOutput::Memory(_) => Ok(()),
        }
    }
}

/// A closed helper stream opened for validation, header included.
pub struct HelperSource<'a> {
    pub kind: StrategyKind,
    pub encoded_bytes: usize,
    pub reader: Box<dyn Read + 'a>,
}

impl<'a> HelperSource<'a> {
    pub fn new(kind: StrategyKind, encoded_bytes: usize, reader: impl Read + 'a) -> Self {
        Self {
            kind,
            encoded_bytes,
            reader: Box::new(reader),
        }
    }
}

/// A finished helper stream held in memory, header included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelperStream {
    pub kind: StrategyKind,
    pub bytes: Vec<u8>,
}

impl HelperStream {
    pub fn source(&self) -> HelperSource<'_> {
        HelperSource::new(self.kind, self.bytes.len(), &self.bytes[..])
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrategySummary {
    pub kind: StrategyKind,
    pub encoded_bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessReport {
    /// Snapshots decoded from the reference stream.
    pub records: usize,
    pub strategies: Vec<StrategySummary>,
}

struct Lane {
    strategy: Box<dyn CompressionStrategy>,
    output: HelperOutput,
}

pub struct StateCompressionHarness {
    format: FormatVersion,
    lanes: Vec<Lane>,
    snapshots: u64,
}

impl StateCompressionHarness {
    /// Writes the helper headers. On failure every output is discarded.
    pub fn new(
        format: FormatVersion,
        strategies: Vec<Box<dyn CompressionStrategy>>,
        outputs: Vec<HelperOutput>,
    ) -> Result<Self, HarnessError> {
        if strategies.is_empty() || strategies.len() != outputs.len() {
            let err = HarnessError::StrategyCount {
                strategies: strategies.len(),
                outputs: outputs.len(),
            };
            outputs.into_iter().for_each(HelperOutput::discard);
            return Err(err);
        }

        let mut lanes: Vec<Lane> = Vec::with_capacity(strategies.len());
        let mut pairs = strategies.into_iter().zip(outputs);
        while let Some((strategy, mut output)) = pairs.next() {
            if let Err(err) = format.write_helper_header(&mut output, strategy.kind().tag()) {
                output.discard();
                lanes.into_iter().for_each(|lane| lane.output.discard());
                pairs.for_each(|(_, output)| output.discard());
                return Err(err.into());
            }
            log::debug!("harness lane {} uses {:?}", lanes.len(), strategy.kind());
            lanes.push(Lane { strategy, output });
        }

        Ok(Self {
            format,
            lanes,
            snapshots: 0,
        })
    }

    /// Harness writing `kinds[i]` to the file returned by `path_for(i)`.
    ///
    /// If any file cannot be created, the ones already created are removed.
    pub fn with_files(
        format: FormatVersion,
        kinds: &[StrategyKind],
        mut path_for: impl FnMut(usize) -> PathBuf,
    ) -> Result<Self, HarnessError> {
        let mut outputs = Vec::with_capacity(kinds.len());
        for i in 0..kinds.len() {
            match HelperOutput::create(path_for(i)) {
                Ok(output) => outputs.push(output),
                Err(err) => {
                    outputs.into_iter().for_each(HelperOutput::discard);
                    return Err(err.into());
                }
            }
        }
        let strategies = kinds.iter().map(|kind| kind.build()).collect();
        Self::new(format, strategies, outputs)
    }

    pub fn in_memory(format: FormatVersion, kinds: &[StrategyKind]) -> Result<Self, HarnessError> {
        let strategies = kinds.iter().map(|kind| kind.build()).collect();
        let outputs = kinds.iter().map(|_| HelperOutput::memory()).collect();
        Self::new(format, strategies, outputs)
    }

    pub fn strategy_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn snapshots(&self) -> u64 {
        self.snapshots
    }

    pub fn add(&mut self, snapshot: &RegisterSnapshot) -> Result<(), HarnessError> {
        for lane in &mut self.lanes {
            lane.strategy.add(snapshot, &mut lane.output)?;
        }
        self.snapshots += 1;
        Ok(())
    }

    /// Feeds the state before and after one step, in that order.
    pub fn add_pair(
        &mut self,
        before: &RegisterSnapshot,
        after: &RegisterSnapshot,
    ) -> Result<(), HarnessError> {
        self.add(before)?;
        self.add(after)
    }

    /// Flushes every strategy, closes the outputs and opens them for reading.
    fn close(self) -> Result<Vec<HelperSource<'static>>, HarnessError> {
        let mut sources = Vec::with_capacity(self.lanes.len());
        for mut lane in self.lanes {
            lane.strategy.finish(&mut lane.output)?;
            lane.output.flush()?;
            sources.push(lane.output.into_source(lane.strategy.kind())?);
        }
        Ok(sources)
    }

    /// Closes every stream and returns what they hold, read fully into memory.
    pub fn finish(self) -> Result<Vec<HelperStream>, HarnessError> {
        let mut streams = Vec::new();
        for mut source in self.close()? {
            let mut bytes = Vec::with_capacity(source.encoded_bytes);
            source.reader.read_to_end(&mut bytes)?;
            streams.push(HelperStream {
                kind: source.kind,
                bytes,
            });
        }
        Ok(streams)
    }

    /// Closes every stream and cross-validates them against strategy 0.
    pub fn finalize(self) -> Result<HarnessReport, HarnessError> {
        let format = self.format;
        let sources = self.close()?;
        Ok(validate_sources(format, sources)?)
    }
}

/// [`validate_sources`] over streams already held in memory.
pub fn cross_validate(
    format: FormatVersion,
    streams: &[HelperStream],
) -> Result<HarnessReport, ValidationError> {
    validate_sources(format, streams.iter().map(HelperStream::source).collect())
}

/// Compares streams `1..N` against stream 0, one record at a time.
///
/// Only one record per stream (one lz4 block at most) is held in memory. The first
/// divergence in record order is reported.
pub fn validate_sources(
    format: FormatVersion,
    sources: Vec<HelperSource<'_>>,
) -> Result<HarnessReport, ValidationError> {
    let strategies: Vec<StrategySummary> = sources
        .iter()
        .map(|s| StrategySummary {
            kind: s.kind,
            encoded_bytes: s.encoded_bytes,
        })
        .collect();

    let mut decoders = Vec::with_capacity(sources.len());
    for (index, source) in sources.into_iter().enumerate() {
        let HelperSource {
            kind, mut reader, ..
        } = source;
        format
            .read_helper_header(&mut reader, kind.tag())
            .map_err(|source| decode_error(index, source))?;
        decoders.push(kind.build().decoder(reader));
    }

    let Some((reference, candidates)) = decoders.split_first_mut() else {
        return Ok(HarnessReport {
            records: 0,
            strategies,
        });
    };

    let mut records = 0;
    loop {
        let expected = next_record(reference.as_mut(), 0)?;
        for (offset, candidate) in candidates.iter_mut().enumerate() {
            let strategy = offset + 1;
            let found = next_record(candidate.as_mut(), strategy)?;
            match (&expected, found) {
                (Some(want), Some(got)) => {
                    if let Some(at) = want.iter().zip(got.iter()).position(|(a, b)| a != b) {
                        let byte_offset = records * SNAPSHOT_SIZE + at;
                        log::error!(
                            "strategy {} ({:?}) diverged from reference at byte {}",
                            strategy,
                            strategies[strategy].kind,
                            byte_offset
                        );
                        return Err(ValidationError::Diverged {
                            strategy,
                            record: records,
                            byte_offset,
                        });
                    }
                }
                (None, None) => {}
                (Some(_), None) => {
                    let total = records + 1 + remaining_records(reference.as_mut(), 0)?;
                    return Err(ValidationError::LengthMismatch {
                        strategy,
                        expected: total * SNAPSHOT_SIZE,
                        found: records * SNAPSHOT_SIZE,
                    });
                }
                (None, Some(_)) => {
                    let total = records + 1 + remaining_records(candidate.as_mut(), strategy)?;
                    return Err(ValidationError::LengthMismatch {
                        strategy,
                        expected: records * SNAPSHOT_SIZE,
                        found: total * SNAPSHOT_SIZE,
                    });
                }
            }
        }
        if expected.is_none() {
            break;
        }
        records += 1;
    }

    for (strategy, summary) in strategies.iter().enumerate().skip(1) {
        log::debug!(
            "strategy {} ({:?}) matches reference, {} bytes encoded",
            strategy,
            summary.kind,
            summary.encoded_bytes
        );
    }
    Ok(HarnessReport {
        records,
        strategies,
    })
}

fn decode_error(strategy: usize, source: DecodeError) -> ValidationError {
    ValidationError::Decode { strategy, source }
}

fn next_record(
    decoder: &mut dyn RecordDecoder,
    strategy: usize,
) -> Result<Option<PackedRecord>, ValidationError> {
    decoder
        .next_record()
        .map_err(|source| decode_error(strategy, source))
}

fn remaining_records(decoder: &mut dyn RecordDecoder, strategy: usize) -> Result<usize, ValidationError> {
    let mut count = 0;
    while next_record(decoder, strategy)?.is_some() {
        count += 1;
    }
    Ok(count)
}
