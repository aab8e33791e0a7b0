use crate::format::FormatVersion;
use crate::strategy::StrategyKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Directory the `trace<N>.trace` files are written to.
    pub output_dir: PathBuf,
    pub format: FormatVersion,
    /// Strategies run by the compression harness. Empty disables the harness.
    pub helper_strategies: Vec<StrategyKind>,
    /// Also write a `trace<N>.rom.json` describing the loaded ROM.
    pub write_rom_sidecar: bool,
    pub buffered: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            format: FormatVersion::CURRENT,
            helper_strategies: Vec::new(),
            write_rom_sidecar: false,
            buffered: true,
        }
    }
}

impl TraceConfig {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_format(mut self, format: FormatVersion) -> Self {
        self.format = format;
        self
    }

    pub fn with_helper_strategies(mut self, strategies: &[StrategyKind]) -> Self {
        self.helper_strategies = strategies.to_vec();
        self
    }

    pub fn with_rom_sidecar(mut self, enabled: bool) -> Self {
        self.write_rom_sidecar = enabled;
        self
    }

    pub fn harness_enabled(&self) -> bool {
        !self.helper_strategies.is_empty()
    }

    pub fn trace_path(&self, index: u32) -> PathBuf {
        self.output_dir.join(format!("trace{}.trace", index))
    }

    pub fn helper_path(&self, index: u32, strategy: usize) -> PathBuf {
        self.output_dir
            .join(format!("trace{}.trace_helper_{}", index, strategy))
    }

    pub fn sidecar_path(&self, index: u32) -> PathBuf {
        self.output_dir.join(format!("trace{}.rom.json", index))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_paths_follow_rotation_index() {
        let config = TraceConfig::new("/tmp/traces");
        assert_eq!(
            config.trace_path(3),
            PathBuf::from("/tmp/traces/trace3.trace")
        );
        assert_eq!(
            config.helper_path(3, 1),
            PathBuf::from("/tmp/traces/trace3.trace_helper_1")
        );
        assert_eq!(
            config.sidecar_path(0),
            PathBuf::from("/tmp/traces/trace0.rom.json")
        );
    }

    #[test]
    fn test_json_fills_defaults() {
        let config = TraceConfig::from_json_str(
            r#"{ "format": "v1", "helper_strategies": ["raw", "xor_rle"] }"#,
        )
        .unwrap();
        assert_eq!(config.format, FormatVersion::V1);
        assert_eq!(
            config.helper_strategies,
            vec![StrategyKind::Raw, StrategyKind::XorRle]
        );
        assert!(config.buffered);
        assert!(!config.write_rom_sidecar);
        assert_eq!(config.output_dir, PathBuf::from("."));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!(TraceConfig::from_json_str(r#"{ "helper_strategies": ["zstd"] }"#).is_err());
    }
}
