//! Exception store configuration.
//!
//! A store is configured from the snapshot table (chunk size) plus a few
//! engine knobs. The config can be built in code or loaded from a TOML file.
//!
//! # Example
//!
//! ```toml
//! # Chunk size in 512-byte sectors. Omit to use the store's on-disk value.
//! chunk_size = 16
//!
//! # Request preflush + FUA on metadata writes (default: true)
//! metadata_fua = true
//! ```

use serde::{Deserialize, Serialize};
use snapstore_core::{Result, StoreError, SECTOR_SHIFT, SECTOR_SIZE};
use std::path::Path;

/// Chunk size used for a new store when none is configured (16 KiB).
pub const DEFAULT_CHUNK_SIZE_SECTORS: u32 = 32;

/// Largest chunk size whose byte length still fits an `i32`.
pub const MAX_CHUNK_SIZE_SECTORS: u32 = (i32::MAX as u32) >> SECTOR_SHIFT;

fn default_metadata_fua() -> bool {
    true
}

/// Exception store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Chunk size in sectors requested by the table.
    ///
    /// `None` means "whatever the store on disk says", falling back to
    /// [`DEFAULT_CHUNK_SIZE_SECTORS`] for a new store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,

    /// Cap on exception records per metadata area.
    ///
    /// Must be identical on every open of the same store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_capacity: Option<u32>,

    /// Request preflush + FUA on metadata writes (default: true).
    #[serde(default = "default_metadata_fua")]
    pub metadata_fua: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            chunk_size: None,
            area_capacity: None,
            metadata_fua: default_metadata_fua(),
        }
    }
}

impl StoreConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk size in sectors (builder pattern).
    pub fn with_chunk_size(mut self, sectors: u32) -> Self {
        self.chunk_size = Some(sectors);
        self
    }

    /// Cap records per metadata area (builder pattern).
    pub fn with_area_capacity(mut self, records: u32) -> Self {
        self.area_capacity = Some(records);
        self
    }

    /// Toggle preflush + FUA on metadata writes (builder pattern).
    pub fn with_metadata_fua(mut self, enabled: bool) -> Self {
        self.metadata_fua = enabled;
        self
    }

    /// Create a configuration for testing: 4 KiB chunks.
    pub fn for_testing() -> Self {
        StoreConfig::default().with_chunk_size(8)
    }

    /// Validate against a device with the given logical block size in bytes.
    pub fn validate(&self, logical_block_size: u32) -> Result<()> {
        if let Some(chunk_size) = self.chunk_size {
            validate_chunk_size(chunk_size, logical_block_size)?;
        }
        if let Some(capacity) = self.area_capacity {
            if capacity == 0 {
                return Err(StoreError::invalid_config(
                    "area capacity must be at least 1",
                ));
            }
            if let Some(chunk_size) = self.chunk_size {
                let natural = chunk_size as usize * SECTOR_SIZE / crate::format::DISK_EXCEPTION_SIZE;
                if capacity as usize > natural {
                    return Err(StoreError::invalid_config(format!(
                        "area capacity {} exceeds the {} records a {}-sector chunk holds",
                        capacity, natural, chunk_size
                    )));
                }
            }
        }
        Ok(())
    }

    /// Chunk size to use before any header has been read.
    ///
    /// The default is raised to the logical block size when the device has
    /// larger blocks.
    pub fn resolve_chunk_size(&self, logical_block_size: u32) -> u32 {
        self.chunk_size.unwrap_or_else(|| {
            let block_sectors = (logical_block_size >> SECTOR_SHIFT).max(1);
            DEFAULT_CHUNK_SIZE_SECTORS.max(block_sectors)
        })
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            StoreError::invalid_config(format!("Failed to parse store config: {}", e))
        })
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::invalid_config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            StoreError::invalid_config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Serialize this config to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| StoreError::invalid_config(format!("Failed to serialize config: {}", e)))
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Snapshot exception store configuration
#
# Chunk size in 512-byte sectors: a power of two and a multiple of the
# device's logical block size. Omit to reuse the value recorded on disk
# (new stores default to 32).
# chunk_size = 32

# Request preflush + FUA on metadata writes (default: true)
metadata_fua = true
"#
    }
}

/// Check a chunk size (in sectors) for a device with the given logical block
/// size in bytes.
pub fn validate_chunk_size(chunk_size: u32, logical_block_size: u32) -> Result<()> {
    if chunk_size == 0 || !chunk_size.is_power_of_two() {
        return Err(StoreError::invalid_config(format!(
            "chunk size {} is not a power of two",
            chunk_size
        )));
    }

    let block_sectors = (logical_block_size >> SECTOR_SHIFT).max(1);
    if chunk_size % block_sectors != 0 {
        return Err(StoreError::invalid_config(format!(
            "chunk size {} is not a multiple of the device block size ({} sectors)",
            chunk_size, block_sectors
        )));
    }

    if chunk_size > MAX_CHUNK_SIZE_SECTORS {
        return Err(StoreError::invalid_config(format!(
            "chunk size {} is too large (max {})",
            chunk_size, MAX_CHUNK_SIZE_SECTORS
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.chunk_size, None);
        assert_eq!(config.area_capacity, None);
        assert!(config.metadata_fua);
        assert!(config.validate(512).is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = StoreConfig::new()
            .with_chunk_size(16)
            .with_area_capacity(4)
            .with_metadata_fua(false);
        assert_eq!(config.chunk_size, Some(16));
        assert_eq!(config.area_capacity, Some(4));
        assert!(!config.metadata_fua);
    }

    #[test]
    fn test_validate_chunk_size_rules() {
        assert!(validate_chunk_size(8, 512).is_ok());
        assert!(validate_chunk_size(0, 512).is_err());
        assert!(validate_chunk_size(12, 512).is_err());
        // 4 KiB logical blocks need chunks of at least 8 sectors.
        assert!(validate_chunk_size(4, 4096).is_err());
        assert!(validate_chunk_size(8, 4096).is_ok());
        assert!(validate_chunk_size(1 << 23, 512).is_err());
    }

    #[test]
    fn test_validate_area_capacity() {
        let zero = StoreConfig::for_testing().with_area_capacity(0);
        assert!(matches!(zero.validate(512), Err(StoreError::InvalidConfig(_))));

        // 8 sectors hold 256 records.
        let too_big = StoreConfig::for_testing().with_area_capacity(257);
        assert!(too_big.validate(512).is_err());
        assert!(StoreConfig::for_testing()
            .with_area_capacity(256)
            .validate(512)
            .is_ok());
    }

    #[test]
    fn test_resolve_chunk_size() {
        assert_eq!(StoreConfig::default().resolve_chunk_size(512), 32);
        assert_eq!(StoreConfig::default().resolve_chunk_size(32768), 64);
        assert_eq!(StoreConfig::for_testing().resolve_chunk_size(4096), 8);
    }

    #[test]
    fn test_parse_toml() {
        let config = StoreConfig::from_toml_str("chunk_size = 16\narea_capacity = 3").unwrap();
        assert_eq!(config.chunk_size, Some(16));
        assert_eq!(config.area_capacity, Some(3));
        assert!(config.metadata_fua);
    }

    #[test]
    fn test_parse_toml_rejects_garbage() {
        assert!(StoreConfig::from_toml_str("chunk_size = \"big\"").is_err());
    }

    #[test]
    fn test_default_toml_parses() {
        let config = StoreConfig::from_toml_str(StoreConfig::default_toml()).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapstore.toml");
        let config = StoreConfig::for_testing().with_metadata_fua(false);
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = StoreConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_from_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = StoreConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
