/**
 * @file config.rs
 * @date 18/10/2026
 * @brief Settings of the console driver.
 */
use ossim::MemoryConfig;
use serde::{Deserialize, Serialize};

/// Missing keys fall back to [`Default`]. A `memory` table that is present
/// must carry all five sizes.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub memory: MemoryConfig,
    pub cores: usize,
    /// Delay between two machine ticks
    pub tick_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            cores: ossim::common::DEFAULT_CORES,
            tick_ms: 10,
        }
    }
}

impl ConsoleConfig {
    /// Read `path` if it exists. The format follows the file extension.
    pub fn parse(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?
            .try_deserialize()
    }
}
