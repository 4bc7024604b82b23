//! Sizing parameters of the simulated machine.
//!
//! A configuration is only ever applied as a whole: [`MemoryConfig::layout`]
//! validates every field before any state is touched.

use crate::common::{KB, STRING_ARENA_SIZE};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroSize(&'static str),

    #[error("Kernel ({kernel} B) + OS ({os} B) + string arena ({arena} B) leave no user space in {main} B of main memory")]
    NoUserSpace {
        kernel: usize,
        os: usize,
        arena: usize,
        main: usize,
    },

    #[error("Size overflow in {0}")]
    Overflow(&'static str),
}

/// The five sizing parameters, in kilobytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    pub main_memory_kb: usize,
    pub secondary_storage_kb: usize,
    pub kernel_kb: usize,
    pub os_kb: usize,
    pub virtual_memory_kb: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            main_memory_kb: 16,
            secondary_storage_kb: 64,
            kernel_kb: 2,
            os_kb: 4,
            virtual_memory_kb: 8,
        }
    }
}

/// Byte boundaries derived from a validated [`MemoryConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryLayout {
    pub main_memory_size: usize,
    pub secondary_storage_size: usize,
    pub virtual_memory_size: usize,
    pub kernel: Range<usize>,
    pub os: Range<usize>,
    pub user: Range<usize>,
    pub strings: Range<usize>,
}

fn kilobytes(value: usize, name: &'static str) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroSize(name));
    }

    value.checked_mul(KB).ok_or(ConfigError::Overflow(name))
}

impl MemoryConfig {
    pub fn layout(&self) -> Result<MemoryLayout, ConfigError> {
        let main = kilobytes(self.main_memory_kb, "main_memory_kb")?;
        let secondary = kilobytes(self.secondary_storage_kb, "secondary_storage_kb")?;
        let kernel = kilobytes(self.kernel_kb, "kernel_kb")?;
        let os = kilobytes(self.os_kb, "os_kb")?;
        let virtual_memory = kilobytes(self.virtual_memory_kb, "virtual_memory_kb")?;

        let reserved = kernel
            .checked_add(os)
            .and_then(|v| v.checked_add(STRING_ARENA_SIZE))
            .ok_or(ConfigError::Overflow("reserved regions"))?;

        if reserved >= main {
            return Err(ConfigError::NoUserSpace {
                kernel,
                os,
                arena: STRING_ARENA_SIZE,
                main,
            });
        }

        let user_start = kernel + os;
        let strings_start = main - STRING_ARENA_SIZE;

        Ok(MemoryLayout {
            main_memory_size: main,
            secondary_storage_size: secondary,
            virtual_memory_size: virtual_memory,
            kernel: 0..kernel,
            os: kernel..user_start,
            user: user_start..strings_start,
            strings: strings_start..main,
        })
    }
}

impl MemoryLayout {
    pub fn user_space_size(&self) -> usize {
        self.user.len()
    }
}
