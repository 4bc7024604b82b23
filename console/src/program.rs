/**
 * @file program.rs
 * @date 18/10/2026
 * @brief Program files: read, validated, split into instructions.
 */
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    Syntax {
        path: PathBuf,
        #[source]
        source: syntax::Error,
    },

    #[error("{} contains no instructions", .0.display())]
    Empty(PathBuf),
}

#[derive(Debug)]
pub struct Program {
    pub path: PathBuf,
    text: String,
}

impl Program {
    pub fn parse(path: &Path, text: String) -> Result<Self, ProgramError> {
        syntax::validate(&text).map_err(|source| ProgramError::Syntax {
            path: path.to_path_buf(),
            source,
        })?;

        if syntax::instructions(&text).is_empty() {
            return Err(ProgramError::Empty(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            text,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, ProgramError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ProgramError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        Self::parse(path, text)
    }

    pub fn instructions(&self) -> Vec<&str> {
        syntax::instructions(&self.text)
    }
}
