//! Persisted list of geometry indices that passed the land cover check
//!
//! The file is a flat comma separated list of unsigned integers with a trailing comma
//! (`3,7,12,`). It is written once after the filter ran and read back on later runs
//! instead of recomputing the verdicts.

use crate::error::{PvsiteError, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ValidIndexFile {
    path: PathBuf,
}

impl ValidIndexFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the stored indices, sorted ascending
    pub fn load(&self) -> Result<Vec<u16>> {
        let content = fs::read_to_string(&self.path)?;
        parse_indices(&content)
    }

    /// Read the stored indices if the memo exists
    pub fn load_if_exists(&self) -> Result<Option<Vec<u16>>> {
        if !self.exists() {
            return Ok(None);
        }
        self.load().map(Some)
    }

    /// Write the indices, creating the parent directory when needed
    pub fn store(&self, indices: &[usize]) -> Result<()> {
        let mut content = String::new();
        for &index in indices {
            let index = u16::try_from(index).map_err(|_| PvsiteError::Serialization(format!(
                "Index {} does not fit the valid-index file format",
                index
            )))?;
            content.push_str(&index.to_string());
            content.push(',');
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, content)?;

        tracing::info!("Stored {} valid indices in {}", indices.len(), self.path.display());
        Ok(())
    }
}

fn parse_indices(content: &str) -> Result<Vec<u16>> {
    let mut indices = content
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u16>().map_err(|_| PvsiteError::Format {
                format: "valid-index file".to_string(),
                message: format!("Invalid index: '{}'", part),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    indices.sort_unstable();
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_writes_trailing_comma_format() {
        let dir = TempDir::new().unwrap();
        let memo = ValidIndexFile::new(dir.path().join("aux").join("valid_idx.txt"));

        memo.store(&[3, 7, 12]).unwrap();

        let raw = fs::read_to_string(memo.path()).unwrap();
        assert_eq!(raw, "3,7,12,");
    }

    #[test]
    fn test_load_sorts_indices() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("valid_idx.txt");
        fs::write(&path, "12,3,\n7,").unwrap();

        let memo = ValidIndexFile::new(&path);
        assert_eq!(memo.load().unwrap(), vec![3, 7, 12]);
    }

    #[test]
    fn test_empty_memo_is_empty_list() {
        let dir = TempDir::new().unwrap();
        let memo = ValidIndexFile::new(dir.path().join("valid_idx.txt"));

        memo.store(&[]).unwrap();
        assert_eq!(memo.load_if_exists().unwrap(), Some(vec![]));
    }

    #[test]
    fn test_missing_memo() {
        let memo = ValidIndexFile::new("/nonexistent/valid_idx.txt");
        assert!(!memo.exists());
        assert_eq!(memo.load_if_exists().unwrap(), None);
    }

    #[test]
    fn test_rejects_garbage_and_overflow() {
        assert!(parse_indices("1,two,3").is_err());
        assert!(parse_indices("70000,").is_err());

        let dir = TempDir::new().unwrap();
        let memo = ValidIndexFile::new(dir.path().join("valid_idx.txt"));
        assert!(memo.store(&[70_000]).is_err());
    }
}
