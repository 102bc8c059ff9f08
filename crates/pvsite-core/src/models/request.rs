use super::geometry::{BoundingBox, Crs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One remote fetch that satisfies one or more geometries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Geometry indices covered by this request, ascending, never empty
    pub members: Vec<usize>,
    pub bbox: BoundingBox,
    pub crs: Crs,
    pub target_path: PathBuf,
}

impl DownloadRequest {
    pub fn is_merged(&self) -> bool {
        self.members.len() > 1
    }

    /// Members joined with underscores, as used in file names and log lines
    pub fn member_label(&self) -> String {
        join_indices(&self.members)
    }
}

/// Output file naming: `{dir}/{prefix}_{year}_{i}[_{j}...].{ext}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetNaming {
    pub dir: PathBuf,
    pub prefix: String,
    pub year: i32,
    pub extension: String,
}

impl TargetNaming {
    pub fn new(
        dir: impl AsRef<Path>,
        prefix: impl Into<String>,
        year: i32,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.into(),
            year,
            extension: extension.into(),
        }
    }

    pub fn path_for(&self, members: &[usize]) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.{}",
            self.prefix,
            self.year,
            join_indices(members),
            self.extension
        ))
    }
}

fn join_indices(indices: &[usize]) -> String {
    indices.iter().map(usize::to_string).collect::<Vec<_>>().join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_naming() {
        let naming = TargetNaming::new("/data/s2", "s2", 2022, "nc");
        assert_eq!(naming.path_for(&[12]), PathBuf::from("/data/s2/s2_2022_12.nc"));
        assert_eq!(naming.path_for(&[3, 7]), PathBuf::from("/data/s2/s2_2022_3_7.nc"));
    }

    #[test]
    fn test_member_label() {
        let request = DownloadRequest {
            members: vec![3, 7, 9],
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            crs: Crs::utm32n(),
            target_path: PathBuf::from("x.nc"),
        };
        assert_eq!(request.member_label(), "3_7_9");
        assert!(request.is_merged());
    }
}
