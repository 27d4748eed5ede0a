//! The `browse` command: enumerate a directory's immediate children.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowseError {
    #[error("path does not exist or is not a directory: {0}")]
    NotADirectory(String),
    #[error("reading {0}: {1}")]
    Read(String, std::io::Error),
}

#[derive(Debug, Serialize)]
pub struct BrowseResult {
    pub path: String,
    pub subdirectories: Vec<String>,
    pub files: Vec<String>,
}

pub fn browse(path: &str) -> Result<BrowseResult, BrowseError> {
    let real = std::fs::canonicalize(path).map_err(|_| BrowseError::NotADirectory(path.to_string()))?;
    if !real.is_dir() {
        return Err(BrowseError::NotADirectory(path.to_string()));
    }

    let mut subdirectories = Vec::new();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&real).map_err(|e| BrowseError::Read(path.to_string(), e))? {
        let entry = entry.map_err(|e| BrowseError::Read(path.to_string(), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type().map_err(|e| BrowseError::Read(path.to_string(), e))?;
        if file_type.is_dir() {
            subdirectories.push(name);
        } else {
            files.push(name);
        }
    }
    subdirectories.sort();
    files.sort();

    Ok(BrowseResult {
        path: real.to_string_lossy().into_owned(),
        subdirectories,
        files,
    })
}

pub fn path_exists(path: &str) -> bool {
    Path::new(path).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lists_subdirectories_and_files_sorted() {
        let dir = tempfile_dir();
        fs::create_dir(dir.join("b_dir")).unwrap();
        fs::create_dir(dir.join("a_dir")).unwrap();
        fs::write(dir.join("z_file.txt"), b"x").unwrap();
        fs::write(dir.join("a_file.txt"), b"x").unwrap();

        let result = browse(dir.to_str().unwrap()).unwrap();
        assert_eq!(result.subdirectories, vec!["a_dir", "b_dir"]);
        assert_eq!(result.files, vec!["a_file.txt", "z_file.txt"]);
    }

    #[test]
    fn rejects_a_nonexistent_path() {
        assert!(browse("/does/not/exist/hopefully").is_err());
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("controller-browse-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}
