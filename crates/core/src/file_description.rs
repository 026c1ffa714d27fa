use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// What is known about a file on disk before it is opened or saved.
#[derive(Debug, Clone)]
pub struct FileDescription {
    absolute_path: PathBuf,
    size: u64,
    is_dir: bool,
    read_only: bool,
    modified: Option<SystemTime>,
}

impl FileDescription {
    pub fn new(path: impl AsRef<Path>, working_dir: &Path) -> io::Result<FileDescription> {
        let path = path.as_ref();
        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            working_dir.join(path)
        };

        let metadata = fs::metadata(&absolute_path)?;
        Ok(FileDescription {
            absolute_path,
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            read_only: metadata.permissions().readonly(),
            modified: metadata.modified().ok(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.absolute_path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

/// Modification time of a file, `None` if it does not exist or the platform
/// does not record one.
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_relative_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let desc = FileDescription::new("a.txt", dir.path()).unwrap();
        assert_eq!(desc.path(), dir.path().join("a.txt"));
        assert_eq!(desc.size(), 5);
        assert!(!desc.is_dir());
        assert!(desc.modified().is_some());
    }

    #[test]
    fn describe_directory_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileDescription::new(dir.path(), dir.path()).unwrap().is_dir());
        assert!(FileDescription::new("missing", dir.path()).is_err());
        assert!(modified_time(&dir.path().join("missing")).is_none());
    }
}
