//! Session files: the set of open buffers persisted as `key=value` lines.
//!
//! ```text
//! # scrivo session file
//!
//! buffer.1.path=/home/user/notes.txt
//! buffer.1.position=120
//! buffer.1.scroll=4
//! buffer.1.current=1
//! buffer.1.bookmarks=3,6,10
//! buffer.1.folds=1,4
//! ```
//!
//! Indices, positions and line numbers are 1-based in the file and 0-based
//! in memory.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
};

use rustc_hash::FxHashMap;
use thiserror::Error;

const HEADER: &str = "# scrivo session file";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to access session file: {0}")]
    Io(#[from] io::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidNumber { key: String, value: String },
}

/// Persisted state of one open buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferState {
    pub path: PathBuf,
    /// Caret position, 0-based
    pub position: usize,
    pub scroll: usize,
    pub current: bool,
    /// Bookmarked lines, 0-based
    pub bookmarks: Vec<usize>,
    /// Lines of collapsed fold headers, 0-based
    pub folds: Vec<usize>,
}

impl BufferState {
    pub fn new(path: impl Into<PathBuf>) -> BufferState {
        BufferState {
            path: path.into(),
            ..BufferState::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub buffers: Vec<BufferState>,
    /// Recently closed files, most recent first
    pub recent: Vec<PathBuf>,
}

impl Session {
    /// The buffer marked current
    pub fn active(&self) -> Option<&BufferState> {
        self.buffers.iter().find(|b| b.current)
    }

    pub fn load(path: &Path) -> Result<Session, SessionError> {
        let text = fs::read_to_string(path)?;
        Session::parse(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        fs::write(path, self.to_text())?;
        Ok(())
    }

    pub fn parse(text: &str) -> Result<Session, SessionError> {
        // Grouped by the indices present in the file, ordered by index
        let mut buffers: BTreeMap<usize, FxHashMap<&str, &str>> = BTreeMap::new();
        let mut recent: BTreeMap<usize, &str> = BTreeMap::new();

        for line in text.lines() {
            let line = line.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                log::warn!("Ignoring session line without value: {line:?}");
                continue;
            };

            if let Some((n, field)) = split_key(key, "buffer") {
                buffers.entry(n).or_default().insert(field, value);
            } else if let Some((n, "path")) = split_key(key, "mru") {
                recent.insert(n, value);
            } else {
                log::debug!("Ignoring unknown session key {key:?}");
            }
        }

        let mut session = Session::default();

        for (n, props) in buffers {
            let get = |field: &str| props.get(field).copied();

            // Paths are kept verbatim, whitespace included
            let path = match get("path") {
                Some(path) if !path.is_empty() => path,
                _ => continue,
            };

            let mut state = BufferState::new(path);
            state.current = parse_number(&prop_key("buffer", n, "current"), get("current"))? != 0;
            state.scroll = parse_number(&prop_key("buffer", n, "scroll"), get("scroll"))?;
            state.position =
                parse_number(&prop_key("buffer", n, "position"), get("position"))?.saturating_sub(1);
            state.bookmarks =
                lines_from_string(&prop_key("buffer", n, "bookmarks"), get("bookmarks"))?;
            state.folds = lines_from_string(&prop_key("buffer", n, "folds"), get("folds"))?;
            session.buffers.push(state);
        }

        // Highest index is the most recent
        session.recent = recent
            .into_values()
            .rev()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .collect();

        Ok(session)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(HEADER);
        out.push('\n');

        if !self.recent.is_empty() {
            out.push('\n');
            // Oldest first so that reading pushes the newest on top last
            for (i, path) in self.recent.iter().rev().enumerate() {
                let _ = writeln!(out, "{}={}", prop_key("mru", i + 1, "path"), path.display());
            }
        }

        for (i, buffer) in self.buffers.iter().enumerate() {
            let n = i + 1;
            let _ = writeln!(out, "\n{}={}", prop_key("buffer", n, "path"), buffer.path.display());
            let _ = writeln!(out, "{}={}", prop_key("buffer", n, "position"), buffer.position + 1);
            let _ = writeln!(out, "{}={}", prop_key("buffer", n, "scroll"), buffer.scroll);
            if buffer.current {
                let _ = writeln!(out, "{}=1", prop_key("buffer", n, "current"));
            }
            if !buffer.bookmarks.is_empty() {
                let lines = string_from_lines(&buffer.bookmarks);
                let _ = writeln!(out, "{}={}", prop_key("buffer", n, "bookmarks"), lines);
            }
            if !buffer.folds.is_empty() {
                let lines = string_from_lines(&buffer.folds);
                let _ = writeln!(out, "{}={}", prop_key("buffer", n, "folds"), lines);
            }
        }

        out
    }
}

fn prop_key(prefix: &str, n: usize, field: &str) -> String {
    format!("{prefix}.{n}.{field}")
}

/// Split `prefix.<n>.field` into its index and field
fn split_key<'a>(key: &'a str, prefix: &str) -> Option<(usize, &'a str)> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('.')?;
    let (n, field) = rest.split_once('.')?;
    Some((n.parse().ok()?, field.trim_end()))
}

fn parse_number(key: &str, value: Option<&str>) -> Result<usize, SessionError> {
    match value.map(str::trim) {
        None | Some("") => Ok(0),
        Some(v) => v.parse().map_err(|_| SessionError::InvalidNumber {
            key: key.into(),
            value: v.into(),
        }),
    }
}

fn lines_from_string(key: &str, value: Option<&str>) -> Result<Vec<usize>, SessionError> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(vec![]);
    };

    value
        .split(',')
        .map(|line| {
            let line = line.trim();
            match line.parse::<usize>() {
                Ok(n) if n > 0 => Ok(n - 1),
                _ => Err(SessionError::InvalidNumber {
                    key: key.into(),
                    value: line.into(),
                }),
            }
        })
        .collect()
}

fn string_from_lines(lines: &[usize]) -> String {
    lines
        .iter()
        .map(|line| (line + 1).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(lines: &[usize]) -> BTreeSet<usize> {
        lines.iter().copied().collect()
    }

    #[test]
    fn round_trip() {
        let mut a = BufferState::new("/tmp/a.txt");
        a.position = 0;
        a.bookmarks = vec![2, 5, 9];
        a.folds = vec![0, 3];

        let mut b = BufferState::new("/tmp/b.txt");
        b.position = 41;
        b.scroll = 7;
        b.current = true;
        b.bookmarks = vec![9, 2, 5];

        let session = Session {
            buffers: vec![a, b],
            recent: vec!["/tmp/new.txt".into(), "/tmp/old.txt".into()],
        };

        let read = Session::parse(&session.to_text()).unwrap();
        assert_eq!(read.buffers.len(), 2);
        assert_eq!(read.buffers[0].path, PathBuf::from("/tmp/a.txt"));
        assert_eq!(read.buffers[0].position, 0);
        assert_eq!(set(&read.buffers[0].bookmarks), set(&[2, 5, 9]));
        assert_eq!(set(&read.buffers[0].folds), set(&[0, 3]));
        assert_eq!(read.buffers[1].position, 41);
        assert_eq!(read.buffers[1].scroll, 7);
        assert_eq!(set(&read.buffers[1].bookmarks), set(&[2, 5, 9]));
        assert_eq!(read.active().map(|b| b.path.clone()), Some("/tmp/b.txt".into()));
        assert_eq!(read.recent, session.recent);
    }

    #[test]
    fn lines_are_one_based_on_disk() {
        let mut state = BufferState::new("/x");
        state.bookmarks = vec![2, 5, 9];
        state.folds = vec![0, 3];
        state.position = 10;
        let text = Session {
            buffers: vec![state],
            recent: vec![],
        }
        .to_text();

        assert!(text.contains("buffer.1.bookmarks=3,6,10\n"));
        assert!(text.contains("buffer.1.folds=1,4\n"));
        assert!(text.contains("buffer.1.position=11\n"));
        assert!(!text.contains("buffer.1.current"));
    }

    #[test]
    fn gaps_comments_and_missing_fields() {
        let text = "# comment\n\
                    buffer.3.path=/three\n\
                    buffer.3.current=1\n\
                    \n\
                    buffer.1.path=/one\n\
                    buffer.2.scroll=5\n\
                    garbage line\n";
        let session = Session::parse(text).unwrap();
        let paths: Vec<_> = session.buffers.iter().map(|b| b.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/one"), PathBuf::from("/three")]);
        assert_eq!(session.buffers[0].position, 0);
        assert_eq!(session.active().map(|b| b.path.clone()), Some("/three".into()));
    }

    #[test]
    fn invalid_line_number() {
        let text = "buffer.1.path=/one\nbuffer.1.bookmarks=1,x\n";
        assert!(matches!(
            Session::parse(text),
            Err(SessionError::InvalidNumber { .. })
        ));

        let text = "buffer.1.path=/one\nbuffer.1.folds=0\n";
        assert!(Session::parse(text).is_err());
    }

    #[test]
    fn huge_index_is_read_without_visiting_gaps() {
        let text = "buffer.100000000000.path=/x\nmru.90000000000.path=/old\n";
        let session = Session::parse(text).unwrap();
        assert_eq!(session.buffers.len(), 1);
        assert_eq!(session.buffers[0].path, PathBuf::from("/x"));
        assert_eq!(session.recent, vec![PathBuf::from("/old")]);
    }

    #[test]
    fn path_whitespace_is_kept() {
        let mut state = BufferState::new("/tmp/a ");
        state.position = 3;
        let session = Session {
            buffers: vec![state, BufferState::new(" /tmp/b\t")],
            recent: vec!["/tmp/c ".into()],
        };

        let read = Session::parse(&session.to_text()).unwrap();
        assert_eq!(read.buffers[0].path, PathBuf::from("/tmp/a "));
        assert_eq!(read.buffers[0].position, 3);
        assert_eq!(read.buffers[1].path, PathBuf::from(" /tmp/b\t"));
        assert_eq!(read.recent, vec![PathBuf::from("/tmp/c ")]);
    }

    #[test]
    fn numbers_tolerate_trailing_whitespace() {
        let text = "buffer.1.path=/one\nbuffer.1.position=5  \nbuffer.1.bookmarks=2, 4 \n";
        let session = Session::parse(text).unwrap();
        assert_eq!(session.buffers[0].position, 4);
        assert_eq!(session.buffers[0].bookmarks, vec![1, 3]);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.session");
        let mut state = BufferState::new("/a");
        state.current = true;
        let session = Session {
            buffers: vec![state],
            recent: vec![],
        };
        session.save(&path).unwrap();
        assert_eq!(Session::load(&path).unwrap(), session);
    }
}
