use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::Deserialize;

pub(crate) const PROJECT_CONFIG: &str = "scrivo-project.toml";
pub(crate) const CONFIG_FILE: &str = "config.toml";
const CONFIG_DIR: &str = "scrivo";

const MAX_BUFFERS: usize = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Number of buffers that can be open at once
    pub buffers: usize,

    /// Files larger than this are loaded on a worker thread
    pub background_open_size: Option<u64>,

    /// Documents larger than this are saved on a worker thread. Without a
    /// value every save is asynchronous.
    pub background_save_size: Option<u64>,

    pub max_file_size: u64,
    pub block_size: usize,

    /// Delay added after each block in workers
    pub asynchronous_sleep_ms: u64,

    /// 0 disables autosave
    pub autosave_delay_secs: u64,

    pub read_only: bool,
    pub save_check_modified_time: bool,
    pub load_on_activate: bool,
    pub are_you_sure_on_reload: bool,
    pub eol_auto: bool,
    pub indent_auto: bool,
    pub session_bookmarks: bool,
    pub session_folds: bool,
    pub job_queue_size: usize,

    /// Program and arguments used to run commands, the command is appended
    pub shell: Vec<String>,

    /// Interpreter name to language
    pub shbang: FxHashMap<String, String>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        let shbang = [
            ("sh", "bash"),
            ("bash", "bash"),
            ("python", "py"),
            ("python3", "py"),
            ("perl", "pl"),
            ("ruby", "rb"),
            ("lua", "lua"),
            ("node", "js"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        EditorConfig {
            buffers: 20,
            background_open_size: None,
            background_save_size: None,
            max_file_size: 2_000_000_000,
            block_size: 128 * 1024,
            asynchronous_sleep_ms: 0,
            autosave_delay_secs: 0,
            read_only: false,
            save_check_modified_time: false,
            load_on_activate: false,
            are_you_sure_on_reload: false,
            eol_auto: true,
            indent_auto: true,
            session_bookmarks: true,
            session_folds: true,
            job_queue_size: 2,
            shell: vec!["/bin/sh".into(), "-c".into()],
            shbang,
        }
    }
}

impl EditorConfig {
    /// Load the user configuration and the project configuration of the
    /// working directory. Falls back to defaults if either cannot be read.
    pub fn load(working_dir: &Path) -> EditorConfig {
        let path = user_config_path().unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        match read_config(&path, working_dir) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load configuration from {path:?}, using defaults: {e}");
                EditorConfig::default()
            }
        }
        .sanitized()
    }

    /// Clamp values into their valid ranges
    pub fn sanitized(mut self) -> EditorConfig {
        self.buffers = self.buffers.clamp(1, MAX_BUFFERS);
        self.job_queue_size = self.job_queue_size.max(1);
        self.block_size = self.block_size.max(1);
        if self.shell.is_empty() {
            self.shell = EditorConfig::default().shell;
        }
        self
    }
}

fn user_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Some(path)
}

pub(crate) fn read_config(config_path: &Path, working_dir: &Path) -> anyhow::Result<EditorConfig> {
    let mut local = working_dir.to_path_buf();
    local.push(PROJECT_CONFIG);

    let config = config::Config::builder()
        .add_source(config::File::from(config_path).required(false))
        .add_source(config::File::from(local).required(false))
        .build()?;

    let config = config.try_deserialize::<EditorConfig>()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn missing_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = read_config(&dir.path().join("nope.toml"), dir.path()).unwrap();
        assert_eq!(config.buffers, 20);
        assert_eq!(config.job_queue_size, 2);
        assert_eq!(config.shbang.get("python").map(String::as_str), Some("py"));
    }

    #[test]
    fn project_overrides_user() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        fs::write(&user, "buffers = 5\nread_only = true\n").unwrap();
        fs::write(dir.path().join(PROJECT_CONFIG), "buffers = 7\n").unwrap();

        let config = read_config(&user, dir.path()).unwrap();
        assert_eq!(config.buffers, 7);
        assert!(config.read_only);
        assert_eq!(config.block_size, 128 * 1024);
    }

    #[test]
    fn sanitize_clamps() {
        let config = EditorConfig {
            buffers: 0,
            job_queue_size: 0,
            shell: vec![],
            ..EditorConfig::default()
        }
        .sanitized();
        assert_eq!(config.buffers, 1);
        assert_eq!(config.job_queue_size, 1);
        assert_eq!(config.shell, vec!["/bin/sh", "-c"]);

        let config = EditorConfig {
            buffers: 1000,
            ..EditorConfig::default()
        }
        .sanitized();
        assert_eq!(config.buffers, MAX_BUFFERS);
    }
}
