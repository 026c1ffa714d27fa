use std::fmt;

use crate::document::DocumentRef;

/// Message shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Warning(String),
    Error(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Info(msg) => write!(f, "{msg}"),
            Notice::Warning(msg) => write!(f, "warning: {msg}"),
            Notice::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Aggregated progress of all loads and saves running in the background
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackgroundActivities {
    pub loaders: usize,
    pub storers: usize,
    pub total_work: u64,
    pub total_progress: u64,
    /// Name of the last file found with background activity
    pub file_name: Option<String>,
}

impl BackgroundActivities {
    pub fn is_idle(&self) -> bool {
        self.loaders == 0 && self.storers == 0
    }
}

/// Per buffer view state restored when a document becomes visible.
/// Lines are 0-based.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub position: usize,
    pub scroll: usize,
    pub bookmarks: Vec<usize>,
    pub folds: Vec<usize>,
}

/// User interface collaborator of the editor. Everything has a default so
/// headless users only implement what they need.
pub trait Frontend {
    fn notify(&mut self, _notice: Notice) {}

    /// Ask a yes/no question
    fn confirm(&mut self, _question: &str) -> bool {
        true
    }

    fn progress(&mut self, _activities: &BackgroundActivities) {}

    /// Output of running commands
    fn output(&mut self, _text: &str) {}

    /// Apply folds, bookmarks and scroll to a document that was just shown
    fn restore_view(&mut self, _doc: &DocumentRef, _view: &ViewState) {}

    fn replace_selection(&mut self, _text: &str) {}

    /// Run an immediate or extension command. Returns output to show if any.
    fn on_execute(&mut self, _command: &str) -> Option<String> {
        None
    }
}

/// Frontend that writes everything to the log and answers yes to all
/// questions
#[derive(Debug, Default)]
pub struct LogFrontend;

impl Frontend for LogFrontend {
    fn notify(&mut self, notice: Notice) {
        match &notice {
            Notice::Info(_) => log::info!("{notice}"),
            Notice::Warning(_) => log::warn!("{notice}"),
            Notice::Error(_) => log::error!("{notice}"),
        }
    }

    fn confirm(&mut self, question: &str) -> bool {
        log::info!("{question} -> yes");
        true
    }

    fn progress(&mut self, activities: &BackgroundActivities) {
        log::debug!("Background activity: {activities:?}");
    }

    fn output(&mut self, text: &str) {
        log::info!("{}", text.trim_end());
    }

    fn on_execute(&mut self, command: &str) -> Option<String> {
        log::warn!("No extension to run {command:?}");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_frontend_answers_yes() {
        let mut frontend = LogFrontend;
        assert!(frontend.confirm("Save?"));
        assert_eq!(frontend.on_execute("script()"), None);
    }

    #[test]
    fn notice_display() {
        assert_eq!(Notice::Info("saved".into()).to_string(), "saved");
        assert_eq!(Notice::Error("failed".into()).to_string(), "error: failed");
    }

    #[test]
    fn idle_without_loads_or_saves() {
        let mut acts = BackgroundActivities::default();
        assert!(acts.is_idle());
        acts.storers = 1;
        assert!(!acts.is_idle());
    }
}
