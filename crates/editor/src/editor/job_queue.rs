//! Queue of external commands run one after another.

use std::{collections::VecDeque, path::PathBuf};

use bitflags::bitflags;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// How a command is run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum JobSubsystem {
    /// Run through the shell with captured output
    #[default]
    #[strum(serialize = "console", serialize = "cli")]
    Cli,
    /// Launched without waiting for it to exit
    #[strum(serialize = "windows", serialize = "gui")]
    Gui,
    #[strum(serialize = "shellexec", serialize = "shell")]
    Shell,
    /// Handled by the frontend
    #[strum(serialize = "lua", serialize = "director", serialize = "extension")]
    Extension,
    #[strum(serialize = "winhelp", serialize = "help")]
    Help,
    #[strum(serialize = "htmlhelp", serialize = "otherhelp")]
    OtherHelp,
    Grep,
    /// Handled by the frontend immediately, even while other jobs run
    Immediate,
}

impl JobSubsystem {
    pub fn from_char(c: char) -> JobSubsystem {
        match c {
            '1' => JobSubsystem::Gui,
            '2' => JobSubsystem::Shell,
            '3' => JobSubsystem::Extension,
            '4' => JobSubsystem::Help,
            '5' => JobSubsystem::OtherHelp,
            '6' => JobSubsystem::Grep,
            '7' => JobSubsystem::Immediate,
            _ => JobSubsystem::Cli,
        }
    }

    /// Whether the command is run as a captured process
    pub fn is_captured(&self) -> bool {
        matches!(
            self,
            JobSubsystem::Cli
                | JobSubsystem::Shell
                | JobSubsystem::Grep
                | JobSubsystem::Help
                | JobSubsystem::OtherHelp
        )
    }

    pub fn is_frontend(&self) -> bool {
        matches!(self, JobSubsystem::Immediate | JobSubsystem::Extension)
    }
}

bitflags! {
    #[derive(Default)]
    pub struct JobFlags: u32 {
        /// May be queued while a run is executing
        const FORCE_QUEUE = 1;
        /// Input is piped to the process
        const HAS_INPUT = 2;
        /// Command line is not echoed to the output
        const QUIET = 4;
        const REP_SEL_YES = 16;
        /// Replace the selection if the process exits with 0
        const REP_SEL_AUTO = 32;
        const REP_SEL_MASK = Self::REP_SEL_YES.bits | Self::REP_SEL_AUTO.bits;
        const GROUP_UNDO = 64;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub command: String,
    pub directory: PathBuf,
    pub subsystem: JobSubsystem,
    pub input: String,
    pub flags: JobFlags,
}

impl Job {
    pub fn new(command: impl Into<String>, directory: impl Into<PathBuf>) -> Job {
        Job {
            command: command.into(),
            directory: directory.into(),
            subsystem: JobSubsystem::default(),
            input: String::new(),
            flags: JobFlags::empty(),
        }
    }

    pub fn with_subsystem(mut self, subsystem: JobSubsystem) -> Job {
        self.subsystem = subsystem;
        self
    }

    pub fn with_flags(mut self, flags: JobFlags) -> Job {
        self.flags = flags;
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Job {
        self.input = input.into();
        self.flags |= JobFlags::HAS_INPUT;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveBefore {
    /// Ask the user
    #[default]
    Prompt,
    Yes,
    No,
}

/// Options of a tool command, parsed from strings like
/// `subsystem:console,savebefore:no,quiet`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobMode {
    pub subsystem: JobSubsystem,
    pub save_before: SaveBefore,
    pub is_filter: bool,
    pub flags: JobFlags,
}

impl JobMode {
    pub fn parse(mode: &str) -> JobMode {
        let mut result = JobMode::default();

        let options = mode
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|opt| !opt.is_empty());

        for opt in options {
            let (key, value) = match opt.split_once(':') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (opt, "yes"),
            };
            let yes = matches!(value, "yes" | "1" | "true");

            match key {
                "subsystem" => {
                    let mut chars = value.chars();
                    result.subsystem = match (chars.next(), chars.next()) {
                        (Some(c), None) if c.is_ascii_digit() => JobSubsystem::from_char(c),
                        _ => value.parse().unwrap_or_else(|_| {
                            log::warn!("Unknown subsystem {value:?}");
                            JobSubsystem::Cli
                        }),
                    };
                }
                "savebefore" => {
                    result.save_before = match value {
                        "yes" | "1" => SaveBefore::Yes,
                        "no" | "2" => SaveBefore::No,
                        _ => SaveBefore::Prompt,
                    }
                }
                "filter" => result.is_filter = yes,
                "quiet" => result.flags.set(JobFlags::QUIET, yes),
                "groupundo" => result.flags.set(JobFlags::GROUP_UNDO, yes),
                "replaceselection" => {
                    result.flags.remove(JobFlags::REP_SEL_MASK);
                    match value {
                        "yes" | "1" => result.flags |= JobFlags::REP_SEL_YES,
                        "auto" | "2" => result.flags |= JobFlags::REP_SEL_AUTO,
                        _ => {}
                    }
                }
                _ => log::warn!("Unknown job mode option {opt:?}"),
            }
        }

        result
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobQueueError {
    #[error("job queue is full ({0} jobs)")]
    Full(usize),
    #[error("commands are already executing")]
    Busy,
}

/// Identifies one run of the queue. A run is cancelled once the queue has
/// moved on to a newer generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToken {
    generation: u64,
}

#[derive(Debug)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
    capacity: usize,
    generation: u64,
    executing: bool,
    pub is_building: bool,
    pub is_built: bool,
}

impl JobQueue {
    pub fn new(capacity: usize) -> JobQueue {
        JobQueue {
            jobs: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            generation: 0,
            executing: false,
            is_building: false,
            is_built: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Queued jobs in run order
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Append a job. A job without a command is ignored. While executing
    /// only jobs with [`JobFlags::FORCE_QUEUE`] are accepted.
    pub fn add_command(&mut self, job: Job) -> Result<(), JobQueueError> {
        if job.command.is_empty() {
            log::debug!("Ignored empty command");
            return Ok(());
        }

        if self.executing && !job.flags.contains(JobFlags::FORCE_QUEUE) {
            return Err(JobQueueError::Busy);
        }

        if self.jobs.len() >= self.capacity {
            return Err(JobQueueError::Full(self.capacity));
        }

        log::debug!("Queued command {:?}", job.command);
        self.jobs.push_back(job);
        Ok(())
    }

    pub fn has_command_to_run(&self) -> bool {
        self.jobs.iter().any(|job| !job.command.is_empty())
    }

    pub fn clear_jobs(&mut self) {
        self.jobs.clear();
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    /// Set once the first job of a run has been dispatched and cleared when
    /// the run has finished
    pub fn set_executing(&mut self, executing: bool) {
        if self.executing != executing {
            log::debug!("Job queue executing: {executing}");
        }
        self.executing = executing;
    }

    /// Start a new run. Any earlier run is cancelled by it.
    pub fn begin_run(&mut self) -> RunToken {
        self.generation += 1;
        RunToken {
            generation: self.generation,
        }
    }

    /// Cancel the current run. Jobs not yet started will not be started.
    pub fn cancel(&mut self) {
        self.generation += 1;
    }

    pub fn is_cancelled(&self, token: RunToken) -> bool {
        token.generation != self.generation
    }

    /// Take the next job of a run, none once the run is cancelled
    pub fn next_job(&mut self, token: RunToken) -> Option<Job> {
        if self.is_cancelled(token) {
            return None;
        }
        self.jobs.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(cmd: &str) -> Job {
        Job::new(cmd, ".")
    }

    #[test]
    fn fifo_order() {
        let mut queue = JobQueue::new(3);
        for cmd in ["one", "two", "three"] {
            queue.add_command(job(cmd)).unwrap();
        }

        let token = queue.begin_run();
        let order: Vec<String> = std::iter::from_fn(|| queue.next_job(token))
            .map(|job| job.command)
            .collect();
        assert_eq!(order, ["one", "two", "three"]);
    }

    #[test]
    fn cancel_between_jobs_stops_successors() {
        let mut queue = JobQueue::new(3);
        queue.add_command(job("build")).unwrap();
        queue.add_command(job("run")).unwrap();

        let token = queue.begin_run();
        assert_eq!(queue.next_job(token).map(|j| j.command), Some("build".into()));
        queue.cancel();
        assert!(queue.is_cancelled(token));
        assert_eq!(queue.next_job(token), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn new_run_is_not_cancelled_by_old_cancel() {
        let mut queue = JobQueue::new(2);
        let old = queue.begin_run();
        queue.cancel();
        let new = queue.begin_run();
        assert!(queue.is_cancelled(old));
        assert!(!queue.is_cancelled(new));
    }

    #[test]
    fn full_queue_is_reported() {
        let mut queue = JobQueue::new(2);
        queue.add_command(job("a")).unwrap();
        queue.add_command(job("b")).unwrap();
        assert_eq!(queue.add_command(job("c")), Err(JobQueueError::Full(2)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn empty_command_is_ignored() {
        let mut queue = JobQueue::new(1);
        queue.add_command(job("")).unwrap();
        assert!(queue.is_empty());
        assert!(!queue.has_command_to_run());
    }

    #[test]
    fn executing_requires_force_queue() {
        let mut queue = JobQueue::new(2);
        queue.set_executing(true);
        assert_eq!(queue.add_command(job("a")), Err(JobQueueError::Busy));
        queue
            .add_command(job("a").with_flags(JobFlags::FORCE_QUEUE))
            .unwrap();
        assert!(queue.has_command_to_run());
    }

    #[test]
    fn subsystem_from_char() {
        assert_eq!(JobSubsystem::from_char('0'), JobSubsystem::Cli);
        assert_eq!(JobSubsystem::from_char('1'), JobSubsystem::Gui);
        assert_eq!(JobSubsystem::from_char('7'), JobSubsystem::Immediate);
        assert_eq!(JobSubsystem::from_char('x'), JobSubsystem::Cli);
    }

    #[test]
    fn parse_mode() {
        let mode =
            JobMode::parse("subsystem:shellexec,savebefore:no,quiet,replaceselection:auto,filter:yes");
        assert_eq!(mode.subsystem, JobSubsystem::Shell);
        assert_eq!(mode.save_before, SaveBefore::No);
        assert!(mode.is_filter);
        assert!(mode.flags.contains(JobFlags::QUIET));
        assert!(mode.flags.contains(JobFlags::REP_SEL_AUTO));
        assert!(!mode.flags.contains(JobFlags::REP_SEL_YES));

        let mode = JobMode::parse("subsystem:2 groupundo:yes");
        assert_eq!(mode.subsystem, JobSubsystem::Shell);
        assert!(mode.flags.contains(JobFlags::GROUP_UNDO));
        assert_eq!(mode.save_before, SaveBefore::Prompt);

        assert_eq!(JobMode::parse(""), JobMode::default());
    }
}
