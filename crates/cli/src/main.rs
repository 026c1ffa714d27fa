mod logging;

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use argh::FromArgs;
use scrivo_editor::{
    BackgroundActivities, Editor, EditorConfig, Frontend, Job, LogFrontend, MemorySurface, Notice,
    OpenFlags,
};

#[derive(FromArgs)]
/// Open files, run commands on them and report the state of every buffer.
struct Cli {
    /// files to open
    #[argh(positional)]
    files: Vec<PathBuf>,

    /// shell command to run once the files are open, may be repeated
    #[argh(option, short = 'c')]
    command: Vec<String>,

    /// session file to restore before opening files
    #[argh(option, short = 's')]
    session: Option<PathBuf>,

    /// write the session to this file before exiting
    #[argh(option)]
    save_session: Option<PathBuf>,

    /// set working directory
    #[argh(option, short = 'w')]
    working_dir: Option<PathBuf>,

    /// answer yes to every question
    #[argh(switch, short = 'y')]
    yes: bool,

    /// seconds to wait for loads and commands to finish
    #[argh(option, default = "600")]
    timeout: u64,

    /// turn debugging information on
    #[argh(switch, short = 'd')]
    debug: bool,
}

/// Prints command output to stdout and messages to stderr, everything is
/// logged as well
struct Console {
    log: LogFrontend,
    assume_yes: bool,
}

impl Frontend for Console {
    fn notify(&mut self, notice: Notice) {
        eprintln!("{notice}");
        self.log.notify(notice);
    }

    fn confirm(&mut self, question: &str) -> bool {
        log::info!("{question} -> {}", self.assume_yes);
        if !self.assume_yes {
            eprintln!("{question} no");
        }
        self.assume_yes
    }

    fn progress(&mut self, activities: &BackgroundActivities) {
        self.log.progress(activities);
    }

    fn output(&mut self, text: &str) {
        print!("{text}");
    }

    fn on_execute(&mut self, command: &str) -> Option<String> {
        self.log.on_execute(command)
    }
}

fn main() -> ExitCode {
    let cli: Cli = argh::from_env();
    if let Err(e) = logging::setup(cli.debug) {
        eprintln!("Logging to {:?} failed: {e}", logging::log_file());
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:?}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let working_dir = match cli.working_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let timeout = Duration::from_secs(cli.timeout);
    let config = EditorConfig::load(&working_dir);
    let frontend = Console {
        log: LogFrontend,
        assume_yes: cli.yes,
    };
    let mut editor = Editor::new(
        config,
        Arc::new(MemorySurface::new()),
        Box::new(frontend),
        working_dir,
    )?;

    if let Some(session) = &cli.session {
        editor.load_session(session)?;
    }

    for file in &cli.files {
        if let Err(e) = editor.open(file, OpenFlags::empty()) {
            log::error!("Failed to open {file:?}: {e}");
        }
    }

    if !editor.wait_idle(timeout) {
        anyhow::bail!("files were not loaded in {timeout:?}");
    }

    for command in cli.command {
        let job = Job::new(command, editor.working_dir());
        editor.add_command(job)?;
    }
    editor.execute();

    if !editor.wait_idle(timeout) {
        editor.stop_execute();
        editor.wait_idle(Duration::from_secs(5));
        anyhow::bail!("commands did not finish in {timeout:?}");
    }

    let current = editor.buffers().current();
    for (index, buf) in editor.buffers().iter_visible() {
        let marker = if index == current { '*' } else { ' ' };
        let size = buf.document().map_or(0, |doc| doc.len());
        println!(
            "{marker} {} {} {} {size}",
            buf.name(),
            buf.life_state(),
            buf.unicode_mode
        );
    }

    if let Some(path) = &cli.save_session {
        editor.save_session(path)?;
    }
    Ok(())
}
