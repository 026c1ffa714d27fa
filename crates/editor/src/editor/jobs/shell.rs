use std::{path::PathBuf, process::Stdio};

use scrivo_server::{Job, JobContext, JobId, JobResponseSender, JobResult};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Command,
    task::JoinHandle,
};

/// Messages sent by a running command
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ProcessOutput {
    Stdout(String),
    Stderr(String),
    /// Sent after all output, `None` if the process was killed by a signal
    Exit(Option<i32>),
}

/// Runs a command through the shell
#[derive(Debug, Clone)]
pub(crate) struct ShellCommand {
    shell: Vec<String>,
    command: String,
    directory: PathBuf,
    input: Option<String>,
    /// Do not wait for the process or capture its output
    detach: bool,
}

impl ShellCommand {
    pub fn new(shell: &[String], command: &str, directory: PathBuf) -> ShellCommand {
        ShellCommand {
            shell: shell.to_vec(),
            command: command.into(),
            directory,
            input: None,
            detach: false,
        }
    }

    pub fn input(mut self, input: Option<String>) -> ShellCommand {
        self.input = input;
        self
    }

    pub fn detach(mut self, detach: bool) -> ShellCommand {
        self.detach = detach;
        self
    }

    fn command(&self) -> anyhow::Result<Command> {
        let Some((program, args)) = self.shell.split_first() else {
            anyhow::bail!("no shell configured");
        };

        let mut cmd = Command::new(program);
        cmd.args(args).arg(&self.command);
        if self.directory.is_dir() {
            cmd.current_dir(&self.directory);
        }
        Ok(cmd)
    }
}

/// Forward a stream to the editor in chunks as it arrives
fn forward<R>(
    mut sender: JobResponseSender,
    id: JobId,
    mut reader: R,
    wrap: fn(String) -> ProcessOutput,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    sender.send(id, wrap(text));
                }
                Err(e) => {
                    log::warn!("Failed to read output of job {id}: {e}");
                    break;
                }
            }
        }
    })
}

impl Job for ShellCommand {
    fn run(&self, mut ctx: JobContext) -> JobResult {
        let this = self.clone();

        let fut = async move {
            let mut cmd = this.command()?;

            if this.detach {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
                let child = cmd.spawn()?;
                log::info!("Launched {:?} as {:?}", this.command, child.id());
                return Ok(());
            }

            let stdin = if this.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            };
            let mut child = cmd
                .stdin(stdin)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()?;
            log::info!("Running {:?} as {:?}", this.command, child.id());

            // Output is drained before any input is written, a filter can
            // only consume its input while its output is being read
            let mut readers = vec![];
            if let Some(stdout) = child.stdout.take() {
                readers.push(forward(ctx.sender.clone(), ctx.id, stdout, ProcessOutput::Stdout));
            }
            if let Some(stderr) = child.stderr.take() {
                readers.push(forward(ctx.sender.clone(), ctx.id, stderr, ProcessOutput::Stderr));
            }

            let writer = match (this.input, child.stdin.take()) {
                (Some(input), Some(mut stdin)) => {
                    let id = ctx.id;
                    Some(tokio::spawn(async move {
                        // Fails if the process does not read all of its input
                        if let Err(e) = stdin.write_all(input.as_bytes()).await {
                            log::warn!("Failed to write input of job {id}: {e}");
                        }
                        // Dropping stdin closes the pipe
                    }))
                }
                _ => None,
            };

            let kill = ctx.kill.clone();
            let status = tokio::select! {
                status = child.wait() => status?,
                _ = kill.stopped() => {
                    log::info!("Killing {:?}", this.command);
                    if let Some(writer) = &writer {
                        writer.abort();
                    }
                    // Waits for the process to exit
                    child.kill().await?;
                    for reader in readers {
                        reader.abort();
                    }
                    return Ok(());
                }
            };

            if let Some(writer) = &writer {
                writer.abort();
            }
            for reader in readers {
                let _ = reader.await;
            }

            log::info!("{:?} exited with {status}", this.command);
            ctx.send(ProcessOutput::Exit(status.code()));
            Ok(())
        };

        Box::pin(fut)
    }
}
