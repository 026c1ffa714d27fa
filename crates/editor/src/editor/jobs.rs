mod shell;

pub(crate) use shell::{ProcessOutput, ShellCommand};
