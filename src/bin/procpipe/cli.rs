use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Token separating the stages of `procpipe pipe`
pub const STAGE_SEPARATOR: &str = ":::";

#[derive(Parser)]
#[command(name = "procpipe")]
#[command(version, about = "Run programs with redirection, pipes and capture, no shell involved", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Run with redirection, exit with the program's status
    procpipe run --stdout build.log --stderr-to-stdout -- make all

    # Capture output like $(...)
    procpipe capture -- git rev-parse HEAD

    # Pipe chain, stages separated by :::
    procpipe pipe -- printf 'b\\na\\n' ::: sort ::: uniq
    procpipe pipe --capture -- ls -1 ::: wc -l
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON execution settings (file_mode, read_chunk, trim_trailing_newline)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one program and exit with its status
    Run {
        #[command(flatten)]
        redirects: RedirectArgs,

        /// Program and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },

    /// Print the output of a program, minus one trailing newline
    Capture {
        /// Read standard input from a file
        #[arg(long, value_name = "FILE")]
        stdin: Option<PathBuf>,

        /// Program and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },

    /// Connect programs with pipes
    Pipe {
        /// Capture the last stage's output instead of inheriting stdout
        #[arg(long)]
        capture: bool,

        /// Stages separated by `:::`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        stages: Vec<String>,
    },
}

#[derive(Args, Debug, Default)]
pub struct RedirectArgs {
    /// Read standard input from a file
    #[arg(long, value_name = "FILE")]
    pub stdin: Option<PathBuf>,

    /// Write standard output to a file
    #[arg(long, value_name = "FILE")]
    pub stdout: Option<PathBuf>,

    /// Append instead of truncating the --stdout/--stderr files
    #[arg(long)]
    pub append: bool,

    /// Write standard error to a file
    #[arg(long, value_name = "FILE", conflicts_with = "stderr_to_stdout")]
    pub stderr: Option<PathBuf>,

    /// Send standard error wherever standard output goes (2>&1)
    #[arg(long)]
    pub stderr_to_stdout: bool,
}
