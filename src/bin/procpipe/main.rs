//! procpipe CLI - run programs with redirection, pipes and capture

mod cli;
mod logging;
mod runner;

use clap::Parser;
use cli::{Cli, Commands};
use console::style;
use procpipe::{Command, Pipeline, Result};

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    match dispatch(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn dispatch(cli: Cli) -> Result<i32> {
    let mut ctx = runner::load_context(cli.config)?;

    match cli.command {
        Commands::Run { redirects, argv } => {
            let pipeline = runner::run_pipeline(argv, &redirects)?;
            runner::run(&mut ctx, &pipeline)
        }
        Commands::Capture { stdin, argv } => {
            let mut pipeline = Pipeline::from(Command::from_argv(argv)?);
            if let Some(path) = stdin {
                pipeline = pipeline.redirect_stdin(path);
            }
            runner::capture(&mut ctx, &pipeline)
        }
        Commands::Pipe { capture, stages } => {
            let chain = runner::pipe_chain(stages)?;
            if capture {
                runner::capture(&mut ctx, &chain)
            } else {
                runner::run(&mut ctx, &chain)
            }
        }
    }
}
