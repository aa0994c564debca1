use log::{debug, info, warn};
use procpipe::{Command, ExecConfig, ExecContext, PipeError, Pipeline, Result, TerminatedProcess};
use std::path::PathBuf;

use crate::cli::{RedirectArgs, STAGE_SEPARATOR};

/// Status reported when a child did not exit normally
const ABNORMAL_EXIT_STATUS: i32 = 1;

/// Build the execution context from an optional JSON settings file
pub fn load_context(config: Option<PathBuf>) -> Result<ExecContext> {
    let config = match config {
        Some(path) => {
            debug!("Loading settings from {}", path.display());
            ExecConfig::from_file(&path)?
        }
        None => ExecConfig::default(),
    };
    ExecContext::new(config)
}

/// Build the single-command pipeline for `procpipe run`
pub fn run_pipeline(argv: Vec<String>, redirects: &RedirectArgs) -> Result<Pipeline> {
    let mut pipeline = Pipeline::from(Command::from_argv(argv)?);

    if let Some(path) = &redirects.stdin {
        pipeline = pipeline.redirect_stdin(path.as_path());
    }
    if let Some(path) = &redirects.stdout {
        pipeline = if redirects.append {
            pipeline.append_stdout(path.as_path())
        } else {
            pipeline.redirect_stdout(path.as_path())
        };
    }
    if let Some(path) = &redirects.stderr {
        pipeline = if redirects.append {
            pipeline.append_stderr(path.as_path())
        } else {
            pipeline.redirect_stderr(path.as_path())
        };
    }
    if redirects.stderr_to_stdout {
        pipeline = pipeline.redirect_stderr(1);
    }

    Ok(pipeline)
}

/// Split `a x ::: b y` into a pipe chain `a x | b y`
pub fn pipe_chain(stages: Vec<String>) -> Result<Pipeline> {
    let mut commands = stages
        .split(|token| token == STAGE_SEPARATOR)
        .map(|stage| Command::from_argv(stage.iter().cloned()));

    let first = commands
        .next()
        .ok_or_else(|| PipeError::InvalidArgument("no stages given".to_string()))??;

    commands.try_fold(Pipeline::from(first), |chain, next| Ok(chain.pipe(next?)))
}

/// Exit status to propagate for a finished child
pub fn exit_status(status: &TerminatedProcess) -> i32 {
    status
        .exit_code()
        .map(i32::from)
        .unwrap_or(ABNORMAL_EXIT_STATUS)
}

/// Run `pipeline` and return the status of its final command
pub fn run(ctx: &mut ExecContext, pipeline: &Pipeline) -> Result<i32> {
    info!("Running: {}", pipeline);
    let status = ctx.run(pipeline);
    reap(ctx);

    let status = status?;
    debug!("{}", status);
    Ok(exit_status(&status))
}

/// Capture `pipeline`, print the text and return the final status
pub fn capture(ctx: &mut ExecContext, pipeline: &Pipeline) -> Result<i32> {
    info!("Capturing: {}", pipeline);
    let captured = ctx.capture_output(pipeline);
    reap(ctx);

    let captured = captured?;
    println!("{}", captured.text);
    Ok(exit_status(&captured.status))
}

fn reap(ctx: &mut ExecContext) {
    match ctx.reap_all() {
        Ok(reaped) => {
            for status in reaped.iter().filter(|status| !status.success()) {
                debug!("Upstream {}", status);
            }
        }
        Err(e) => warn!("Failed to reap children: {}", e),
    }
}
