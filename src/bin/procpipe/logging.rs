use console::style;
use env_logger::{Builder, Env};
use log::{Level, LevelFilter};
use std::io::Write;

/// Log target prefix shared by the library and this binary
const CRATE_TARGET: &str = "procpipe";

/// Level for procpipe's own records; other crates stay at warn
fn crate_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}

/// `procpipe::execution::process` -> `execution::process`
fn short_target(target: &str) -> &str {
    target
        .strip_prefix(CRATE_TARGET)
        .and_then(|rest| rest.strip_prefix("::"))
        .unwrap_or(target)
}

/// Initialize the stderr logger. `--verbose` shows procpipe's launch and
/// reap tracing; `PROCPIPE_LOG` takes env_logger directives and wins over both.
pub fn init_logger(verbose: bool) {
    Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter_module(CRATE_TARGET, crate_level(verbose))
        .parse_env(Env::new().filter("PROCPIPE_LOG"))
        .format(|buf, record| {
            let level = match record.level() {
                Level::Error => format!("{}", style("ERROR").red().bold()),
                Level::Warn => format!("{}", style("WARN ").yellow().bold()),
                Level::Info => format!("{}", style("INFO ").green()),
                Level::Debug => format!("{}", style("DEBUG").cyan()),
                Level::Trace => format!("{}", style("TRACE").dim()),
            };
            writeln!(
                buf,
                "{} {} {}",
                level,
                style(short_target(record.target())).dim(),
                record.args()
            )
        })
        .init();
}
