pub mod commands;
pub mod logging;
pub mod models;
pub mod storage;
pub mod store;

#[cfg(feature = "app")]
mod cli;

#[cfg(feature = "app")]
pub use crate::cli::Cli;

#[cfg(all(feature = "app", not(test)))]
pub fn run() -> std::process::ExitCode {
    use clap::Parser;

    let cli = Cli::parse();
    // Logging is best-effort: the list still works without a log file.
    let _logger = match logging::init_logging(&cli.file) {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("warning: logging disabled: {err}");
            None
        }
    };
    log::debug!("run: command={:?} file={}", cli.command, cli.file.display());
    cli::run(cli)
}
