use std::path::Path;

pub const LOG_FILE_BASENAME: &str = "tasklist";
pub const LOG_FILE_SUFFIX: &str = "log";
pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
pub const LOG_ROTATE_KEEP_FILES: usize = 5;

/// Log files sit next to the task file, settings and backups.
pub fn log_directory(data_path: &Path) -> &Path {
    match data_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Picks the level spec: `TASKLIST_LOG`, then `RUST_LOG`, then the build default.
pub fn log_spec(tasklist_log: Option<String>, rust_log: Option<String>) -> String {
    let default_spec = if cfg!(debug_assertions) {
        "warn,tasklist_lib=debug"
    } else {
        "warn,tasklist_lib=info"
    };
    tasklist_log
        .filter(|value| !value.trim().is_empty())
        .or_else(|| rust_log.filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| default_spec.to_string())
}

#[cfg(all(feature = "app", not(test)))]
pub fn init_logging(data_path: &Path) -> Result<flexi_logger::LoggerHandle, flexi_logger::FlexiLoggerError> {
    use flexi_logger::{
        detailed_format, Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming, WriteMode,
    };

    let dir = log_directory(data_path);
    std::fs::create_dir_all(dir)?;

    let spec = log_spec(
        std::env::var("TASKLIST_LOG").ok(),
        std::env::var("RUST_LOG").ok(),
    );

    let handle = Logger::try_with_str(spec)?
        .log_to_file(
            FileSpec::default()
                .directory(dir)
                .basename(LOG_FILE_BASENAME)
                .suffix(LOG_FILE_SUFFIX),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .format_for_files(detailed_format)
        .rotate(
            Criterion::Size(LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(LOG_ROTATE_KEEP_FILES),
        )
        // stdout carries command output; problems go to stderr.
        .duplicate_to_stderr(Duplicate::Warn)
        .start()?;

    install_panic_hook(data_path);

    log::debug!(
        "logger initialized dir={} rotate_size_bytes={} keep_files={}",
        dir.display(),
        LOG_ROTATE_SIZE_BYTES,
        LOG_ROTATE_KEEP_FILES
    );
    Ok(handle)
}

/// Text of a panic payload; `panic!` produces either `&str` or `String`.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return text;
    }
    payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .unwrap_or("unknown panic")
}

// The log file outlives the terminal, so a crash is recorded there before
// the default hook prints it.
#[cfg(all(feature = "app", not(test)))]
fn install_panic_hook(data_path: &Path) {
    let data_path = data_path.to_path_buf();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info: &std::panic::PanicHookInfo<'_>| {
        let thread = std::thread::current();
        let location = info
            .location()
            .map(|loc| loc.to_string())
            .unwrap_or_default();
        log::error!(
            "tasklist crashed on thread {} at {location} while working on {}: {}\n{}",
            thread.name().unwrap_or("unnamed"),
            data_path.display(),
            panic_message(info.payload()),
            std::backtrace::Backtrace::force_capture()
        );
        default_hook(info);
    }));
}
