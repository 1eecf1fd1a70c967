use chrono::Local;
use std::{
    backtrace::Backtrace,
    fs::OpenOptions,
    io::Write,
    panic::{PanicHookInfo, take_hook},
    path::Path,
    thread,
};

use crate::logging::LOG_FILE_PREFIX;

/// Installs a global panic hook that logs panics via `tracing`.
///
/// In `panic = "abort"` builds the record is also appended straight to the
/// current daily log file, since the non-blocking writer may not flush first.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let panic_record = format_panic_record(panic_info);

            tracing::error!(target: "live_keeper::panic", "{panic_record}");

            if cfg!(panic = "abort") {
                let _ = append_panic_record(&log_dir, &panic_record);
            }
        }));

        previous_hook(panic_info);
    }));
}

fn append_panic_record(log_dir: &Path, record: &str) -> std::io::Result<()> {
    let filename = format!("{LOG_FILE_PREFIX}.{}", Local::now().format("%Y-%m-%d"));
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(filename))?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_payload(panic_info);
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread_name = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());
    let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");

    format!(
        "{ts} PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{}",
        Backtrace::force_capture()
    )
}

fn panic_payload(panic_info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = panic_info.payload().downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        return s.clone();
    }
    panic_info.to_string()
}
