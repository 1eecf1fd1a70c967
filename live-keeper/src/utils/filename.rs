//! File name helpers: source-name validation, capture-tool temporary-file
//! detection and collision-free destination names.

use regex::Regex;
use std::sync::LazyLock;

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Suffixes the capture tool uses for files it is still writing.
const IN_PROGRESS_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

/// Fragment files written during `--live-from-start` downloads.
static FRAGMENT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.part-frag\d+(\.part)?$").expect("fragment regex is valid")
});

/// Merge intermediates: the merger's `<stem>.temp.<ext>` output and the
/// per-format `<stem>.f<format id>.<ext>` inputs it deletes afterwards.
static MERGE_INTERMEDIATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(temp|f\d+)\.[a-z0-9]+$").expect("merge intermediate regex is valid")
});

/// Multi-dot extensions kept intact when numbering a colliding file name.
const COMPOUND_EXTENSIONS: &[&str] = &[".live_chat.json", ".info.json"];

/// Sanitize a string for use as a single path component across all platforms.
///
/// Control characters and Windows-invalid characters become `_` (collapsed),
/// leading/trailing spaces and dots are trimmed, reserved device names get a
/// `_` prefix, and an empty result becomes `"unnamed"`.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    let stem = upper.split('.').next().unwrap_or_default();
    if WINDOWS_RESERVED_NAMES.contains(&stem) {
        return format!("_{trimmed}");
    }

    trimmed.to_string()
}

/// Whether `name` can be used verbatim as a scratch directory name.
///
/// A name that sanitization would alter is rejected so that two sources can
/// never collapse onto the same scratch directory.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty() && sanitize_filename(name) == name
}

/// Whether the capture tool is still writing this file.
pub fn is_in_progress(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    IN_PROGRESS_SUFFIXES.iter().any(|s| lower.ends_with(s))
        || FRAGMENT_SUFFIX.is_match(&lower)
        || MERGE_INTERMEDIATE.is_match(&lower)
}

/// Whether a file name follows the chat-log convention (`.live_chat.json` or `.json`).
pub fn is_chat_log(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    lower.ends_with(".live_chat.json") || lower.ends_with(".json")
}

/// Split a file name into stem and extension (extension includes the dot).
///
/// Known compound extensions stay together; otherwise the last dot wins.
/// Hidden files such as `.env` have no extension.
pub fn split_extension(file_name: &str) -> (&str, &str) {
    let lower = file_name.to_ascii_lowercase();
    for ext in COMPOUND_EXTENSIONS {
        if lower.len() > ext.len() && lower.ends_with(ext) {
            let at = file_name.len() - ext.len();
            return file_name.split_at(at);
        }
    }

    match file_name.rfind('.') {
        Some(0) | None => (file_name, ""),
        Some(at) => file_name.split_at(at),
    }
}

/// `<stem> (n).<ext>`, used when the destination already holds `file_name`.
pub fn numbered_name(file_name: &str, n: u32) -> String {
    let (stem, ext) = split_extension(file_name);
    format!("{stem} ({n}){ext}")
}
