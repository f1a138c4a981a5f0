//! Logging with colored module prefixes.
//!
//! The `log!` macro prints `[module] message` lines, with the prefix
//! color keyed to the module name and long single-line messages
//! truncated to the terminal width.
//!
//! # Example
//!
//! ```ignore
//! log!("build"; "processed {} posts", count);
//! log!("error"; "{e}");
//! ```

use colored::{ColoredString, Colorize};
use std::{
    borrow::Cow,
    env,
    io::{Write, stderr},
    sync::OnceLock,
};

/// Suffix marking a shortened message.
const ELLIPSIS: &str = "…";

/// Cached terminal width (fetched once on first use).
static TERMINAL_WIDTH: OnceLock<usize> = OnceLock::new();

/// Get terminal width from `$COLUMNS`, falling back to 120.
fn get_terminal_width() -> usize {
    *TERMINAL_WIDTH.get_or_init(|| {
        env::var("COLUMNS")
            .ok()
            .and_then(|c| c.parse().ok())
            .unwrap_or(120)
    })
}

/// Log a message with a colored module prefix.
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Log a message with a colored module prefix.
///
/// Multiline messages are printed as-is; single-line messages are
/// truncated to the terminal width.
pub fn log(module: &str, message: &str) {
    let prefix = colorize_prefix(module);
    let mut out = stderr().lock();

    if message.contains('\n') {
        writeln!(out, "{prefix} {message}").ok();
        return;
    }

    // "[module] " overhead
    let max_msg_len = get_terminal_width().saturating_sub(module.len() + 3);
    writeln!(out, "{prefix} {}", truncate_str(message, max_msg_len)).ok();
}

/// Apply color to a module prefix based on module type.
#[inline]
fn colorize_prefix(module: &str) -> ColoredString {
    let prefix = format!("[{module}]");
    match module {
        "watch" => prefix.bright_green().bold(),
        "error" => prefix.bright_red().bold(),
        "warn" => prefix.bright_magenta().bold(),
        "cache" => prefix.bright_cyan().bold(),
        _ => prefix.bright_yellow().bold(),
    }
}

/// Shorten a single-line message to at most `max_len` bytes, marking
/// the cut with an ellipsis.
///
/// Walks forward over char boundaries, so multibyte text is never
/// split mid-character. Messages that already fit pass through
/// without allocation.
fn truncate_str(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.len() <= max_len {
        return Cow::Borrowed(s);
    }
    let Some(budget) = max_len.checked_sub(ELLIPSIS.len()) else {
        // Not even the ellipsis fits
        return Cow::Borrowed("");
    };

    let mut keep = 0;
    for (pos, c) in s.char_indices() {
        let next = pos + c.len_utf8();
        if next > budget {
            break;
        }
        keep = next;
    }
    Cow::Owned(format!("{}{ELLIPSIS}", &s[..keep]))
}
