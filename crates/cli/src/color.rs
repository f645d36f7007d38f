// SPDX-License-Identifier: MIT

use std::io::IsTerminal;

mod codes {
    pub const HEADER: u8 = 74;
    pub const MUTED: u8 = 240;
    pub const BAD: u8 = 167;
}

/// Priority: `NO_COLOR=1` disables, `COLOR=1` forces, otherwise a TTY check.
pub fn should_colorize() -> bool {
    if std::env::var("NO_COLOR").is_ok_and(|v| v == "1") {
        return false;
    }
    if std::env::var("COLOR").is_ok_and(|v| v == "1") {
        return true;
    }
    std::io::stdout().is_terminal()
}

fn fg256(code: u8) -> String {
    format!("\x1b[38;5;{code}m")
}

const RESET: &str = "\x1b[0m";

pub fn header(text: &str) -> String {
    if should_colorize() { format!("{}{}{}", fg256(codes::HEADER), text, RESET) } else { text.to_string() }
}

pub fn muted(text: &str) -> String {
    if should_colorize() { format!("{}{}{}", fg256(codes::MUTED), text, RESET) } else { text.to_string() }
}

pub fn bad(text: &str) -> String {
    if should_colorize() { format!("{}{}{}", fg256(codes::BAD), text, RESET) } else { text.to_string() }
}
