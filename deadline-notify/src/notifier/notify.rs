//! Terminal rendering and alerts for near-deadline tasks.
//!
//! Emits terminal escape codes (BEL, OSC 9, OSC 777, OSC 99) when a task
//! first shows up in the notification set, and formats the list view.

use std::io::{self, Write};

use chrono::{DateTime, Utc};

use crate::notifier::protocol::NotificationCandidate;

/// Longest title shown in a desktop notification
const MAX_TITLE_LEN: usize = 80;

/// Writes terminal notification escape codes.
///
/// Several sequences are written so that most terminal emulators pick
/// up at least one of them:
/// - BEL (`\x07`) - Universal terminal bell
/// - OSC 9 (iTerm2) - Desktop notification
/// - OSC 777 (Konsole/VTE/Gnome Terminal) - Desktop notification
/// - OSC 99 (kitty) - Desktop notification
pub fn write_terminal_notification<W: Write>(
    out: &mut W,
    title: &str,
    message: &str,
) -> io::Result<()> {
    out.write_all(b"\x07")?;

    // ESC ] 9 ; message BEL
    write!(out, "\x1b]9;{}\x07", escape_osc(message))?;

    // ESC ] 777 ; notify ; title ; message BEL
    write!(
        out,
        "\x1b]777;notify;{};{}\x07",
        escape_osc(title),
        escape_osc(message)
    )?;

    // ESC ] 99 ; metadata ; payload ST, title then body
    write!(
        out,
        "\x1b]99;i=1:d=0:p=title;{}\x1b\\\x1b]99;i=1:d=0:p=body;{}\x1b\\",
        escape_osc(title),
        escape_osc(message)
    )?;

    out.flush()
}

/// Alert on stdout that a task is close to its deadline
pub fn notify_deadline(candidate: &NotificationCandidate, now: DateTime<Utc>) {
    let title = format!("Deadline: {}", truncate_title(&candidate.task.title, MAX_TITLE_LEN));
    let message = describe_remaining(candidate.deadline, now);

    // Alerts are best effort; a closed stdout is not worth failing over
    let _ = write_terminal_notification(&mut io::stdout(), &title, &message);
}

/// One rendered line of the notification list
pub fn format_entry(candidate: &NotificationCandidate, now: DateTime<Utc>) -> String {
    format!(
        "[{}] {} ({}, {})",
        candidate.task.id,
        truncate_title(&candidate.task.title, MAX_TITLE_LEN),
        candidate.deadline.format("%Y-%m-%d %H:%M UTC"),
        describe_remaining(candidate.deadline, now)
    )
}

/// "due in 3h 5m" or "overdue by 40m"
pub fn describe_remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = deadline - now;
    let (prefix, minutes) = if delta < chrono::Duration::zero() {
        ("overdue by", -delta.num_minutes())
    } else {
        ("due in", delta.num_minutes())
    };

    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{} {}h {}m", prefix, hours, minutes)
    } else {
        format!("{} {}m", prefix, minutes)
    }
}

/// OSC sequences end at BEL or ST, so control characters must not leak through
fn escape_osc(s: &str) -> String {
    s.replace(['\x07', '\x1b', '\r'], "").replace('\n', " ")
}

/// First line only, cut to `max_len` characters
fn truncate_title(title: &str, max_len: usize) -> String {
    let first_line = title.lines().next().unwrap_or(title);
    if first_line.chars().count() <= max_len {
        first_line.to_string()
    } else {
        let kept: String = first_line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
