//! Notification text.

use inboxbot_scheduler::NewMailNotice;

/// Telegram's limit on one message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Render a new-mail notice as plain text.
pub fn render_notice(notice: &NewMailNotice) -> String {
    let sender = notice.sender.as_deref().unwrap_or("unknown");
    let subject = match notice.subject.as_deref() {
        Some(subject) if !subject.trim().is_empty() => subject,
        _ => "(no subject)",
    };
    let received = notice
        .received_at
        .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut text = format!(
        "📧 New mail\n\nFrom: {}\nSubject: {}\nReceived: {}\n",
        sender, subject, received
    );
    if !notice.attachment_names.is_empty() {
        text.push_str(&format!("Attachments: {}\n", notice.attachment_names.join(", ")));
    }

    truncate(&text, MAX_MESSAGE_CHARS)
}

/// Truncate to `max_chars` characters, respecting UTF-8 boundaries.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", truncated)
    }
}
