//! Submission notification boundary. Builds the admin email and hands
//! it to a sendmail-compatible command; the daemon never speaks SMTP
//! itself. An unconfigured transport downgrades to a logged preview,
//! and no outcome here may fail the submission that triggered it.

use crate::store::submit::SubmissionOutcome;
use std::io::Write;
use std::process::{Command, Stdio};

pub struct MailerConfig {
    pub admin_email: Option<String>,
    pub sendmail_cmd: Option<String>,
}

impl MailerConfig {
    pub fn from_env() -> Self {
        MailerConfig {
            admin_email: env_non_empty("ADMIN_EMAIL"),
            sendmail_cmd: env_non_empty("SENDMAIL_CMD"),
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Skipped,
}

/// Delivers the message, or logs a preview and reports `Skipped` when
/// no transport is configured. Errors are transport failures; callers
/// degrade them to a message suffix, never to a failed request.
pub fn send_submission_email(
    cfg: &MailerConfig,
    msg: &EmailMessage,
) -> anyhow::Result<Delivery> {
    let Some(cmd) = cfg.sendmail_cmd.as_deref() else {
        let preview: String = msg.html.chars().take(400).collect();
        log::info!(
            "email transport not configured; would send to {} with subject {:?}",
            msg.to,
            msg.subject
        );
        log::info!("html preview: {}", preview);
        return Ok(Delivery::Skipped);
    };

    let mut parts = cmd.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("SENDMAIL_CMD is empty"))?;

    let mut child = Command::new(program)
        .args(parts)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    {
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("mail command has no stdin"))?;
        write!(
            stdin,
            "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}",
            msg.to, msg.subject, msg.html
        )?;
    }

    let status = child.wait()?;
    if !status.success() {
        anyhow::bail!("mail command exited with {}", status);
    }
    Ok(Delivery::Delivered)
}

pub fn submission_subject(outcome: &SubmissionOutcome) -> String {
    format!(
        "Submission: {} - {}",
        outcome.district_name, outcome.template_name
    )
}

pub fn build_submission_email_html(outcome: &SubmissionOutcome) -> String {
    let mut rows_html = String::new();
    for row in &outcome.rows {
        rows_html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(&row.label),
            escape_html(&row.value)
        ));
    }

    format!(
        "<div style=\"font-family: Arial, sans-serif; line-height:1.4\">\
           <h2>District Submission</h2>\
           <p><b>District:</b> {}</p>\
           <p><b>Template:</b> {}</p>\
           <p><b>Sent at:</b> {}</p>\
           <table border=\"1\" cellpadding=\"8\" cellspacing=\"0\" style=\"border-collapse:collapse\">\
             <thead><tr><th align=\"left\">Field</th><th align=\"left\">Value</th></tr></thead>\
             <tbody>{}</tbody>\
           </table>\
         </div>",
        escape_html(&outcome.district_name),
        escape_html(&outcome.template_name),
        escape_html(&outcome.sent_at),
        rows_html
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
