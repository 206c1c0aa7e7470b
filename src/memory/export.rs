//! Session export (json, txt, html)

use super::session::Session;
use crate::error::PipelineError;
use crate::Result;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Txt,
    Html,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Txt => "txt",
            ExportFormat::Html => "html",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Txt => "text/plain; charset=utf-8",
            ExportFormat::Html => "text/html; charset=utf-8",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "txt" => Ok(ExportFormat::Txt),
            "html" => Ok(ExportFormat::Html),
            other => Err(PipelineError::InvalidInput(format!(
                "unsupported export format '{}' (expected json, txt or html)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub file_name: String,
    pub format: ExportFormat,
    pub body: String,
}

pub fn export(session: &Session, format: ExportFormat) -> Result<Export> {
    let body = match format {
        ExportFormat::Json => serde_json::to_string_pretty(session)?,
        ExportFormat::Txt => render_text(session),
        ExportFormat::Html => render_html(session),
    };
    Ok(Export {
        file_name: format!("{}.{}", session.id, format.extension()),
        format,
        body,
    })
}

fn render_text(session: &Session) -> String {
    let mut out = format!(
        "Conversation: {}\nCreated: {}\n\n",
        session.metadata.title,
        session.metadata.created_at.to_rfc3339()
    );
    for message in &session.messages {
        out.push_str(&format!("{}: {}\n\n", message.sender.label(), message.text));
    }
    out
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn render_html(session: &Session) -> String {
    let title = escape_html(&session.metadata.title);
    let mut out = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Conversation Export - {title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .message {{ margin-bottom: 15px; padding: 10px; border-radius: 5px; }}
        .user {{ background-color: #f0f0f0; }}
        .assistant {{ background-color: #e1f5fe; }}
        .metadata {{ margin-bottom: 20px; }}
    </style>
</head>
<body>
    <div class="metadata">
        <h1>{title}</h1>
        <p>Created: {created}</p>
    </div>
    <div class="conversation">
"#,
        title = title,
        created = session.metadata.created_at.to_rfc3339(),
    );

    for message in &session.messages {
        let sender = message.sender.label();
        out.push_str(&format!(
            "    <div class=\"message {}\">\n        <strong>{}:</strong><br>\n        {}\n    </div>\n",
            sender.to_lowercase(),
            sender,
            escape_html(&message.text).replace('\n', "<br>"),
        ));
    }

    out.push_str("    </div>\n</body>\n</html>\n");
    out
}
