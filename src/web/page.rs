//! Control page rendering.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::core::{ArchiveEntry, JobRun};

const CONTROL_TEMPLATE: &str = include_str!("assets/control.html");

/// Characters left unescaped in path segments and RFC 5987 values.
pub const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A registered job and its most recent run, if any.
pub struct JobRow {
    pub name: String,
    pub latest: Option<JobRun>,
}

pub fn render(jobs: &[JobRow], archives: &[ArchiveEntry], retention_days: u64) -> String {
    CONTROL_TEMPLATE
        .replace("{{jobs}}", &render_jobs(jobs))
        .replace("{{archives}}", &render_archives(archives))
        .replace("{{retention_days}}", &retention_days.to_string())
}

fn render_jobs(jobs: &[JobRow]) -> String {
    if jobs.is_empty() {
        return r#"<p class="empty">No jobs configured</p>"#.to_string();
    }

    jobs.iter()
        .map(|job| {
            let name = escape_html(&job.name);
            let last = match &job.latest {
                Some(run) => format!(
                    "Last run: {} at {}",
                    run.status,
                    run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                None => "Not run yet".to_string(),
            };
            format!(
                "<button class=\"btn btn-run\" data-job=\"{name}\">Run {name}</button>\n\
                 <div class=\"meta\">{last}</div>\n"
            )
        })
        .collect()
}

fn render_archives(archives: &[ArchiveEntry]) -> String {
    if archives.is_empty() {
        return r#"<p class="empty">No archives yet</p>"#.to_string();
    }

    archives
        .iter()
        .map(|entry| {
            let href = utf8_percent_encode(&entry.name, PATH_SEGMENT);
            let name = escape_html(&entry.name);
            format!(
                "<a class=\"btn btn-download\" href=\"/download/{href}\" download>Download {name} ({size})</a>\n\
                 <div class=\"meta\">Created: {created}</div>\n",
                size = escape_html(&entry.formatted_size),
                created = escape_html(&entry.created_time),
            )
        })
        .collect()
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
