use super::{JobEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(&self, event: &JobEvent) -> Value {
        match event {
            JobEvent::Started { job_name, run_id } => message(
                "Job Started",
                vec![field("Job", job_name), field("Run", &short_id(run_id))],
                None,
            ),
            JobEvent::Succeeded {
                job_name,
                run_id,
                duration_secs,
                archive_message,
            } => message(
                "Job Finished",
                vec![
                    field("Job", job_name),
                    field("Run", &short_id(run_id)),
                    field("Duration", &format!("{}s", duration_secs)),
                    field("Archive", archive_message),
                ],
                None,
            ),
            JobEvent::Failed {
                job_name,
                run_id,
                exit_code,
                error,
            } => {
                let code = exit_code.map_or_else(|| "none".to_string(), |c| c.to_string());
                message(
                    "Job Failed",
                    vec![
                        field("Job", job_name),
                        field("Run", &short_id(run_id)),
                        field("Exit code", &code),
                    ],
                    Some(format!("*Error:*\n```{}```", error)),
                )
            }
            JobEvent::TimedOut {
                job_name,
                run_id,
                timeout_secs,
            } => message(
                "Job Timed Out",
                vec![
                    field("Job", job_name),
                    field("Run", &short_id(run_id)),
                    field("Limit", &format!("{}s", timeout_secs)),
                ],
                None,
            ),
        }
    }
}

fn short_id(run_id: &str) -> String {
    run_id.chars().rev().take(8).collect::<Vec<_>>().into_iter().rev().collect()
}

fn field(label: &str, value: &str) -> Value {
    json!({
        "type": "mrkdwn",
        "text": format!("*{}:*\n{}", label, value)
    })
}

fn message(header: &str, fields: Vec<Value>, detail: Option<String>) -> Value {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {
                "type": "plain_text",
                "text": header,
                "emoji": true
            }
        }),
        json!({
            "type": "section",
            "fields": fields
        }),
    ];

    if let Some(text) = detail {
        blocks.push(json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": text
            }
        }));
    }

    json!({ "blocks": blocks })
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn notify(&self, event: JobEvent) -> Result<()> {
        let payload = self.format_message(&event);
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
