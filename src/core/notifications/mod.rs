mod slack;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{NotificationChannelType, NotificationConfig};

/// Run lifecycle events that trigger notifications
#[derive(Debug, Clone)]
pub enum JobEvent {
    Started {
        job_name: String,
        run_id: String,
    },
    Succeeded {
        job_name: String,
        run_id: String,
        duration_secs: u64,
        archive_message: String,
    },
    Failed {
        job_name: String,
        run_id: String,
        exit_code: Option<i32>,
        error: String,
    },
    TimedOut {
        job_name: String,
        run_id: String,
        timeout_secs: u64,
    },
}

/// Trait for notification channel implementations (Slack, Discord, etc.)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: JobEvent) -> Result<()>;
}

/// Factory function to create a notifier based on config
pub fn create_notifier(config: &NotificationConfig) -> Option<Arc<dyn NotificationChannel>> {
    match &config.channel {
        NotificationChannelType::None => None,
        NotificationChannelType::Slack => {
            let webhook = config.slack_webhook.as_ref()?;
            if webhook.is_empty() {
                return None;
            }
            Some(Arc::new(slack::SlackNotifier::new(webhook.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_channel_means_no_notifier() {
        assert!(create_notifier(&NotificationConfig::default()).is_none());
    }

    #[test]
    fn slack_requires_webhook() {
        let config = NotificationConfig {
            channel: NotificationChannelType::Slack,
            slack_webhook: Some(String::new()),
        };
        assert!(create_notifier(&config).is_none());

        let config = NotificationConfig {
            channel: NotificationChannelType::Slack,
            slack_webhook: Some("https://hooks.slack.com/services/T/B/X".into()),
        };
        assert!(create_notifier(&config).is_some());
    }
}
