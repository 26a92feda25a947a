//! Failure alerts.

use macro_ingest_config::AlertConfig;
use macro_ingest_core::StageFailure;

/// Told about every stage failure, after the run has been marked failed.
pub trait FailureNotifier: Send + Sync {
    fn notify(&self, failure: &StageFailure);
}

/// Emits one `alert` event per failure when a topic is configured.
///
/// Delivery to the topic itself is left to whatever ships the logs.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    topic_arn: Option<String>,
}

impl LogNotifier {
    pub fn from_config(config: &AlertConfig) -> Self {
        Self {
            topic_arn: config
                .sns_topic_arn
                .as_deref()
                .map(str::trim)
                .filter(|arn| !arn.is_empty())
                .map(str::to_string),
        }
    }

    pub fn topic_arn(&self) -> Option<&str> {
        self.topic_arn.as_deref()
    }
}

impl FailureNotifier for LogNotifier {
    fn notify(&self, failure: &StageFailure) {
        let Some(topic_arn) = self.topic_arn.as_deref() else {
            return;
        };
        tracing::error!(
            target: "alert",
            run_id = %failure.run_id,
            stage = %failure.stage,
            error_code = failure.code().as_str(),
            topic_arn = %topic_arn,
            reason = %failure.error,
            "Pipeline stage failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_topic_disables_alerts() {
        let notifier = LogNotifier::from_config(&AlertConfig {
            sns_topic_arn: Some("  ".to_string()),
        });
        assert!(notifier.topic_arn().is_none());

        let notifier = LogNotifier::from_config(&AlertConfig {
            sns_topic_arn: Some("arn:aws:sns:us-east-1:123456789012:mdi".to_string()),
        });
        assert_eq!(notifier.topic_arn(), Some("arn:aws:sns:us-east-1:123456789012:mdi"));
    }
}
