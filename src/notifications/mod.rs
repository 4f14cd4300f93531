use crate::config::schema::NotificationConfig;
use crate::server::SupervisorEvent;
use notify_rust::Notification;

const APP_NAME: &str = "Replay";
const ISSUE_HINT: &str = "Please file an issue in the Replay Discord";

/// Desktop notification manager
#[derive(Debug, Clone)]
pub struct NotificationManager {
    config: NotificationConfig,
}

impl NotificationManager {
    #[must_use]
    pub const fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    /// The notification for a supervisor event, if it warrants one
    #[must_use]
    pub fn message_for(event: &SupervisorEvent) -> Option<(String, String)> {
        match event {
            SupervisorEvent::Crashed {
                message,
                restarting: true,
            } => Some((
                "Replay server crashed".to_string(),
                format!("{message}\n\nRestarting the server."),
            )),
            SupervisorEvent::Fatal { message } => Some((
                "Replay server stopped".to_string(),
                format!("{message}\n\n{ISSUE_HINT}"),
            )),
            _ => None,
        }
    }

    /// Show whatever notification `event` warrants
    pub fn server_event(&self, event: &SupervisorEvent) {
        if let Some((summary, body)) = Self::message_for(event) {
            self.error(&summary, &body);
        }
    }

    pub fn error(&self, summary: &str, body: &str) {
        if !self.config.enable_errors {
            return;
        }
        if let Err(e) = Notification::new()
            .appname(APP_NAME)
            .summary(summary)
            .body(body)
            .show()
        {
            tracing::warn!("Failed to show notification: {e}");
        }
    }
}
