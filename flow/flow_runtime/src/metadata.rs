use crate::config::SystemMessages;
use crate::ui::AppError;
use serde_json::{Map, Value, json};
use std::time::Duration;

/// Added to the session timeout so the client redirects only after the
/// server side has really expired.
const REDIRECT_GRACE_SECS: u64 = 15;

pub struct MetadataWriter;

impl MetadataWriter {
    /// Builds the `meta` object. An empty map means the key is left out of
    /// the response.
    pub fn create_metadata(
        repaint_all: bool,
        is_async: bool,
        messages: &SystemMessages,
        max_inactive_interval: Option<Duration>,
        app_errors: &[AppError],
    ) -> Map<String, Value> {
        let mut meta = Map::new();
        if repaint_all {
            meta.insert("repaintAll".into(), Value::Bool(true));
        }
        if is_async {
            meta.insert("async".into(), Value::Bool(true));
        }

        if let (Some(interval), Some(url), true) = (
            max_inactive_interval,
            messages.session_expired_url.as_deref(),
            messages.session_expired_notification_enabled,
        ) {
            meta.insert(
                "timedRedirect".into(),
                json!({
                    "interval": interval.as_secs() + REDIRECT_GRACE_SECS,
                    "url": url,
                }),
            );
        }

        // The client shows one notification, so only the latest error goes out.
        if let Some(error) = app_errors.last() {
            meta.insert(
                "appError".into(),
                json!({
                    "caption": error.caption,
                    "message": error.message,
                }),
            );
        }

        meta
    }
}
