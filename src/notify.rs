//! Notification dispatch for alarms that fire.
//!
//! A [`Notifier`] receives a ready-made [`Notification`]; how it reaches the
//! user (log line, webhook to a phone bridge, ...) is up to the backend.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::schema::{Alarm, AlarmType};

pub const NOTIFICATION_TITLE: &str = "🚚 Alarma de Entrega";

/// Everything a client needs to alert the user about one alarm.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Lets clients replace a repeated notification instead of stacking it.
    pub tag: String,
    pub alarm_id: String,
    pub closing_time: String,
    #[serde(rename = "type")]
    pub alarm_type: AlarmType,
    pub sound: bool,
    pub vibrate: bool,
    pub volume: f64,
}

impl Notification {
    pub fn for_alarm(alarm: &Alarm, config: &AppConfig) -> Self {
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: format!("{} cierra pronto!", alarm.business_name),
            tag: format!("delivery-alarm-{}", alarm.id),
            alarm_id: alarm.id.clone(),
            closing_time: alarm.closing_time.clone(),
            alarm_type: alarm.alarm_type,
            sound: config.sound_enabled,
            vibrate: config.vibration_enabled,
            volume: config.volume,
        }
    }

    /// Sound/vibration check requested from the settings screen.
    pub fn test(config: &AppConfig) -> Self {
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: "Prueba de sonido".to_string(),
            tag: "delivery-alarm-test".to_string(),
            alarm_id: String::new(),
            closing_time: String::new(),
            alarm_type: AlarmType::Final,
            sound: config.sound_enabled,
            vibrate: config.vibration_enabled,
            volume: config.volume,
        }
    }
}

/// Async trait implemented by each notification backend.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        info!(
            tag = %notification.tag,
            sound = notification.sound,
            vibrate = notification.vibrate,
            volume = notification.volume,
            "{}: {}",
            notification.title,
            notification.body
        );
        Ok(())
    }
}

/// Posts notifications as JSON to a webhook.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String, client: reqwest::Client) -> Self {
        Self { url, client }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook error ({}): {}", status, error_text);
        }
        Ok(())
    }
}

/// Pick the webhook backend when a URL is configured, the log otherwise.
pub fn from_settings(webhook_url: Option<&str>, client: reqwest::Client) -> Box<dyn Notifier> {
    match webhook_url {
        Some(url) => {
            info!("Notifications go to webhook {}", url);
            Box::new(WebhookNotifier::new(url.to_string(), client))
        }
        None => {
            warn!("NOTIFY_WEBHOOK_URL not set, notifications are only logged");
            Box::new(LogNotifier)
        }
    }
}
