//! Best-effort operator alerts.
//!
//! Alerts are pushed onto an unbounded queue and drained by a background task
//! into a [`NotificationSink`]. Producers never wait on delivery and a failed
//! delivery is only logged.

use crate::error::FailureKind;
use crate::relay::{write_event, OutboundEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Rate in effect after a degraded resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Fallback {
    StaleCache {
        rate: f64,
        observed_at: DateTime<Utc>,
    },
    Default {
        rate: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: FailureKind,
    pub detail: String,
    pub fallback: Option<Fallback>,
}

impl Alert {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Human-readable text for the operations channel.
    pub fn render(&self) -> String {
        let mut text = format!(
            "【為替ボット：技術的お知らせ】\nエラーが発生しました（タイプ：{}）。\n詳細：{}",
            self.kind, self.detail
        );
        match &self.fallback {
            Some(Fallback::StaleCache { rate, observed_at }) => text.push_str(&format!(
                "\nボットはキャッシュレート（1ドル={:.2}円、{}取得）で動作中です。運営にて対応中。",
                rate,
                observed_at.format("%Y-%m-%d %H:%M UTC")
            )),
            Some(Fallback::Default { rate }) => text.push_str(&format!(
                "\nボットは予備レート（1ドル={:.2}円）で動作中です。運営にて対応中。",
                rate
            )),
            None => {}
        }
        text
    }
}

/// Cloneable handle used by the core to raise alerts.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Alert>>,
}

impl Notifier {
    /// A notifier that drops everything (logging only).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Notifier plus the receiving end of its queue, for callers that drain
    /// alerts themselves.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn notify(&self, alert: Alert) {
        warn!("alert kind={} detail={}", alert.kind, alert.detail);
        if let Some(tx) = &self.tx {
            if tx.send(alert).is_err() {
                debug!("alert dropped: dispatcher stopped");
            }
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Writes alerts as protocol lines on stdout next to replies.
pub struct StdoutSink {
    channel_id: Option<String>,
}

impl StdoutSink {
    pub fn new(channel_id: Option<String>) -> Self {
        Self { channel_id }
    }
}

#[async_trait]
impl NotificationSink for StdoutSink {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        write_event(&OutboundEvent::Alert {
            channel_id: self.channel_id.clone(),
            kind: alert.kind.as_str().to_string(),
            content: alert.render(),
        })
    }
}

/// Posts alerts to a chat webhook (`{"content": "..."}` body).
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String, user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .use_rustls_tls()
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let res = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "content": alert.render() }))
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            anyhow::bail!("webhook responded with {}", status);
        }
        Ok(())
    }
}

/// Start the background task draining alerts into `sink`. The task ends once
/// every `Notifier` clone has been dropped and the queue is empty.
pub fn spawn_dispatcher(sink: Box<dyn NotificationSink>) -> (Notifier, JoinHandle<()>) {
    let (notifier, mut rx) = Notifier::channel();
    let handle = tokio::spawn(async move {
        while let Some(alert) = rx.recv().await {
            if let Err(e) = sink.send(&alert).await {
                warn!("failed to deliver alert ({}): {}", alert.kind, e);
            }
        }
        debug!("alert dispatcher stopped");
    });
    (notifier, handle)
}
