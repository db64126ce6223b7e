use crate::cache::{FileTier, TieredCache};
use crate::config::Config;
use crate::http;
use crate::ledger::{MessageLedger, PersistedSet};
use crate::notify::{self, NotificationSink, Notifier, StdoutSink, WebhookSink};
use crate::providers::ProviderChain;
use crate::resolver::RateResolver;
use crate::rewrite;
use crate::types::MessageId;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};

/// One chat message as handed over by the chat adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: MessageId,
    pub channel_id: MessageId,
    #[serde(default)]
    pub author_is_self: bool,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEvent {
    #[serde(rename_all = "camelCase")]
    Reply {
        channel_id: MessageId,
        reply_to: MessageId,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Alert {
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<String>,
        kind: String,
        content: String,
    },
}

/// Write one event as a JSON line on stdout.
pub fn write_event(event: &OutboundEvent) -> anyhow::Result<()> {
    let payload = serde_json::to_string(event)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{}", payload)?;
    out.flush()?;
    Ok(())
}

/// Per-process message pipeline: dedup, resolve, rewrite.
pub struct Relay {
    ledger: MessageLedger,
    resolver: RateResolver,
}

impl Relay {
    pub fn new(ledger: MessageLedger, resolver: RateResolver) -> Self {
        Self { ledger, resolver }
    }

    /// Build the pipeline from configuration, sending alerts to `notifier`.
    pub fn from_config(cfg: &Config, notifier: Notifier) -> anyhow::Result<Self> {
        let client = http::build_client(cfg)?;
        let cache = TieredCache::new(
            cfg.memory_ttl(),
            FileTier::new(cfg.rate_cache_file.clone(), cfg.file_ttl()),
            cfg.file_tier_mode,
        );
        let chain = ProviderChain::from_config(cfg, client);
        let resolver = RateResolver::new(cache, chain, notifier.clone(), cfg.default_rate);
        let ids = PersistedSet::load(cfg.processed_ids_file.clone(), cfg.ledger_max_ids);
        let ledger = MessageLedger::new(ids, notifier);
        Ok(Self::new(ledger, resolver))
    }

    /// Returns the reply to send, if any.
    pub async fn handle(&mut self, msg: &InboundMessage) -> Option<OutboundEvent> {
        if msg.author_is_self {
            debug!("skipping own message {}", msg.id);
            return None;
        }
        if self.ledger.check_and_mark(&msg.id) {
            debug!("skipping processed message {}", msg.id);
            return None;
        }
        if !rewrite::needs_conversion(&msg.text) {
            debug!("message {} has no dollar amounts", msg.id);
            return None;
        }
        let rate = self.resolver.resolve_rate().await;
        debug!(
            "message {} using rate {} ({})",
            msg.id,
            rate.value(),
            rate.provenance()
        );
        let content = rewrite::rewrite(&msg.text, &rate)?;
        Some(OutboundEvent::Reply {
            channel_id: msg.channel_id.clone(),
            reply_to: msg.id.clone(),
            content,
        })
    }

    pub fn resolver(&self) -> &RateResolver {
        &self.resolver
    }
}

fn build_sink(cfg: &Config) -> anyhow::Result<Box<dyn NotificationSink>> {
    match &cfg.ops_webhook_url {
        Some(url) => Ok(Box::new(WebhookSink::new(
            url.clone(),
            &cfg.user_agent,
            cfg.timeout(),
        )?)),
        None => Ok(Box::new(StdoutSink::new(cfg.ops_channel_id.clone()))),
    }
}

/// Read inbound messages line by line until EOF, one at a time.
pub async fn run_stdio_relay(cfg: Config) -> anyhow::Result<()> {
    let (notifier, dispatcher) = notify::spawn_dispatcher(build_sink(&cfg)?);
    let mut relay = Relay::from_config(&cfg, notifier)?;
    info!(
        "fx-relay ready; worst-case rate resolution {:?}",
        relay.resolver().latency_ceiling()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let msg: InboundMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                warn!("ignoring malformed inbound line: {}", e);
                continue;
            }
        };
        if let Some(reply) = relay.handle(&msg).await {
            write_event(&reply)?;
        }
    }

    // Dropping the relay drops the last notifiers so the dispatcher can
    // finish delivering what is queued.
    drop(relay);
    if let Err(e) = dispatcher.await {
        warn!("alert dispatcher ended abnormally: {}", e);
    }
    info!("stdin closed; fx-relay stopping");
    Ok(())
}
