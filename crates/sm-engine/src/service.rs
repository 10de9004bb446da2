//! Background sync service: the fact-push tick and the conversation-watch
//! tick, both cancelled through one broadcast shutdown channel.
//!
//! Ticks run inline in the select loop, so the two tasks never overlap
//! themselves; an interval deadline that fires mid-run is coalesced via
//! `MissedTickBehavior::Delay`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use sm_core::ConversationSource;

use crate::config::SyncConfig;
use crate::conversations::ConversationSync;
use crate::sync::SyncEngine;

pub struct SyncService {
    sync: Arc<SyncEngine>,
    conversations: Arc<ConversationSync>,
    source: Option<Arc<dyn ConversationSource>>,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(
        sync: Arc<SyncEngine>,
        conversations: Arc<ConversationSync>,
        config: SyncConfig,
    ) -> Self {
        Self {
            sync,
            conversations,
            source: None,
            config,
        }
    }

    /// Attach the transcript watcher; without one, only the fact tick runs.
    pub fn with_source(mut self, source: Arc<dyn ConversationSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Run until a shutdown signal arrives. An in-flight tick completes
    /// before the loop exits; incomplete pushes never advance meta, so the
    /// next start resumes safely.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut push_tick = interval(Duration::from_secs(self.config.push_interval_secs));
        push_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watch_tick =
            interval(Duration::from_secs(self.config.conversation_interval_secs));
        watch_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            push_secs = self.config.push_interval_secs,
            watch_secs = self.config.conversation_interval_secs,
            watching = self.source.is_some(),
            "sync service started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("sync service shutting down");
                    break;
                }
                _ = push_tick.tick() => {
                    match self.sync.push().await {
                        Ok(report) if report.shards > 0 => {
                            tracing::info!(
                                shards = report.shards,
                                version = report.version,
                                "push tick complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "push tick failed"),
                    }
                }
                _ = watch_tick.tick() => {
                    self.watch_cycle().await;
                }
            }
        }
    }

    async fn watch_cycle(&self) {
        let Some(source) = &self.source else {
            return;
        };
        let conversations = match source.poll().await {
            Ok(conversations) => conversations,
            Err(e) => {
                tracing::warn!(error = %e, "conversation poll failed");
                return;
            }
        };
        if conversations.is_empty() {
            return;
        }
        match self.conversations.push_all(&conversations).await {
            Ok(report) if report.segments > 0 || !report.errors.is_empty() => {
                tracing::info!(
                    conversations = report.conversations,
                    segments = report.segments,
                    errors = report.errors.len(),
                    "watch tick complete"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "watch tick failed"),
        }
    }
}
