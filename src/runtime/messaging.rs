//! Unicast and broadcast delivery to message-capable plugins.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use super::Runtime;
use super::pipeline::Callback;
use crate::plugin::{Capability, PluginError};
use crate::registry::RuntimePlugin;

impl Runtime {
    /// Deliver `message` from `from` to the plugins named in `to`, or to
    /// every registered plugin when `to` is `None`.
    ///
    /// Unknown ids, dormant plugins and plugins without a message handler
    /// are skipped. Each
    /// delivery is isolated: a failing handler is logged and the remaining
    /// recipients still receive the message. Replies go to `callback`.
    /// Returns the number of successful deliveries.
    pub async fn send_message(
        &self,
        message: &Value,
        from: &str,
        to: Option<&[&str]>,
        callback: Option<Callback>,
    ) -> usize {
        let recipients = self.recipients(to).await;

        let mut delivered = 0;
        for plugin in recipients {
            let Some(layer) = plugin.provider(&Capability::Message).cloned() else {
                continue;
            };
            let ctx = self.context(&plugin);

            let result = AssertUnwindSafe(layer.on_message(&ctx, message, from))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(PluginError::from_panic(payload.as_ref())));

            match result {
                Ok(reply) => {
                    delivered += 1;
                    self.inner.metrics.messages_delivered.inc();
                    if let (Some(reply), Some(callback)) = (reply, &callback) {
                        callback(reply);
                    }
                }
                Err(e) => {
                    tracing::warn!(plugin_id = plugin.id(), from, error = %e, "message delivery failed");
                }
            }
        }

        tracing::debug!(from, delivered, "message sent");
        delivered
    }

    pub async fn broadcast(&self, message: &Value, from: &str, callback: Option<Callback>) -> usize {
        self.send_message(message, from, None, callback).await
    }

    pub async fn send_to(
        &self,
        to: &[&str],
        message: &Value,
        from: &str,
        callback: Option<Callback>,
    ) -> usize {
        self.send_message(message, from, Some(to), callback).await
    }

    async fn recipients(&self, to: Option<&[&str]>) -> Vec<Arc<RuntimePlugin>> {
        let registry = self.inner.registry.read().await;
        match to {
            Some(ids) => ids
                .iter()
                .filter_map(|id| registry.get(id))
                .filter(|plugin| !plugin.is_dormant())
                .collect(),
            None => {
                let mut all: Vec<_> = registry
                    .plugins()
                    .filter(|plugin| !plugin.is_dormant())
                    .cloned()
                    .collect();
                all.sort_by(|a, b| a.id().cmp(b.id()));
                all
            }
        }
    }
}
