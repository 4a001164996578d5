//! Command and subscription registries
//!
//! The worker boundary carries only a command name plus a plain JSON params
//! value; the registry reconstructs the typed wire call from that pair. It is
//! the single place where application payload encoding and decoding is
//! defined; the session and correlator treat bodies as opaque values.
//!
//! Most calls are covered by [`CommandSpec::passthrough`] (params become the
//! request body, the reply body becomes the result). Calls with a bespoke
//! reply shape install their own decoder.

use crate::correlator::{NotificationDecoder, ReplyDecoder};
use serde_json::{json, Value};
use slink_core::{ReplyFrame, SubscriptionId};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds the request body for a named command and decodes its reply
#[derive(Clone)]
pub struct CommandSpec {
    name: String,
    op: String,
    encode: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
    decode: ReplyDecoder,
}

impl CommandSpec {
    pub fn new(
        name: impl Into<String>,
        op: impl Into<String>,
        encode: impl Fn(&Value) -> Value + Send + Sync + 'static,
        decode: impl Fn(&ReplyFrame) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    /// Params travel as the request body; the reply body is the result
    pub fn passthrough(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self::new(
            name,
            op,
            |params: &Value| params.clone(),
            |reply: &ReplyFrame| Some(reply.body.clone()),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn encode(&self, params: &Value) -> Value {
        (self.encode)(params)
    }

    pub fn decoder(&self) -> ReplyDecoder {
        self.decode.clone()
    }
}

/// Wire shape of one subscription kind
///
/// Knows how to build the subscribe and unsubscribe requests, how to pull
/// the server-assigned id out of the subscribe reply, and how to decode the
/// notifications that follow.
#[derive(Clone)]
pub struct SubscriptionSpec {
    name: String,
    subscribe_op: String,
    unsubscribe_op: String,
    subscribe: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
    unsubscribe: Arc<dyn Fn(&SubscriptionId) -> Value + Send + Sync>,
    subscription_id_from_reply: Arc<dyn Fn(&ReplyFrame) -> Option<SubscriptionId> + Send + Sync>,
    deserialize: NotificationDecoder,
}

impl SubscriptionSpec {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        subscribe_op: impl Into<String>,
        unsubscribe_op: impl Into<String>,
        subscribe: impl Fn(&Value) -> Value + Send + Sync + 'static,
        unsubscribe: impl Fn(&SubscriptionId) -> Value + Send + Sync + 'static,
        subscription_id_from_reply: impl Fn(&ReplyFrame) -> Option<SubscriptionId>
            + Send
            + Sync
            + 'static,
        deserialize: impl Fn(&slink_core::NotificationFrame) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            subscribe_op: subscribe_op.into(),
            unsubscribe_op: unsubscribe_op.into(),
            subscribe: Arc::new(subscribe),
            unsubscribe: Arc::new(unsubscribe),
            subscription_id_from_reply: Arc::new(subscription_id_from_reply),
            deserialize: Arc::new(deserialize),
        }
    }

    /// Conventional shape: params as subscribe body, reply body carrying
    /// `{"subscription_id": ...}`, notification body as the payload
    pub fn passthrough(
        name: impl Into<String>,
        subscribe_op: impl Into<String>,
        unsubscribe_op: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            subscribe_op,
            unsubscribe_op,
            |params: &Value| params.clone(),
            |subscription_id: &SubscriptionId| {
                json!({ "subscription_id": subscription_id.as_str() })
            },
            |reply: &ReplyFrame| {
                reply.body["subscription_id"]
                    .as_str()
                    .map(SubscriptionId::from)
            },
            |notification| Some(notification.body.clone()),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe_op(&self) -> &str {
        &self.subscribe_op
    }

    pub fn unsubscribe_op(&self) -> &str {
        &self.unsubscribe_op
    }

    pub fn subscribe_body(&self, params: &Value) -> Value {
        (self.subscribe)(params)
    }

    pub fn unsubscribe_body(&self, subscription_id: &SubscriptionId) -> Value {
        (self.unsubscribe)(subscription_id)
    }

    pub fn subscription_id_from_reply(&self, reply: &ReplyFrame) -> Option<SubscriptionId> {
        (self.subscription_id_from_reply)(reply)
    }

    pub fn deserializer(&self) -> NotificationDecoder {
        self.deserialize.clone()
    }
}

/// Name-keyed lookup of command and subscription specs
#[derive(Clone, Default)]
pub struct Registry {
    commands: HashMap<String, CommandSpec>,
    subscriptions: HashMap<String, SubscriptionSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_command(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name().to_string(), spec);
    }

    pub fn register_subscription(&mut self, spec: SubscriptionSpec) {
        self.subscriptions.insert(spec.name().to_string(), spec);
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn subscription(&self, name: &str) -> Option<&SubscriptionSpec> {
        self.subscriptions.get(name)
    }
}
