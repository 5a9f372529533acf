/*
Copyright 2025 The Kubernetes Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use async_trait::async_trait;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource,
};
use tracing::*;

use crate::appintent::AppIntent;
use crate::consts::CONTROLLER_NAME;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentEvent {
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
    pub action: String,
}

impl IntentEvent {
    pub fn normal(reason: &str, action: &str, message: impl Into<String>) -> Self {
        IntentEvent {
            kind: EventKind::Normal,
            reason: reason.to_string(),
            message: message.into(),
            action: action.to_string(),
        }
    }

    pub fn warning(reason: &str, action: &str, message: impl Into<String>) -> Self {
        IntentEvent {
            kind: EventKind::Warning,
            reason: reason.to_string(),
            message: message.into(),
            action: action.to_string(),
        }
    }
}

/// Best-effort notifications about an intent. Publishing never fails a reconcile.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, intent: &AppIntent, event: IntentEvent);
}

/// Publishes Kubernetes Events on a background task.
pub struct KubeEvents {
    client: Client,
    reporter: Reporter,
}

impl KubeEvents {
    pub fn new(client: Client) -> Self {
        KubeEvents {
            client,
            reporter: Reporter {
                controller: CONTROLLER_NAME.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventSink for KubeEvents {
    async fn publish(&self, intent: &AppIntent, event: IntentEvent) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            intent.object_ref(&()),
        );
        let type_ = match event.kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        tokio::spawn(async move {
            let reason = event.reason.clone();
            if let Err(err) = recorder
                .publish(Event {
                    type_,
                    reason: event.reason,
                    note: Some(event.message),
                    action: event.action,
                    secondary: None,
                })
                .await
            {
                warn!("failed to publish {} event: {}", reason, err);
            }
        });
    }
}
