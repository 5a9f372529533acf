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

//! Idempotent create-or-update of resources owned by an AppIntent.
//!
//! [`sync`] is the only way stages write owned resources: it fetches the object
//! under its deterministic name, applies the caller's mutation to a copy and
//! only writes when the mutation changed something. Write conflicts are
//! retried against a fresh copy.

use std::fmt::Debug;

use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::{core::ObjectMeta, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::*;

use crate::appintent::AppIntent;
use crate::consts::{CONTROLLER_NAME, INTENT_LABEL, MANAGED_BY_LABEL};
use crate::securitypolicy::{SecurityPolicy, SecurityPolicySpec};
use crate::store::ObjectClient;
use crate::{Error, Result};

const MAX_SYNC_ATTEMPTS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

impl SyncOutcome {
    /// True if the pass wrote to the cluster.
    pub fn changed(&self) -> bool {
        !matches!(self, SyncOutcome::Unchanged)
    }
}

/// A namespaced kind the controller can own.
pub trait Owned:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// An object of this kind with nothing but its name and namespace set.
    fn empty(namespace: &str, name: &str) -> Result<Self>;
}

impl Owned for HTTPRoute {
    fn empty(namespace: &str, name: &str) -> Result<Self> {
        Ok(serde_json::from_value(json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "HTTPRoute",
            "metadata": { "name": name, "namespace": namespace },
            "spec": {},
        }))?)
    }
}

impl Owned for SecurityPolicy {
    fn empty(namespace: &str, name: &str) -> Result<Self> {
        let mut policy = SecurityPolicy::new(name, SecurityPolicySpec::default());
        policy.metadata.namespace = Some(namespace.to_string());
        Ok(policy)
    }
}

impl Owned for Secret {
    fn empty(namespace: &str, name: &str) -> Result<Self> {
        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }
}

/// Creates or updates the named object so that it is owned by `owner` and
/// reflects `mutate`.
///
/// Returns the object as stored in the cluster and what was done to it. An
/// unchanged object costs one read and no writes.
pub async fn sync<K, F>(
    client: &dyn ObjectClient<K>,
    owner: &AppIntent,
    name: &str,
    mutate: F,
) -> Result<(K, SyncOutcome)>
where
    K: Owned,
    F: Fn(&mut K) -> Result<()> + Send + Sync,
{
    let kind = K::kind(&()).to_string();
    let namespace = owner
        .namespace()
        .ok_or(Error::InvalidConfigError("invalid namespace".to_string()))?;
    let owner_ref = owner
        .controller_owner_ref(&())
        .ok_or(Error::InvalidConfigError("owner has no uid".to_string()))?;

    for attempt in 1..=MAX_SYNC_ATTEMPTS {
        let result = match client.get(&namespace, name).await? {
            None => {
                let mut obj = K::empty(&namespace, name)?;
                adopt(&mut obj, owner, &owner_ref);
                mutate(&mut obj)?;
                client
                    .create(&namespace, &obj)
                    .await
                    .map(|created| (created, SyncOutcome::Created))
            }
            Some(current) => {
                if let Some(other) = foreign_controller(&current, &owner_ref) {
                    warn!(
                        "{} {}/{} is controlled by {}, refusing to take it over",
                        kind, namespace, name, other
                    );
                    return Err(Error::ForeignOwner {
                        kind,
                        name: name.to_string(),
                    });
                }
                let mut desired = current.clone();
                adopt(&mut desired, owner, &owner_ref);
                mutate(&mut desired)?;
                if serde_json::to_value(&desired)? == serde_json::to_value(&current)? {
                    debug!("{} {}/{} is up to date", kind, namespace, name);
                    return Ok((current, SyncOutcome::Unchanged));
                }
                client
                    .replace(&namespace, name, &desired)
                    .await
                    .map(|updated| (updated, SyncOutcome::Updated))
            }
        };

        match result {
            Ok((obj, outcome)) => {
                info!("{:?} {} {}/{}", outcome, kind, namespace, name);
                return Ok((obj, outcome));
            }
            Err(err) if err.is_conflict() => {
                debug!(
                    "conflict writing {} {}/{} (attempt {}), retrying",
                    kind, namespace, name, attempt
                );
            }
            Err(err) => return Err(err),
        }
    }

    Err(Error::ConflictRetriesExhausted {
        kind,
        name: name.to_string(),
    })
}

/// Deletes the named object if it exists and is owned by `owner`.
///
/// Returns true if something was deleted.
pub async fn prune<K: Owned>(
    client: &dyn ObjectClient<K>,
    owner: &AppIntent,
    name: &str,
) -> Result<bool> {
    let namespace = owner
        .namespace()
        .ok_or(Error::InvalidConfigError("invalid namespace".to_string()))?;
    let Some(current) = client.get(&namespace, name).await? else {
        return Ok(false);
    };
    let owned = owner.uid().is_some_and(|uid| {
        current
            .owner_references()
            .iter()
            .any(|reference| reference.uid == uid)
    });
    if !owned {
        debug!(
            "not pruning {} {}/{}: not owned by this intent",
            K::kind(&()),
            namespace,
            name
        );
        return Ok(false);
    }
    client.delete(&namespace, name).await?;
    info!("pruned {} {}/{}", K::kind(&()), namespace, name);
    Ok(true)
}

// Sets the owner reference and the ownership labels on the object.
fn adopt<K: Resource>(obj: &mut K, owner: &AppIntent, owner_ref: &OwnerReference) {
    let meta = obj.meta_mut();
    let references = meta.owner_references.get_or_insert_with(Vec::new);
    match references.iter_mut().find(|r| r.uid == owner_ref.uid) {
        Some(existing) => *existing = owner_ref.clone(),
        None => references.push(owner_ref.clone()),
    }

    let labels = meta.labels.get_or_insert_with(Default::default);
    labels.insert(MANAGED_BY_LABEL.to_string(), CONTROLLER_NAME.to_string());
    labels.insert(INTENT_LABEL.to_string(), owner.name_any());
}

// Returns the name of a different controlling owner, if any.
fn foreign_controller<K: Resource>(obj: &K, owner_ref: &OwnerReference) -> Option<String> {
    obj.owner_references()
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner_ref.uid)
        .map(|r| format!("{} {}", r.kind, r.name))
}
