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

//! Access to the platform's resource store.
//!
//! Stages only talk to the cluster through these traits so a pass can run
//! against either the Kubernetes API ([`KubeStore`]) or an in-memory store.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use gateway_api::apis::standard::gateways::Gateway;
use k8s_openapi::api::core::v1::{Namespace, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::appintent::{AppIntent, AppIntentStatus};
use crate::consts::FIELD_MANAGER;
use crate::{Error, Result};

/// Read and write access to the AppIntent objects themselves.
#[async_trait]
pub trait IntentClient: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<AppIntent>>;

    /// Writes the status, failing with a conflict if the intent's resourceVersion is stale.
    async fn patch_status(&self, intent: &AppIntent, status: &AppIntentStatus)
        -> Result<AppIntent>;

    /// Replaces the finalizer list, failing with a conflict if the intent's resourceVersion is stale.
    async fn set_finalizers(&self, intent: &AppIntent, finalizers: Vec<String>)
        -> Result<AppIntent>;
}

/// Read-only lookups used to validate preconditions.
#[async_trait]
pub trait ClusterLookup: Send + Sync {
    /// Labels of the namespace, or None if it does not exist.
    async fn namespace_labels(&self, name: &str) -> Result<Option<BTreeMap<String, String>>>;

    /// Ports exposed by the service, or None if it does not exist.
    async fn service_ports(&self, namespace: &str, name: &str) -> Result<Option<Vec<i32>>>;

    async fn gateway_exists(&self, namespace: &str, name: &str) -> Result<bool>;
}

/// Create/read/update/delete for one kind of namespaced object.
#[async_trait]
pub trait ObjectClient<K>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Replaces the object. The object's resourceVersion guards against concurrent edits.
    async fn replace(&self, namespace: &str, name: &str, obj: &K) -> Result<K>;

    /// Deletes the object; deleting an absent object succeeds.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        KubeStore { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

// Returns true if the provided error is a not found error.
pub fn check_if_not_found_err(error: &kube::Error) -> bool {
    matches!(
        error,
        kube::Error::Api(kube::core::ErrorResponse { code: 404, .. })
    )
}

#[async_trait]
impl IntentClient for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<AppIntent>> {
        let api: Api<AppIntent> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(Error::KubeError)
    }

    async fn patch_status(
        &self,
        intent: &AppIntent,
        status: &AppIntentStatus,
    ) -> Result<AppIntent> {
        let (namespace, name) = intent_key(intent)?;
        let api: Api<AppIntent> = Api::namespaced(self.client.clone(), &namespace);
        let patch = Patch::Merge(json!({
            "metadata": {
                "resourceVersion": intent.metadata.resource_version,
            },
            "status": status,
        }));
        api.patch_status(&name, &PatchParams::default(), &patch)
            .await
            .map_err(Error::KubeError)
    }

    async fn set_finalizers(
        &self,
        intent: &AppIntent,
        finalizers: Vec<String>,
    ) -> Result<AppIntent> {
        let (namespace, name) = intent_key(intent)?;
        let api: Api<AppIntent> = Api::namespaced(self.client.clone(), &namespace);
        let patch = Patch::Merge(json!({
            "metadata": {
                "resourceVersion": intent.metadata.resource_version,
                "finalizers": finalizers,
            },
        }));
        api.patch(&name, &PatchParams::default(), &patch)
            .await
            .map_err(Error::KubeError)
    }
}

#[async_trait]
impl ClusterLookup for KubeStore {
    async fn namespace_labels(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = api.get_opt(name).await.map_err(Error::KubeError)?;
        Ok(namespace.map(|ns| ns.metadata.labels.unwrap_or_default()))
    }

    async fn service_ports(&self, namespace: &str, name: &str) -> Result<Option<Vec<i32>>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = api.get_opt(name).await.map_err(Error::KubeError)?;
        Ok(service.map(|svc| {
            svc.spec
                .and_then(|spec| spec.ports)
                .unwrap_or_default()
                .iter()
                .map(|port| port.port)
                .collect()
        }))
    }

    async fn gateway_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), namespace);
        let gateway = api.get_opt(name).await.map_err(Error::KubeError)?;
        Ok(gateway.is_some())
    }
}

#[async_trait]
impl<K> ObjectClient<K> for KubeStore
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(Error::KubeError)
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), obj)
            .await
            .map_err(Error::KubeError)
    }

    async fn replace(&self, namespace: &str, name: &str, obj: &K) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &Self::post_params(), obj)
            .await
            .map_err(Error::KubeError)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) if check_if_not_found_err(&err) => Ok(()),
            Err(err) => Err(Error::KubeError(err)),
        }
    }
}

pub(crate) fn intent_key(intent: &AppIntent) -> Result<(String, String)> {
    let namespace = intent
        .metadata
        .namespace
        .clone()
        .ok_or(Error::InvalidConfigError("invalid namespace".to_string()))?;
    let name = intent
        .metadata
        .name
        .clone()
        .ok_or(Error::InvalidConfigError("invalid name".to_string()))?;
    Ok((namespace, name))
}
