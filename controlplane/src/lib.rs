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

use std::sync::Arc;

use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use thiserror::Error;

pub use appintent_controller::{controller as appintent_controller, error_policy, reconcile};

pub mod appintent;
mod appintent_controller;
mod authentication;
pub mod conditions;
pub mod config;
pub mod consts;
pub mod events;
pub mod providers;
mod routing;
pub mod securitypolicy;
pub mod store;
pub mod sync;
pub mod traits;
mod validation;

#[cfg(test)]
mod testing;

use config::ControllerConfig;
use events::{EventSink, KubeEvents};
use providers::ProviderRegistry;
use securitypolicy::SecurityPolicy;
use store::{ClusterLookup, IntentClient, KubeStore, ObjectClient};

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Immutable controller configuration, loaded once at startup.
    pub config: Arc<ControllerConfig>,
    pub intents: Arc<dyn IntentClient>,
    pub cluster: Arc<dyn ClusterLookup>,
    pub routes: Arc<dyn ObjectClient<HTTPRoute>>,
    pub policies: Arc<dyn ObjectClient<SecurityPolicy>>,
    pub secrets: Arc<dyn ObjectClient<Secret>>,
    pub events: Arc<dyn EventSink>,
    pub providers: ProviderRegistry,
}

impl Context {
    /// Builds a context backed by the Kubernetes API.
    pub fn new(client: Client, config: ControllerConfig) -> Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(KubeStore::new(client.clone()));
        Ok(Context {
            providers: ProviderRegistry::new(config.clone())?,
            config,
            intents: store.clone(),
            cluster: store.clone(),
            routes: store.clone(),
            policies: store.clone(),
            secrets: store,
            events: Arc::new(KubeEvents::new(client)),
        })
    }
}

/// How an error should be retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Permanent until someone changes external state.
    Precondition,
    /// Expected to resolve itself.
    Transient,
    /// The identity provider rejected a request.
    Provider,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[source] kube::Error),
    #[error("invalid configuration: `{0}`")]
    InvalidConfigError(String),
    #[error("error querying AppIntent CRD: `{0}`; is the CRD installed?")]
    CRDNotFoundError(#[source] kube::Error),
    #[error("namespace {0} is not opted in to AppIntent management")]
    NamespaceNotOptedIn(String),
    #[error("service {namespace}/{name} not found")]
    ServiceNotFound { namespace: String, name: String },
    #[error("service {namespace}/{name} does not expose port {port}")]
    ServicePortNotFound {
        namespace: String,
        name: String,
        port: i32,
    },
    #[error("gateway {namespace}/{name} not found")]
    GatewayNotFound { namespace: String, name: String },
    #[error("unsupported TLS configuration: {0}")]
    UnsupportedTlsMode(String),
    #[error("{kind} {name} is controlled by another owner")]
    ForeignOwner { kind: String, name: String },
    #[error("gave up writing {kind} {name} after repeated conflicts")]
    ConflictRetriesExhausted { kind: String, name: String },
    #[error("unknown identity provider: `{0}`")]
    InvalidProvider(String),
    #[error("identity provider {0} does not support client provisioning")]
    ProvisioningUnsupported(String),
    #[error("client secret {0} is invalid: {1}")]
    InvalidSecret(String, String),
    #[error("identity provider request timed out: {0}")]
    ProviderTimeout(String),
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("identity provider rejected request ({status}): {message}")]
    ProviderRejected { status: u16, message: String },
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::KubeError(_)
            | Error::CRDNotFoundError(_)
            | Error::GatewayNotFound { .. }
            | Error::ConflictRetriesExhausted { .. }
            | Error::ProviderTimeout(_)
            | Error::ProviderUnavailable(_) => ErrorClass::Transient,
            Error::ProviderRejected { .. } => ErrorClass::Provider,
            Error::InvalidConfigError(_)
            | Error::NamespaceNotOptedIn(_)
            | Error::ServiceNotFound { .. }
            | Error::ServicePortNotFound { .. }
            | Error::UnsupportedTlsMode(_)
            | Error::ForeignOwner { .. }
            | Error::InvalidProvider(_)
            | Error::ProvisioningUnsupported(_)
            | Error::InvalidSecret(..)
            | Error::SerializationError(_) => ErrorClass::Precondition,
        }
    }

    /// Condition reason describing this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::KubeError(_) | Error::CRDNotFoundError(_) => "APIError",
            Error::InvalidConfigError(_) | Error::SerializationError(_) => "InvalidConfig",
            Error::NamespaceNotOptedIn(_) => consts::REASON_NAMESPACE_NOT_OPTED_IN,
            Error::ServiceNotFound { .. } | Error::ServicePortNotFound { .. } => {
                consts::REASON_SERVICE_NOT_FOUND
            }
            Error::GatewayNotFound { .. } => consts::REASON_GATEWAY_NOT_FOUND,
            Error::UnsupportedTlsMode(_) => consts::REASON_UNSUPPORTED_TLS_MODE,
            Error::ForeignOwner { .. } => "ForeignOwner",
            Error::ConflictRetriesExhausted { .. } => "Conflict",
            Error::InvalidProvider(_) => consts::REASON_INVALID_PROVIDER,
            Error::ProvisioningUnsupported(_) => consts::REASON_PROVISIONING_FAILED,
            Error::InvalidSecret(..) => consts::REASON_VALIDATION_FAILED,
            Error::ProviderTimeout(_) => "ProviderTimeout",
            Error::ProviderUnavailable(_) => "ProviderUnavailable",
            Error::ProviderRejected { .. } => "ProviderRejected",
        }
    }

    pub(crate) fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::KubeError(kube::Error::Api(kube::core::ErrorResponse { code: 409, .. }))
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespacedName {
    pub name: String,
    pub namespace: String,
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
