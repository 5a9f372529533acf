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

//! The `AppIntent` custom resource: one application's desired exposure.

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_LOGOUT_PATH, DEFAULT_PROVIDER, DEFAULT_REDIRECT_PATH};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    kind = "AppIntent",
    group = "appintent.io",
    version = "v1alpha1",
    namespaced,
    shortname = "intent",
    status = "AppIntentStatus",
    printcolumn = r#"{"name":"Hostname","type":"string","jsonPath":".spec.hostname"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppIntentSpec {
    /// Hostname the application is exposed on.
    pub hostname: String,
    /// Backend service receiving the traffic.
    pub service: ServiceReference,
    #[serde(default)]
    pub routing: RoutingSpec,
    #[serde(default)]
    pub auth: AuthSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ServiceReference {
    pub name: String,
    pub port: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Path rules; a single `PathPrefix /` rule when empty.
    #[serde(default)]
    pub paths: Vec<PathRule>,
    #[serde(default)]
    pub tls: TlsSpec,
    /// Gateway to attach to; the controller default when unset.
    #[serde(default)]
    pub gateway: Option<GatewaySelector>,
}

impl Default for RoutingSpec {
    fn default() -> Self {
        RoutingSpec {
            enabled: true,
            paths: vec![],
            tls: TlsSpec::default(),
            gateway: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct PathRule {
    pub path: String,
    #[serde(default, rename = "type")]
    pub match_type: PathMatchType,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum PathMatchType {
    #[default]
    PathPrefix,
    Exact,
}

impl PathMatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathMatchType::PathPrefix => "PathPrefix",
            PathMatchType::Exact => "Exact",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct TlsSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: TlsMode,
    /// Certificate issuer for per-host certificates.
    #[serde(default)]
    pub issuer: Option<String>,
}

impl Default for TlsSpec {
    fn default() -> Self {
        TlsSpec {
            enabled: true,
            mode: TlsMode::default(),
            issuer: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum TlsMode {
    /// Terminate with the gateway's shared wildcard certificate.
    #[default]
    Wildcard,
    /// Request a dedicated certificate for the hostname.
    PerHost,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct GatewaySelector {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Requested scopes; the controller defaults when empty.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Create the client in the identity provider instead of expecting a secret.
    #[serde(default)]
    pub provision_client: bool,
    /// Pre-existing secret holding `client-id` and `client-secret`.
    #[serde(default)]
    pub secret_ref: Option<SecretReference>,
    #[serde(default)]
    pub redirect_path: Option<String>,
    #[serde(default)]
    pub logout_path: Option<String>,
}

impl Default for AuthSpec {
    fn default() -> Self {
        AuthSpec {
            enabled: false,
            provider: default_provider(),
            scopes: vec![],
            provision_client: false,
            secret_ref: None,
            redirect_path: None,
            logout_path: None,
        }
    }
}

impl AuthSpec {
    pub fn redirect_path(&self) -> &str {
        self.redirect_path.as_deref().unwrap_or(DEFAULT_REDIRECT_PATH)
    }

    pub fn logout_path(&self) -> &str {
        self.logout_path.as_deref().unwrap_or(DEFAULT_LOGOUT_PATH)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct SecretReference {
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppIntentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub conditions: Vec<metav1::Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_client: Option<ProvisionedClient>,
}

/// An identity-provider client created by the controller, deleted on cleanup.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedClient {
    pub provider: String,
    pub client_id: String,
}

impl AppIntent {
    /// Redirect URL registered with the identity provider.
    pub fn redirect_url(&self) -> String {
        let scheme = if self.spec.routing.tls.enabled {
            "https"
        } else {
            "http"
        };
        format!(
            "{scheme}://{}{}",
            self.spec.hostname,
            self.spec.auth.redirect_path()
        )
    }
}

fn default_true() -> bool {
    true
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}
