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

use std::time::Duration;

use clap::{Args, Parser};

/// Process-wide controller configuration. Parsed once at startup and shared read-only.
#[derive(Debug, Parser, Clone)]
#[clap(name = "controller", about = "Converges AppIntent resources")]
pub struct ControllerConfig {
    #[clap(flatten)]
    pub keycloak: KeycloakConfig,

    /// Issuer URL used by the generic (bring-your-own) OIDC provider.
    #[clap(long, env = "OIDC_ISSUER_URL")]
    pub oidc_issuer_url: Option<String>,

    /// Scopes requested when an AppIntent does not list any.
    #[clap(
        long,
        env = "DEFAULT_SCOPES",
        value_delimiter = ',',
        default_value = "openid,profile,email"
    )]
    pub default_scopes: Vec<String>,

    /// Gateway that routes attach to unless an AppIntent selects one.
    #[clap(long, env = "GATEWAY_NAME", default_value = "eg")]
    pub gateway_name: String,

    #[clap(long, env = "GATEWAY_NAMESPACE", default_value = "envoy-gateway-system")]
    pub gateway_namespace: String,

    /// Gateway listener terminating TLS with the shared wildcard certificate.
    #[clap(long, default_value = "https")]
    pub https_listener: String,

    /// Gateway listener used when TLS is disabled.
    #[clap(long, default_value = "http")]
    pub http_listener: String,

    /// Domain covered by the shared wildcard certificate, e.g. "apps.example.com".
    #[clap(long, env = "WILDCARD_DOMAIN")]
    pub wildcard_domain: Option<String>,

    #[clap(long, default_value_t = 10)]
    pub provider_timeout_secs: u64,

    #[clap(long, default_value_t = 300)]
    pub requeue_converged_secs: u64,

    #[clap(long, default_value_t = 15)]
    pub requeue_transient_secs: u64,

    #[clap(long, default_value_t = 120)]
    pub requeue_precondition_secs: u64,
}

#[derive(Debug, Args, Clone)]
pub struct KeycloakConfig {
    /// Base URL of the Keycloak admin API. The keycloak provider is unavailable when unset.
    #[clap(long = "keycloak-url", env = "KEYCLOAK_URL")]
    pub url: Option<String>,

    /// Public base URL used for the issuer, if it differs from the admin URL.
    #[clap(long = "keycloak-issuer-url", env = "KEYCLOAK_ISSUER_URL")]
    pub issuer_url: Option<String>,

    /// Realm that application clients are created in.
    #[clap(long = "keycloak-realm", env = "KEYCLOAK_REALM", default_value = "master")]
    pub realm: String,

    #[clap(
        long = "keycloak-admin-realm",
        env = "KEYCLOAK_ADMIN_REALM",
        default_value = "master"
    )]
    pub admin_realm: String,

    #[clap(
        long = "keycloak-admin-client-id",
        env = "KEYCLOAK_ADMIN_CLIENT_ID",
        default_value = "admin-cli"
    )]
    pub admin_client_id: String,

    #[clap(
        long = "keycloak-admin-username",
        env = "KEYCLOAK_ADMIN_USERNAME",
        default_value = "admin"
    )]
    pub admin_username: String,

    #[clap(
        long = "keycloak-admin-password",
        env = "KEYCLOAK_ADMIN_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub admin_password: String,
}

impl ControllerConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn requeue_converged(&self) -> Duration {
        Duration::from_secs(self.requeue_converged_secs)
    }

    pub fn requeue_transient(&self) -> Duration {
        Duration::from_secs(self.requeue_transient_secs)
    }

    pub fn requeue_precondition(&self) -> Duration {
        Duration::from_secs(self.requeue_precondition_secs)
    }
}
