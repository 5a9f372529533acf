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

//! Identity providers an AppIntent can authenticate against.
//!
//! A provider is picked by name when a reconcile starts. Each variant
//! derives issuer and client ID from the intent; only some can create
//! clients on demand.

mod generic;
mod keycloak;

use std::sync::Arc;

use kube::ResourceExt;

pub use generic::GenericProvider;
pub use keycloak::KeycloakProvider;

use crate::appintent::AppIntent;
use crate::config::ControllerConfig;
use crate::{Error, Result};

/// Credentials of a client registered with an identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone, Debug)]
pub enum IdentityProvider {
    Keycloak(KeycloakProvider),
    Generic(GenericProvider),
}

impl IdentityProvider {
    /// Name the provider is registered under.
    pub fn name(&self) -> &'static str {
        match self {
            IdentityProvider::Keycloak(_) => "keycloak",
            IdentityProvider::Generic(_) => "generic",
        }
    }

    pub fn supports_provisioning(&self) -> bool {
        match self {
            IdentityProvider::Keycloak(_) => true,
            IdentityProvider::Generic(_) => false,
        }
    }

    /// Registers a client for the intent. Calling it again for the same intent
    /// returns the existing client's credentials.
    pub async fn provision_client(&self, intent: &AppIntent) -> Result<ClientCredentials> {
        match self {
            IdentityProvider::Keycloak(p) => p.provision_client(intent).await,
            IdentityProvider::Generic(_) => {
                Err(Error::ProvisioningUnsupported(self.name().to_string()))
            }
        }
    }

    /// Removes the intent's client. Removing an absent client succeeds.
    pub async fn delete_client(&self, intent: &AppIntent) -> Result<()> {
        match self {
            IdentityProvider::Keycloak(p) => p.delete_client(intent).await,
            IdentityProvider::Generic(_) => Ok(()),
        }
    }

    pub fn issuer_url(&self, intent: &AppIntent) -> Result<String> {
        match self {
            IdentityProvider::Keycloak(p) => Ok(p.issuer_url()),
            IdentityProvider::Generic(p) => p.issuer_url(intent),
        }
    }

    pub fn client_id(&self, intent: &AppIntent) -> String {
        client_id_for(intent)
    }
}

// Deterministic client ID derived from the intent's namespace and name.
pub(crate) fn client_id_for(intent: &AppIntent) -> String {
    format!(
        "{}-{}",
        intent.namespace().unwrap_or_default(),
        intent.name_any()
    )
}

/// Resolves provider names to providers. Holds no per-intent state.
#[derive(Clone)]
pub struct ProviderRegistry {
    config: Arc<ControllerConfig>,
    http: reqwest::Client,
}

impl ProviderRegistry {
    pub fn new(config: Arc<ControllerConfig>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.provider_timeout())
            .build()
            .map_err(|e| Error::InvalidConfigError(format!("http client: {e}")))?;
        Ok(ProviderRegistry { config, http })
    }

    pub fn resolve(&self, name: &str) -> Result<IdentityProvider> {
        match name {
            "keycloak" => {
                let Some(url) = self.config.keycloak.url.clone() else {
                    return Err(Error::InvalidProvider(
                        "keycloak (no Keycloak URL configured)".to_string(),
                    ));
                };
                Ok(IdentityProvider::Keycloak(KeycloakProvider::new(
                    self.http.clone(),
                    url,
                    self.config.keycloak.clone(),
                )))
            }
            "generic" | "oidc" => Ok(IdentityProvider::Generic(GenericProvider::new(
                self.config.oidc_issuer_url.clone(),
            ))),
            other => Err(Error::InvalidProvider(other.to_string())),
        }
    }
}
