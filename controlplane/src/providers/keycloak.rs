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

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::*;

use super::{client_id_for, ClientCredentials};
use crate::appintent::AppIntent;
use crate::config::KeycloakConfig;
use crate::{Error, Result};

/// Manages confidential clients through the Keycloak admin REST API.
#[derive(Clone, Debug)]
pub struct KeycloakProvider {
    http: reqwest::Client,
    base_url: String,
    config: KeycloakConfig,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientRepresentation {
    id: String,
    client_id: String,
}

#[derive(Deserialize)]
struct ClientSecretRepresentation {
    value: Option<String>,
}

impl KeycloakProvider {
    pub fn new(http: reqwest::Client, base_url: String, config: KeycloakConfig) -> Self {
        KeycloakProvider {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        }
    }

    pub fn issuer_url(&self) -> String {
        let base = self
            .config
            .issuer_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .unwrap_or(&self.base_url);
        format!("{}/realms/{}", base, self.config.realm)
    }

    pub async fn provision_client(&self, intent: &AppIntent) -> Result<ClientCredentials> {
        let token = self.token().await?;
        let client_id = client_id_for(intent);
        let redirect_url = intent.redirect_url();
        let origin = redirect_url
            .strip_suffix(intent.spec.auth.redirect_path())
            .unwrap_or(&redirect_url)
            .to_string();

        let response = self
            .http
            .post(self.clients_url())
            .bearer_auth(&token)
            .json(&json!({
                "clientId": client_id,
                "name": client_id,
                "enabled": true,
                "protocol": "openid-connect",
                "publicClient": false,
                "standardFlowEnabled": true,
                "directAccessGrantsEnabled": false,
                "redirectUris": [redirect_url],
                "webOrigins": [origin],
            }))
            .send()
            .await
            .map_err(request_error)?;

        match response.status() {
            status if status.is_success() => {
                info!("created keycloak client {} in realm {}", client_id, self.config.realm)
            }
            StatusCode::CONFLICT => debug!("keycloak client {} already exists", client_id),
            _ => return Err(rejected(response).await),
        }

        let client = self.find_client(&token, &client_id).await?.ok_or_else(|| {
            Error::ProviderUnavailable(format!("client {client_id} not found after creation"))
        })?;

        let secret: ClientSecretRepresentation = check(
            self.http
                .get(format!("{}/{}/client-secret", self.clients_url(), client.id))
                .bearer_auth(&token)
                .send()
                .await
                .map_err(request_error)?,
        )
        .await?
        .json()
        .await
        .map_err(request_error)?;

        let client_secret = secret.value.filter(|v| !v.is_empty()).ok_or_else(|| {
            Error::ProviderRejected {
                status: StatusCode::OK.as_u16(),
                message: format!("client {client_id} has no secret"),
            }
        })?;

        Ok(ClientCredentials {
            client_id: client.client_id,
            client_secret,
        })
    }

    pub async fn delete_client(&self, intent: &AppIntent) -> Result<()> {
        let token = self.token().await?;
        let client_id = client_id_for(intent);
        let Some(client) = self.find_client(&token, &client_id).await? else {
            debug!("keycloak client {} already absent", client_id);
            return Ok(());
        };

        let response = self
            .http
            .delete(format!("{}/{}", self.clients_url(), client.id))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(request_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await?;
        info!("deleted keycloak client {} from realm {}", client_id, self.config.realm);
        Ok(())
    }

    async fn token(&self) -> Result<String> {
        let url = format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.base_url, self.config.admin_realm
        );
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", self.config.admin_client_id.as_str()),
                ("username", self.config.admin_username.as_str()),
                ("password", self.config.admin_password.as_str()),
            ])
            .send()
            .await
            .map_err(request_error)?;
        let token: TokenResponse = check(response)
            .await?
            .json()
            .await
            .map_err(request_error)?;
        Ok(token.access_token)
    }

    async fn find_client(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<Option<ClientRepresentation>> {
        let response = self
            .http
            .get(self.clients_url())
            .query(&[("clientId", client_id)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(request_error)?;
        let clients: Vec<ClientRepresentation> = check(response)
            .await?
            .json()
            .await
            .map_err(request_error)?;
        Ok(clients.into_iter().find(|c| c.client_id == client_id))
    }

    fn clients_url(&self) -> String {
        format!("{}/admin/realms/{}/clients", self.base_url, self.config.realm)
    }
}

fn request_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::ProviderTimeout(err.to_string())
    } else {
        Error::ProviderUnavailable(err.to_string())
    }
}

async fn check(response: Response) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(rejected(response).await)
    }
}

// Server errors and rate limiting are worth retrying soon; anything else needs a human.
async fn rejected(response: Response) -> Error {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Error::ProviderUnavailable(format!("{status}: {message}"))
    } else {
        Error::ProviderRejected {
            status: status.as_u16(),
            message,
        }
    }
}
