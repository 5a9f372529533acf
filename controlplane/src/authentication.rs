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

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use tracing::*;

use crate::appintent::{AppIntent, AppIntentStatus, ProvisionedClient};
use crate::consts::*;
use crate::events::IntentEvent;
use crate::providers::{ClientCredentials, IdentityProvider};
use crate::securitypolicy::{
    Oidc, OidcProvider, PolicyTargetReference, SecretObjectReference, SecurityPolicy,
};
use crate::store::intent_key;
use crate::sync::{prune, sync, SyncOutcome};
use crate::{Context, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    Disabled,
    Configured(SyncOutcome),
}

/// A failed authentication step: the condition reason naming the step, and the
/// error that decides how the intent is retried.
#[derive(Debug)]
pub struct AuthFailure {
    pub reason: &'static str,
    pub error: Error,
}

impl AuthFailure {
    fn at(reason: &'static str) -> impl FnOnce(Error) -> AuthFailure {
        move |error| AuthFailure { reason, error }
    }
}

pub async fn reconcile_auth(
    intent: &AppIntent,
    ctx: &Context,
    status: &mut AppIntentStatus,
) -> Result<AuthOutcome, AuthFailure> {
    let (ns, name) = intent_key(intent).map_err(AuthFailure::at(REASON_SECURITY_POLICY_FAILED))?;
    let policy_name = owned_name(&name, SECURITY_POLICY_SUFFIX);
    let auth = &intent.spec.auth;

    if !auth.enabled {
        if prune(ctx.policies.as_ref(), intent, &policy_name)
            .await
            .map_err(AuthFailure::at(REASON_SECURITY_POLICY_FAILED))?
        {
            ctx.events
                .publish(
                    intent,
                    IntentEvent::normal(
                        "SecurityPolicyDeleted",
                        "Delete",
                        format!("deleted SecurityPolicy {policy_name}"),
                    ),
                )
                .await;
        }
        status.client_secret_name = None;
        status.client_secret_namespace = None;
        return Ok(AuthOutcome::Disabled);
    }

    if !intent.spec.routing.enabled {
        return Err(AuthFailure {
            reason: REASON_SECURITY_POLICY_FAILED,
            error: Error::InvalidConfigError(
                "authentication requires routing to be enabled".to_string(),
            ),
        });
    }

    let provider = ctx
        .providers
        .resolve(&auth.provider)
        .map_err(AuthFailure::at(REASON_INVALID_PROVIDER))?;

    let secret_name = if auth.provision_client {
        let secret_name = owned_name(&name, CLIENT_SECRET_SUFFIX);
        ensure_client(intent, ctx, &provider, &secret_name, status)
            .await
            .map_err(AuthFailure::at(REASON_PROVISIONING_FAILED))?;
        secret_name
    } else {
        auth.secret_ref
            .as_ref()
            .map(|secret_ref| secret_ref.name.clone())
            .ok_or_else(|| AuthFailure {
                reason: REASON_VALIDATION_FAILED,
                error: Error::InvalidSecret(
                    String::new(),
                    "secretRef is required unless provisionClient is set".to_string(),
                ),
            })?
    };

    let client_id = validate_secret(ctx, &ns, &secret_name)
        .await
        .map_err(AuthFailure::at(REASON_VALIDATION_FAILED))?;
    status.client_secret_name = Some(secret_name.clone());
    status.client_secret_namespace = Some(ns.clone());

    let outcome = sync_policy(intent, ctx, &provider, &policy_name, &secret_name, &client_id)
        .await
        .map_err(AuthFailure::at(REASON_SECURITY_POLICY_FAILED))?;

    Ok(AuthOutcome::Configured(outcome))
}

// Provisions the intent's client unless the owned secret already holds its
// credentials, then stores the credentials in that secret.
async fn ensure_client(
    intent: &AppIntent,
    ctx: &Context,
    provider: &IdentityProvider,
    secret_name: &str,
    status: &mut AppIntentStatus,
) -> Result<()> {
    if !provider.supports_provisioning() {
        return Err(Error::ProvisioningUnsupported(provider.name().to_string()));
    }
    let (ns, _) = intent_key(intent)?;
    let client_id = provider.client_id(intent);

    let existing = ctx.secrets.get(&ns, secret_name).await?;
    if existing
        .as_ref()
        .is_some_and(|secret| holds_client(secret, &client_id))
    {
        debug!("client {} already provisioned, secret {} is current", client_id, secret_name);
        status.provisioned_client.get_or_insert_with(|| ProvisionedClient {
            provider: provider.name().to_string(),
            client_id,
        });
        return Ok(());
    }

    let credentials = provider.provision_client(intent).await?;
    info!("provisioned {} client {}", provider.name(), credentials.client_id);
    status.provisioned_client = Some(ProvisionedClient {
        provider: provider.name().to_string(),
        client_id: credentials.client_id.clone(),
    });
    ctx.events
        .publish(
            intent,
            IntentEvent::normal(
                "ClientProvisioned",
                "Provision",
                format!("provisioned {} client {}", provider.name(), credentials.client_id),
            ),
        )
        .await;

    sync(ctx.secrets.as_ref(), intent, secret_name, |secret: &mut Secret| {
        write_credentials(secret, &credentials);
        Ok(())
    })
    .await?;
    Ok(())
}

fn write_credentials(secret: &mut Secret, credentials: &ClientCredentials) {
    secret
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(CLIENT_ID_ANNOTATION.to_string(), credentials.client_id.clone());
    secret.type_ = Some("Opaque".to_string());
    secret.string_data = None;
    secret.data = Some(BTreeMap::from([
        (
            CLIENT_ID_KEY.to_string(),
            ByteString(credentials.client_id.clone().into_bytes()),
        ),
        (
            CLIENT_SECRET_KEY.to_string(),
            ByteString(credentials.client_secret.clone().into_bytes()),
        ),
    ]));
}

// True if the secret was written for `client_id` and still holds both keys.
fn holds_client(secret: &Secret, client_id: &str) -> bool {
    let annotated = secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(CLIENT_ID_ANNOTATION))
        .is_some_and(|value| value == client_id);
    annotated
        && secret_value(secret, CLIENT_ID_KEY).is_some()
        && secret_value(secret, CLIENT_SECRET_KEY).is_some()
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    let from_data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|value| String::from_utf8(value.0.clone()).ok());
    let from_string_data = || {
        secret
            .string_data
            .as_ref()
            .and_then(|data| data.get(key))
            .cloned()
    };
    from_data
        .or_else(from_string_data)
        .filter(|value| !value.is_empty())
}

// Checks that the client secret exists and holds both credentials. Returns the client ID.
async fn validate_secret(ctx: &Context, namespace: &str, name: &str) -> Result<String> {
    let secret = ctx
        .secrets
        .get(namespace, name)
        .await?
        .ok_or_else(|| Error::InvalidSecret(name.to_string(), "not found".to_string()))?;
    if secret_value(&secret, CLIENT_SECRET_KEY).is_none() {
        return Err(Error::InvalidSecret(
            name.to_string(),
            format!("missing key {CLIENT_SECRET_KEY}"),
        ));
    }
    secret_value(&secret, CLIENT_ID_KEY)
        .ok_or_else(|| Error::InvalidSecret(name.to_string(), format!("missing key {CLIENT_ID_KEY}")))
}

async fn sync_policy(
    intent: &AppIntent,
    ctx: &Context,
    provider: &IdentityProvider,
    policy_name: &str,
    secret_name: &str,
    client_id: &str,
) -> Result<SyncOutcome> {
    let (ns, name) = intent_key(intent)?;
    let auth = &intent.spec.auth;
    let scopes = if auth.scopes.is_empty() {
        ctx.config.default_scopes.clone()
    } else {
        auth.scopes.clone()
    };
    let oidc = Oidc {
        provider: OidcProvider {
            issuer: provider.issuer_url(intent)?,
        },
        client_id: client_id.to_string(),
        client_secret: SecretObjectReference::secret(secret_name),
        scopes,
        redirect_url: Some(intent.redirect_url()),
        logout_path: Some(auth.logout_path().to_string()),
    };
    let target = PolicyTargetReference {
        group: "gateway.networking.k8s.io".to_string(),
        kind: "HTTPRoute".to_string(),
        name: owned_name(&name, ROUTE_SUFFIX),
    };

    let (_, outcome) = sync(ctx.policies.as_ref(), intent, policy_name, |policy: &mut SecurityPolicy| {
        policy.spec.target_refs = vec![target.clone()];
        policy.spec.oidc = Some(oidc.clone());
        Ok(())
    })
    .await?;

    let (reason, action) = match outcome {
        SyncOutcome::Created => ("SecurityPolicyCreated", "Create"),
        SyncOutcome::Updated => ("SecurityPolicyUpdated", "Update"),
        SyncOutcome::Unchanged => return Ok(outcome),
    };
    ctx.events
        .publish(
            intent,
            IntentEvent::normal(reason, action, format!("{reason}: {ns}/{policy_name}")),
        )
        .await;
    Ok(outcome)
}
