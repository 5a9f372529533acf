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

use gateway_api::apis::standard::httproutes::{HTTPRoute, HTTPRouteSpec};
use serde_json::json;
use tracing::*;

use crate::appintent::{AppIntent, AppIntentStatus, PathRule, TlsMode};
use crate::config::ControllerConfig;
use crate::consts::{owned_name, ROUTE_SUFFIX};
use crate::events::IntentEvent;
use crate::store::intent_key;
use crate::sync::{prune, sync, SyncOutcome};
use crate::{Context, Error, NamespacedName, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingOutcome {
    Synced(SyncOutcome),
    Disabled,
}

// Ensures the intent's HTTPRoute forwards its hostname to the backend service
// through the selected gateway.
pub async fn reconcile_routing(
    intent: &AppIntent,
    ctx: &Context,
    status: &mut AppIntentStatus,
) -> Result<RoutingOutcome> {
    let (ns, name) = intent_key(intent)?;
    let route_name = owned_name(&name, ROUTE_SUFFIX);

    if !intent.spec.routing.enabled {
        if prune(ctx.routes.as_ref(), intent, &route_name).await? {
            ctx.events
                .publish(
                    intent,
                    IntentEvent::normal("RouteDeleted", "Delete", format!("deleted HTTPRoute {route_name}")),
                )
                .await;
        }
        status.route_name = None;
        return Ok(RoutingOutcome::Disabled);
    }

    check_tls(intent, &ctx.config)?;

    let gateway = gateway_for(intent, &ctx.config);
    if !ctx
        .cluster
        .gateway_exists(&gateway.namespace, &gateway.name)
        .await?
    {
        return Err(Error::GatewayNotFound {
            namespace: gateway.namespace,
            name: gateway.name,
        });
    }

    let desired = desired_route_spec(intent, &ctx.config)?;
    let (_, outcome) = sync(ctx.routes.as_ref(), intent, &route_name, |route: &mut HTTPRoute| {
        route.spec = desired.clone();
        Ok(())
    })
    .await?;

    match outcome {
        SyncOutcome::Created => {
            ctx.events
                .publish(
                    intent,
                    IntentEvent::normal("RouteCreated", "Create", format!("created HTTPRoute {ns}/{route_name}")),
                )
                .await
        }
        SyncOutcome::Updated => {
            ctx.events
                .publish(
                    intent,
                    IntentEvent::normal("RouteUpdated", "Update", format!("updated HTTPRoute {ns}/{route_name}")),
                )
                .await
        }
        SyncOutcome::Unchanged => debug!("route {}/{} already converged", ns, route_name),
    }

    status.route_name = Some(route_name);
    Ok(RoutingOutcome::Synced(outcome))
}

// Per-host certificates are not issued by this controller; only the shared wildcard
// certificate is supported, and it must cover the hostname when a domain is configured.
fn check_tls(intent: &AppIntent, config: &ControllerConfig) -> Result<()> {
    let tls = &intent.spec.routing.tls;
    if !tls.enabled {
        return Ok(());
    }
    if tls.mode == TlsMode::PerHost {
        return Err(Error::UnsupportedTlsMode(format!(
            "per-host certificates are not supported for {}; use the Wildcard mode",
            intent.spec.hostname
        )));
    }
    if let Some(domain) = &config.wildcard_domain {
        let covered = intent
            .spec
            .hostname
            .strip_suffix(domain.as_str())
            .and_then(|prefix| prefix.strip_suffix('.'))
            .is_some_and(|label| !label.is_empty() && !label.contains('.'));
        if !covered {
            return Err(Error::UnsupportedTlsMode(format!(
                "hostname {} is not covered by the wildcard certificate for *.{}",
                intent.spec.hostname, domain
            )));
        }
    }
    Ok(())
}

fn gateway_for(intent: &AppIntent, config: &ControllerConfig) -> NamespacedName {
    match &intent.spec.routing.gateway {
        Some(selector) => NamespacedName {
            name: selector.name.clone(),
            namespace: selector
                .namespace
                .clone()
                .unwrap_or_else(|| config.gateway_namespace.clone()),
        },
        None => NamespacedName {
            name: config.gateway_name.clone(),
            namespace: config.gateway_namespace.clone(),
        },
    }
}

// Builds the route spec with every Gateway API default spelled out, so the object
// read back from the API server compares equal to what was written.
pub fn desired_route_spec(intent: &AppIntent, config: &ControllerConfig) -> Result<HTTPRouteSpec> {
    let routing = &intent.spec.routing;
    let gateway = gateway_for(intent, config);
    let listener = if routing.tls.enabled {
        &config.https_listener
    } else {
        &config.http_listener
    };

    let default_rule = [PathRule {
        path: "/".to_string(),
        match_type: Default::default(),
    }];
    let paths = if routing.paths.is_empty() {
        &default_rule[..]
    } else {
        &routing.paths[..]
    };
    let matches: Vec<_> = paths
        .iter()
        .map(|rule| {
            json!({
                "path": {
                    "type": rule.match_type.as_str(),
                    "value": rule.path,
                }
            })
        })
        .collect();

    let mut parent_ref = json!({
        "group": "gateway.networking.k8s.io",
        "kind": "Gateway",
        "name": gateway.name,
        "namespace": gateway.namespace,
    });
    if !listener.is_empty() {
        parent_ref["sectionName"] = json!(listener);
    }

    Ok(serde_json::from_value(json!({
        "hostnames": [intent.spec.hostname],
        "parentRefs": [parent_ref],
        "rules": [{
            "matches": matches,
            "backendRefs": [{
                "group": "",
                "kind": "Service",
                "name": intent.spec.service.name,
                "port": intent.spec.service.port,
                "weight": 1,
            }],
        }],
    }))?)
}
