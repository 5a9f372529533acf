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

use std::{
    fmt,
    ops::Sub,
    sync::Arc,
    time::Instant,
};

use futures::StreamExt;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, ListParams},
    runtime::{controller::Action, watcher::Config, Controller},
    Client, ResourceExt,
};
use tracing::*;

use crate::appintent::{AppIntent, AppIntentStatus};
use crate::authentication::{reconcile_auth, AuthOutcome};
use crate::conditions::{init_condition, new_condition, set_condition, ConditionStatus};
use crate::consts::*;
use crate::events::IntentEvent;
use crate::providers::IdentityProvider;
use crate::routing::{reconcile_routing, RoutingOutcome};
use crate::securitypolicy::SecurityPolicy;
use crate::store::intent_key;
use crate::validation::validate;
use crate::{Context, Error, ErrorClass, Result};

const MAX_STATUS_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Validating,
    Routing,
    Authenticating,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct StageFailure {
    stage: Stage,
    ready_reason: &'static str,
    error: Error,
}

pub async fn reconcile(intent: Arc<AppIntent>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let (ns, name) = intent_key(&intent)?;

    if intent.metadata.deletion_timestamp.is_some() {
        return cleanup(&intent, &ctx).await;
    }

    let intent = ensure_finalizer(&intent, &ctx).await?;
    let generation = intent.metadata.generation;
    let mut status = intent.status.clone().unwrap_or_default();
    for type_ in [CONDITION_READY, CONDITION_ROUTING_READY, CONDITION_AUTH_READY] {
        init_condition(
            &mut status,
            new_condition(
                type_,
                ConditionStatus::Unknown,
                REASON_RECONCILING,
                "reconciliation in progress",
                generation,
            ),
        );
    }

    let result = converge(&intent, &ctx, &mut status).await;
    let failure = match result {
        Ok(()) => {
            status.observed_generation = generation;
            status.hostname = Some(intent.spec.hostname.clone());
            let ready = set_condition(
                &mut status,
                new_condition(
                    CONDITION_READY,
                    ConditionStatus::True,
                    REASON_RECONCILED,
                    "all enabled stages converged",
                    generation,
                ),
            );
            if ready {
                ctx.events
                    .publish(
                        &intent,
                        IntentEvent::normal(REASON_RECONCILED, "Reconcile", "AppIntent is ready"),
                    )
                    .await;
            }
            None
        }
        Err(failure) => {
            set_condition(
                &mut status,
                new_condition(
                    CONDITION_READY,
                    ConditionStatus::False,
                    failure.ready_reason,
                    failure.error.to_string(),
                    generation,
                ),
            );
            ctx.events
                .publish(
                    &intent,
                    IntentEvent::warning(
                        failure.error.reason(),
                        "Reconcile",
                        format!("{} failed: {}", failure.stage, failure.error),
                    ),
                )
                .await;
            Some(failure)
        }
    };

    persist_status(&intent, &ctx, status).await?;

    let duration = Instant::now().sub(start);
    if let Some(failure) = failure {
        debug!(
            "reconciling {}/{} stopped at {} after {:?} ms",
            ns,
            name,
            failure.stage,
            duration.as_millis()
        );
        return Err(failure.error);
    }
    info!("finished reconciling {}/{} in {:?} ms", ns, name, duration.as_millis());
    Ok(Action::requeue(ctx.config.requeue_converged()))
}

// Runs the stages in order, stopping at the first failure. Each stage owns its
// condition; `Ready` is left to the caller.
async fn converge(
    intent: &AppIntent,
    ctx: &Context,
    status: &mut AppIntentStatus,
) -> Result<(), StageFailure> {
    let generation = intent.metadata.generation;

    if let Err(error) = validate(intent, ctx).await {
        not_evaluated(status, &[CONDITION_ROUTING_READY, CONDITION_AUTH_READY], generation);
        return Err(StageFailure {
            stage: Stage::Validating,
            ready_reason: error.reason(),
            error,
        });
    }

    let routing = match reconcile_routing(intent, ctx, status).await {
        Ok(RoutingOutcome::Synced(_)) => new_condition(
            CONDITION_ROUTING_READY,
            ConditionStatus::True,
            REASON_ROUTE_SYNCED,
            "HTTPRoute is in sync",
            generation,
        ),
        Ok(RoutingOutcome::Disabled) => new_condition(
            CONDITION_ROUTING_READY,
            ConditionStatus::False,
            REASON_ROUTING_DISABLED,
            "routing is disabled",
            generation,
        ),
        Err(error) => {
            let reason = match error {
                Error::GatewayNotFound { .. } | Error::UnsupportedTlsMode(_) => error.reason(),
                _ => REASON_ROUTE_SYNC_FAILED,
            };
            set_condition(
                status,
                new_condition(
                    CONDITION_ROUTING_READY,
                    ConditionStatus::False,
                    reason,
                    error.to_string(),
                    generation,
                ),
            );
            not_evaluated(status, &[CONDITION_AUTH_READY], generation);
            return Err(StageFailure {
                stage: Stage::Routing,
                ready_reason: REASON_ROUTING_NOT_READY,
                error,
            });
        }
    };
    set_condition(status, routing);

    let auth = match reconcile_auth(intent, ctx, status).await {
        Ok(AuthOutcome::Configured(_)) => new_condition(
            CONDITION_AUTH_READY,
            ConditionStatus::True,
            REASON_AUTH_CONFIGURED,
            "SecurityPolicy is in sync",
            generation,
        ),
        Ok(AuthOutcome::Disabled) => new_condition(
            CONDITION_AUTH_READY,
            ConditionStatus::False,
            REASON_AUTH_DISABLED,
            "authentication is disabled",
            generation,
        ),
        Err(failure) => {
            set_condition(
                status,
                new_condition(
                    CONDITION_AUTH_READY,
                    ConditionStatus::False,
                    failure.reason,
                    failure.error.to_string(),
                    generation,
                ),
            );
            return Err(StageFailure {
                stage: Stage::Authenticating,
                ready_reason: REASON_AUTH_NOT_READY,
                error: failure.error,
            });
        }
    };
    set_condition(status, auth);

    Ok(())
}

// Stages after a failed one did not run in this pass, so their conditions must
// not keep reporting an earlier outcome.
fn not_evaluated(status: &mut AppIntentStatus, types: &[&str], generation: Option<i64>) {
    for type_ in types {
        set_condition(
            status,
            new_condition(
                type_,
                ConditionStatus::Unknown,
                REASON_NOT_EVALUATED,
                "an earlier stage failed",
                generation,
            ),
        );
    }
}

async fn ensure_finalizer(intent: &AppIntent, ctx: &Context) -> Result<AppIntent> {
    if intent.finalizers().iter().any(|f| f == APP_INTENT_FINALIZER) {
        return Ok(intent.clone());
    }
    let mut finalizers = intent.finalizers().to_vec();
    finalizers.push(APP_INTENT_FINALIZER.to_string());
    let updated = ctx.intents.set_finalizers(intent, finalizers).await?;
    debug!("added finalizer to {}", intent.name_any());
    Ok(updated)
}

// Removes the externally provisioned client, then releases the intent. Owned
// cluster resources are garbage collected through their owner references.
async fn cleanup(intent: &AppIntent, ctx: &Context) -> Result<Action> {
    if !intent.finalizers().iter().any(|f| f == APP_INTENT_FINALIZER) {
        return Ok(Action::await_change());
    }

    if let Some(provider) = provisioned_provider(intent, ctx)? {
        if provider.supports_provisioning() {
            provider.delete_client(intent).await?;
            ctx.events
                .publish(
                    intent,
                    IntentEvent::normal(
                        "ClientDeleted",
                        "Delete",
                        format!(
                            "deleted {} client {}",
                            provider.name(),
                            provider.client_id(intent)
                        ),
                    ),
                )
                .await;
        }
    }

    let finalizers: Vec<String> = intent
        .finalizers()
        .iter()
        .filter(|f| *f != APP_INTENT_FINALIZER)
        .cloned()
        .collect();
    ctx.intents.set_finalizers(intent, finalizers).await?;
    info!("cleaned up {}", intent.name_any());
    Ok(Action::await_change())
}

// The provider holding a client created for this intent, if any. The status
// record is authoritative and must resolve. The intent spec covers clients
// created by a pass whose status write was lost; a spec naming a provider that
// does not resolve cannot have provisioned anything.
fn provisioned_provider(intent: &AppIntent, ctx: &Context) -> Result<Option<IdentityProvider>> {
    if let Some(client) = intent
        .status
        .as_ref()
        .and_then(|status| status.provisioned_client.as_ref())
    {
        return ctx.providers.resolve(&client.provider).map(Some);
    }
    let auth = &intent.spec.auth;
    if !(auth.enabled && auth.provision_client) {
        return Ok(None);
    }
    match ctx.providers.resolve(&auth.provider) {
        Ok(provider) => Ok(Some(provider)),
        Err(err) => {
            warn!(
                "no client recorded for {} and provider {:?} does not resolve ({}); skipping client deletion",
                intent.name_any(),
                auth.provider,
                err
            );
            Ok(None)
        }
    }
}

// Writes the status unless it is already current, retrying on conflicts against a
// fresh copy of the intent.
async fn persist_status(intent: &AppIntent, ctx: &Context, status: AppIntentStatus) -> Result<()> {
    let (ns, name) = intent_key(intent)?;
    let mut current = intent.clone();
    for attempt in 1..=MAX_STATUS_ATTEMPTS {
        if current.status.as_ref() == Some(&status) {
            debug!("status of {}/{} is current", ns, name);
            return Ok(());
        }
        match ctx.intents.patch_status(&current, &status).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_conflict() => {
                debug!(
                    "conflict writing status of {}/{} (attempt {}), retrying",
                    ns, name, attempt
                );
                match ctx.intents.get(&ns, &name).await? {
                    Some(fresh) => current = fresh,
                    None => return Ok(()),
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(Error::ConflictRetriesExhausted {
        kind: "AppIntent".to_string(),
        name,
    })
}

pub async fn controller(client: Client, ctx: Context) -> Result<()> {
    let intents = Api::<AppIntent>::all(client.clone());
    intents
        .list(&ListParams::default().limit(1))
        .await
        .map_err(Error::CRDNotFoundError)?;

    let managed = Config::default().labels(&format!("{MANAGED_BY_LABEL}={CONTROLLER_NAME}"));
    Controller::new(intents, Config::default().any_semantic())
        .owns(Api::<HTTPRoute>::all(client.clone()), Config::default())
        .owns(Api::<SecurityPolicy>::all(client.clone()), Config::default())
        .owns(Api::<Secret>::all(client), managed)
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(ctx))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

pub fn error_policy(intent: Arc<AppIntent>, error: &Error, ctx: Arc<Context>) -> Action {
    let delay = match error.class() {
        ErrorClass::Transient => ctx.config.requeue_transient(),
        ErrorClass::Precondition | ErrorClass::Provider => ctx.config.requeue_precondition(),
    };
    warn!(
        "reconcile of {} failed ({}): {:?}; retrying in {:?}",
        intent.name_any(),
        error.reason(),
        error,
        delay
    );
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::appintent::ProvisionedClient;
    use crate::conditions::find_condition;
    use crate::testing::{
        intent_fixture, intent_with_spec, ready_cluster, test_config, test_context,
        MemoryCluster, RecordingEvents,
    };

    const CLIENTS: &str = "/admin/realms/apps/clients";

    fn stored(store: &MemoryCluster) -> Option<AppIntent> {
        store.list::<AppIntent>("apps").pop()
    }

    async fn run(store: &Arc<MemoryCluster>, ctx: &Arc<Context>) -> Result<Action> {
        let intent = stored(store).unwrap();
        reconcile(Arc::new(intent), ctx.clone()).await
    }

    fn condition(intent: &AppIntent, type_: &str) -> (String, String) {
        let status = intent.status.as_ref().unwrap();
        let c = find_condition(&status.conditions, type_).unwrap();
        (c.status.clone(), c.reason.clone())
    }

    fn pair(status: &str, reason: &str) -> (String, String) {
        (status.to_string(), reason.to_string())
    }

    async fn keycloak(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/realms/master/protocol/openid-connect/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok"})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(CLIENTS))
            .and(query_param("clientId", "apps-shop"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"id": "c-1", "clientId": "apps-shop"}])),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{CLIENTS}/c-1/client-secret")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"type": "secret", "value": "s3cret"})),
            )
            .mount(server)
            .await;
    }

    fn keycloak_context(
        store: Arc<MemoryCluster>,
        events: Arc<RecordingEvents>,
        server: &MockServer,
    ) -> Arc<Context> {
        Arc::new(test_context(
            store,
            events,
            test_config(&["--keycloak-url", &server.uri(), "--keycloak-realm", "apps"]),
        ))
    }

    fn provisioning_intent() -> AppIntent {
        intent_with_spec(
            "apps",
            "shop",
            json!({
                "hostname": "app.example.com",
                "service": {"name": "svc", "port": 8080},
                "auth": {"enabled": true, "provider": "keycloak", "provisionClient": true},
            }),
        )
    }

    #[tokio::test]
    async fn auth_disabled_intent_converges() {
        let store = ready_cluster();
        store.insert(&intent_fixture("apps", "shop"));
        let events = Arc::new(RecordingEvents::default());
        let ctx = Arc::new(test_context(store.clone(), events.clone(), test_config(&[])));

        let action = run(&store, &ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));

        let intent = stored(&store).unwrap();
        assert_eq!(condition(&intent, CONDITION_ROUTING_READY), pair("True", "RouteSynced"));
        assert_eq!(condition(&intent, CONDITION_AUTH_READY), pair("False", "AuthDisabled"));
        assert_eq!(condition(&intent, CONDITION_READY), pair("True", "Reconciled"));
        let status = intent.status.as_ref().unwrap();
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.route_name.as_deref(), Some("shop-route"));
        assert_eq!(intent.finalizers(), &[APP_INTENT_FINALIZER.to_string()]);

        let routes = store.list::<HTTPRoute>("apps");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].name_any(), "shop-route");
        assert!(store.list::<SecurityPolicy>("apps").is_empty());
        assert_eq!(events.reasons(), vec!["RouteCreated", "Reconciled"]);

        let writes = store.writes();
        run(&store, &ctx).await.unwrap();
        assert_eq!(store.writes(), writes);
        assert_eq!(events.count(), 2);
    }

    #[tokio::test]
    async fn namespace_without_opt_in_creates_nothing() {
        let store = ready_cluster();
        store.add_namespace("apps", &[]);
        store.insert(&intent_fixture("apps", "shop"));
        let events = Arc::new(RecordingEvents::default());
        let ctx = Arc::new(test_context(store.clone(), events.clone(), test_config(&[])));

        let err = run(&store, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::NamespaceNotOptedIn(_)));

        let intent = stored(&store).unwrap();
        assert_eq!(
            condition(&intent, CONDITION_READY),
            pair("False", "NamespaceNotOptedIn")
        );
        assert_eq!(
            condition(&intent, CONDITION_ROUTING_READY),
            pair("Unknown", "NotEvaluated")
        );
        assert_eq!(intent.status.as_ref().unwrap().observed_generation, None);
        assert!(store.list::<HTTPRoute>("apps").is_empty());
        assert_eq!(events.reasons(), vec!["NamespaceNotOptedIn"]);

        let action = error_policy(Arc::new(intent), &err, ctx);
        assert_eq!(action, Action::requeue(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn failed_validation_short_circuits() {
        let store = Arc::new(MemoryCluster::default());
        store.add_namespace("apps", &[(NAMESPACE_OPT_IN_LABEL, "true")]);
        store.add_gateway("envoy-gateway-system", "eg");
        store.insert(&intent_with_spec(
            "apps",
            "shop",
            json!({
                "hostname": "app.example.com",
                "service": {"name": "svc", "port": 8080},
                "auth": {"enabled": true, "provider": "generic", "secretRef": {"name": "oidc"}},
            }),
        ));
        let ctx = Arc::new(test_context(
            store.clone(),
            Arc::new(RecordingEvents::default()),
            test_config(&["--oidc-issuer-url", "https://idp.example.com"]),
        ));

        let err = run(&store, &ctx).await.unwrap_err();

        assert!(matches!(err, Error::ServiceNotFound { .. }));
        assert!(store.list::<HTTPRoute>("apps").is_empty());
        assert!(store.list::<SecurityPolicy>("apps").is_empty());
        let intent = stored(&store).unwrap();
        assert_eq!(condition(&intent, CONDITION_READY), pair("False", "ServiceNotFound"));
    }

    #[tokio::test]
    async fn missing_gateway_is_retried_soon() {
        let store = Arc::new(MemoryCluster::default());
        store.add_namespace("apps", &[(NAMESPACE_OPT_IN_LABEL, "true")]);
        store.add_service("apps", "svc", &[8080]);
        store.insert(&intent_fixture("apps", "shop"));
        let ctx = Arc::new(test_context(
            store.clone(),
            Arc::new(RecordingEvents::default()),
            test_config(&[]),
        ));

        let err = run(&store, &ctx).await.unwrap_err();

        let intent = stored(&store).unwrap();
        assert_eq!(
            condition(&intent, CONDITION_ROUTING_READY),
            pair("False", "GatewayNotFound")
        );
        assert_eq!(condition(&intent, CONDITION_READY), pair("False", "RoutingNotReady"));
        assert_eq!(
            error_policy(Arc::new(intent), &err, ctx),
            Action::requeue(Duration::from_secs(15))
        );
    }

    #[tokio::test]
    async fn keycloak_client_is_provisioned_once() {
        let server = MockServer::start().await;
        keycloak(&server).await;
        Mock::given(method("POST"))
            .and(path(CLIENTS))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = ready_cluster();
        store.insert(&provisioning_intent());
        let events = Arc::new(RecordingEvents::default());
        let ctx = keycloak_context(store.clone(), events.clone(), &server);

        run(&store, &ctx).await.unwrap();

        let intent = stored(&store).unwrap();
        assert_eq!(condition(&intent, CONDITION_AUTH_READY), pair("True", "AuthConfigured"));
        assert_eq!(condition(&intent, CONDITION_READY), pair("True", "Reconciled"));
        let status = intent.status.clone().unwrap();
        assert_eq!(
            status.provisioned_client,
            Some(ProvisionedClient {
                provider: "keycloak".to_string(),
                client_id: "apps-shop".to_string(),
            })
        );
        assert_eq!(status.client_secret_name.as_deref(), Some("shop-client-secret"));

        let secrets = store.list::<Secret>("apps");
        assert_eq!(secrets.len(), 1);
        let data = secrets[0].data.as_ref().unwrap();
        assert_eq!(data[CLIENT_ID_KEY].0, b"apps-shop");
        assert_eq!(data[CLIENT_SECRET_KEY].0, b"s3cret");

        let policy = store.list::<SecurityPolicy>("apps").pop().unwrap();
        let oidc = policy.spec.oidc.unwrap();
        assert_eq!(oidc.provider.issuer, format!("{}/realms/apps", server.uri()));
        assert_eq!(oidc.client_secret.name, "shop-client-secret");

        let auth_ready = find_condition(&status.conditions, CONDITION_AUTH_READY)
            .unwrap()
            .last_transition_time
            .clone();
        let writes = store.writes();
        let requests = server.received_requests().await.unwrap().len();
        let emitted = events.count();

        run(&store, &ctx).await.unwrap();

        assert_eq!(store.writes(), writes);
        assert_eq!(server.received_requests().await.unwrap().len(), requests);
        assert_eq!(events.count(), emitted);
        let intent = stored(&store).unwrap();
        let status = intent.status.as_ref().unwrap();
        let condition = find_condition(&status.conditions, CONDITION_AUTH_READY).unwrap();
        assert_eq!(condition.status, "True");
        assert_eq!(condition.last_transition_time, auth_ready);
    }

    #[tokio::test]
    async fn deletion_removes_client_before_finalizer() {
        let server = MockServer::start().await;
        keycloak(&server).await;
        Mock::given(method("DELETE"))
            .and(path(format!("{CLIENTS}/c-1")))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("{CLIENTS}/c-1")))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = ready_cluster();
        let mut intent = provisioning_intent();
        intent.metadata.finalizers = Some(vec![APP_INTENT_FINALIZER.to_string()]);
        intent.status = Some(AppIntentStatus {
            provisioned_client: Some(ProvisionedClient {
                provider: "keycloak".to_string(),
                client_id: "apps-shop".to_string(),
            }),
            ..Default::default()
        });
        store.insert(&intent);
        store.mark_deleted("apps", "shop");
        let events = Arc::new(RecordingEvents::default());
        let ctx = keycloak_context(store.clone(), events.clone(), &server);

        let err = run(&store, &ctx).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
        let pending = stored(&store).unwrap();
        assert_eq!(pending.finalizers(), &[APP_INTENT_FINALIZER.to_string()]);

        let action = run(&store, &ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(stored(&store).is_none());
        assert_eq!(events.reasons(), vec!["ClientDeleted"]);
    }

    #[tokio::test]
    async fn deletion_without_client_only_drops_finalizer() {
        let store = ready_cluster();
        let mut intent = intent_fixture("apps", "shop");
        intent.metadata.finalizers = Some(vec![APP_INTENT_FINALIZER.to_string()]);
        store.insert(&intent);
        store.mark_deleted("apps", "shop");
        let ctx = Arc::new(test_context(
            store.clone(),
            Arc::new(RecordingEvents::default()),
            test_config(&[]),
        ));

        run(&store, &ctx).await.unwrap();

        assert!(stored(&store).is_none());
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn deletion_with_unresolvable_provider_releases_intent() {
        for provider in ["okta", "keycloak"] {
            let store = ready_cluster();
            let mut intent = intent_with_spec(
                "apps",
                "shop",
                json!({
                    "hostname": "app.example.com",
                    "service": {"name": "svc", "port": 8080},
                    "auth": {"enabled": true, "provider": provider, "provisionClient": true},
                }),
            );
            intent.metadata.finalizers = Some(vec![APP_INTENT_FINALIZER.to_string()]);
            store.insert(&intent);
            let ctx = Arc::new(test_context(
                store.clone(),
                Arc::new(RecordingEvents::default()),
                test_config(&[]),
            ));

            let err = run(&store, &ctx).await.unwrap_err();
            assert!(matches!(err, Error::InvalidProvider(_)));
            assert_eq!(stored(&store).unwrap().status.unwrap().provisioned_client, None);

            store.mark_deleted("apps", "shop");
            let action = run(&store, &ctx).await.unwrap();

            assert_eq!(action, Action::await_change());
            assert!(stored(&store).is_none(), "{provider} intent kept its finalizer");
        }
    }

    #[tokio::test]
    async fn recorded_client_with_unresolvable_provider_keeps_finalizer() {
        let store = ready_cluster();
        let mut intent = intent_fixture("apps", "shop");
        intent.metadata.finalizers = Some(vec![APP_INTENT_FINALIZER.to_string()]);
        intent.status = Some(AppIntentStatus {
            provisioned_client: Some(ProvisionedClient {
                provider: "keycloak".to_string(),
                client_id: "apps-shop".to_string(),
            }),
            ..Default::default()
        });
        store.insert(&intent);
        store.mark_deleted("apps", "shop");
        let ctx = Arc::new(test_context(
            store.clone(),
            Arc::new(RecordingEvents::default()),
            test_config(&[]),
        ));

        let err = run(&store, &ctx).await.unwrap_err();

        assert!(matches!(err, Error::InvalidProvider(_)));
        assert!(stored(&store).is_some());
    }

    #[tokio::test]
    async fn skipped_stages_drop_earlier_outcomes() {
        let store = ready_cluster();
        store.insert(&intent_fixture("apps", "shop"));
        let ctx = Arc::new(test_context(
            store.clone(),
            Arc::new(RecordingEvents::default()),
            test_config(&[]),
        ));
        run(&store, &ctx).await.unwrap();

        store.add_service("apps", "svc", &[9090]);
        run(&store, &ctx).await.unwrap_err();

        let intent = stored(&store).unwrap();
        assert_eq!(condition(&intent, CONDITION_READY), pair("False", "ServiceNotFound"));
        assert_eq!(
            condition(&intent, CONDITION_ROUTING_READY),
            pair("Unknown", "NotEvaluated")
        );
        assert_eq!(
            condition(&intent, CONDITION_AUTH_READY),
            pair("Unknown", "NotEvaluated")
        );
    }

    #[tokio::test]
    async fn routing_failure_resets_auth_condition() {
        let store = ready_cluster();
        store.insert(&intent_fixture("apps", "shop"));
        let ctx = Arc::new(test_context(
            store.clone(),
            Arc::new(RecordingEvents::default()),
            test_config(&[]),
        ));
        run(&store, &ctx).await.unwrap();

        let mut intent = stored(&store).unwrap();
        intent.spec.routing.tls.mode = crate::appintent::TlsMode::PerHost;
        store.insert(&intent);
        run(&store, &ctx).await.unwrap_err();

        let intent = stored(&store).unwrap();
        assert_eq!(
            condition(&intent, CONDITION_ROUTING_READY),
            pair("False", "UnsupportedTlsMode")
        );
        assert_eq!(
            condition(&intent, CONDITION_AUTH_READY),
            pair("Unknown", "NotEvaluated")
        );
        assert_eq!(condition(&intent, CONDITION_READY), pair("False", "RoutingNotReady"));
    }

    #[tokio::test]
    async fn status_write_retries_conflicts() {
        let store = ready_cluster();
        let mut intent = intent_fixture("apps", "shop");
        intent.metadata.finalizers = Some(vec![APP_INTENT_FINALIZER.to_string()]);
        store.insert(&intent);
        let ctx = Arc::new(test_context(
            store.clone(),
            Arc::new(RecordingEvents::default()),
            test_config(&[]),
        ));
        store.inject_conflicts(1);

        run(&store, &ctx).await.unwrap();

        let intent = stored(&store).unwrap();
        assert_eq!(condition(&intent, CONDITION_READY), pair("True", "Reconciled"));
    }

    #[tokio::test]
    async fn spec_change_moves_observed_generation() {
        let store = ready_cluster();
        store.insert(&intent_fixture("apps", "shop"));
        let events = Arc::new(RecordingEvents::default());
        let ctx = Arc::new(test_context(store.clone(), events.clone(), test_config(&[])));
        run(&store, &ctx).await.unwrap();

        let mut intent = stored(&store).unwrap();
        intent.metadata.generation = Some(2);
        intent.spec.routing.paths = serde_json::from_value(json!([{"path": "/api"}])).unwrap();
        store.insert(&intent);
        run(&store, &ctx).await.unwrap();

        let intent = stored(&store).unwrap();
        assert_eq!(intent.status.as_ref().unwrap().observed_generation, Some(2));
        assert_eq!(events.reasons(), vec!["RouteCreated", "Reconciled", "RouteUpdated"]);
    }
}
