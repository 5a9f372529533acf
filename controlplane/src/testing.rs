//! In-memory stand-ins for the cluster used by unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{core::ErrorResponse, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::appintent::{AppIntent, AppIntentSpec, AppIntentStatus};
use crate::config::ControllerConfig;
use crate::events::{EventSink, IntentEvent};
use crate::providers::ProviderRegistry;
use crate::store::{ClusterLookup, IntentClient, ObjectClient};
use crate::{Context, Error, Result};

type Key = (String, String, String);

/// A fake API server keeping objects as JSON, with resourceVersion checks on writes.
#[derive(Default)]
pub struct MemoryCluster {
    objects: Mutex<BTreeMap<Key, serde_json::Value>>,
    namespaces: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    services: Mutex<BTreeMap<(String, String), Vec<i32>>>,
    gateways: Mutex<BTreeSet<(String, String)>>,
    version: AtomicU64,
    writes: AtomicUsize,
    conflicts: AtomicUsize,
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

impl MemoryCluster {
    /// Number of create/replace/patch/delete calls that succeeded.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes the next `n` replace or patch calls fail with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub fn add_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        self.namespaces.lock().unwrap().insert(
            name.to_string(),
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }

    pub fn add_service(&self, namespace: &str, name: &str, ports: &[i32]) {
        self.services
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), ports.to_vec());
    }

    pub fn add_gateway(&self, namespace: &str, name: &str) {
        self.gateways
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()));
    }

    /// Stores an object as-is, bypassing write accounting.
    pub fn insert<K: Resource<DynamicType = ()> + Serialize>(&self, obj: &K) {
        let mut value = serde_json::to_value(obj).unwrap();
        value["metadata"]["resourceVersion"] = json!(self.next_version());
        let key = (
            K::kind(&()).to_string(),
            obj.meta().namespace.clone().unwrap_or_default(),
            obj.meta().name.clone().unwrap_or_default(),
        );
        self.objects.lock().unwrap().insert(key, value);
    }

    /// Typed view of every stored object of a kind in a namespace.
    pub fn list<K: Resource<DynamicType = ()> + DeserializeOwned>(&self, namespace: &str) -> Vec<K> {
        let kind = K::kind(&()).to_string();
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, v)| serde_json::from_value(v.clone()).unwrap())
            .collect()
    }

    /// Marks the stored intent as being deleted.
    pub fn mark_deleted(&self, namespace: &str, name: &str) {
        let key = ("AppIntent".to_string(), namespace.to_string(), name.to_string());
        let mut objects = self.objects.lock().unwrap();
        let value = objects.get_mut(&key).unwrap();
        value["metadata"]["deletionTimestamp"] = serde_json::to_value(Time(Utc::now())).unwrap();
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn take_conflict(&self) -> bool {
        self.conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn key_of<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> Key {
        (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
    }

    fn get_typed<K: Resource<DynamicType = ()> + DeserializeOwned>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&Self::key_of::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    // Applies `update` to the stored JSON if `resource_version` is current.
    fn guarded_update<K, F>(&self, key: Key, resource_version: Option<&String>, update: F) -> Result<K>
    where
        K: DeserializeOwned,
        F: FnOnce(&mut serde_json::Value),
    {
        if self.take_conflict() {
            return Err(api_error(409, "Conflict", "injected conflict".to_string()));
        }
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get_mut(&key) else {
            return Err(api_error(404, "NotFound", format!("{key:?} not found")));
        };
        let current = stored["metadata"]["resourceVersion"].as_str().map(str::to_string);
        if resource_version.is_some() && resource_version != current.as_ref() {
            return Err(api_error(409, "Conflict", "resourceVersion mismatch".to_string()));
        }
        update(stored);
        stored["metadata"]["resourceVersion"] = json!(self.next_version());
        let result = serde_json::from_value(stored.clone()).unwrap();

        let finalizers_empty = stored["metadata"]["finalizers"]
            .as_array()
            .map_or(true, |f| f.is_empty());
        if !stored["metadata"]["deletionTimestamp"].is_null() && finalizers_empty {
            objects.remove(&key);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }
}

#[async_trait]
impl<K> ObjectClient<K> for MemoryCluster
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.get_typed(namespace, name))
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let key = Self::key_of::<K>(namespace, &name);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{name} already exists")));
        }
        let mut value = serde_json::to_value(obj)?;
        value["metadata"]["namespace"] = json!(namespace);
        value["metadata"]["resourceVersion"] = json!(self.next_version());
        value["metadata"]["uid"] = json!(format!("uid-{}", name));
        objects.insert(key, value.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::from_value(value)?)
    }

    async fn replace(&self, namespace: &str, name: &str, obj: &K) -> Result<K> {
        let replacement = serde_json::to_value(obj)?;
        self.guarded_update(
            Self::key_of::<K>(namespace, name),
            obj.meta().resource_version.as_ref(),
            |stored| *stored = replacement,
        )
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        if self
            .objects
            .lock()
            .unwrap()
            .remove(&Self::key_of::<K>(namespace, name))
            .is_some()
        {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl IntentClient for MemoryCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<AppIntent>> {
        Ok(self.get_typed(namespace, name))
    }

    async fn patch_status(&self, intent: &AppIntent, status: &AppIntentStatus) -> Result<AppIntent> {
        let status = serde_json::to_value(status)?;
        self.guarded_update(
            Self::key_of::<AppIntent>(&intent.namespace().unwrap(), &intent.name_any()),
            intent.metadata.resource_version.as_ref(),
            |stored| stored["status"] = status,
        )
    }

    async fn set_finalizers(&self, intent: &AppIntent, finalizers: Vec<String>) -> Result<AppIntent> {
        self.guarded_update(
            Self::key_of::<AppIntent>(&intent.namespace().unwrap(), &intent.name_any()),
            intent.metadata.resource_version.as_ref(),
            |stored| stored["metadata"]["finalizers"] = json!(finalizers),
        )
    }
}

#[async_trait]
impl ClusterLookup for MemoryCluster {
    async fn namespace_labels(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.namespaces.lock().unwrap().get(name).cloned())
    }

    async fn service_ports(&self, namespace: &str, name: &str) -> Result<Option<Vec<i32>>> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn gateway_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self
            .gateways
            .lock()
            .unwrap()
            .contains(&(namespace.to_string(), name.to_string())))
    }
}

/// Collects published events.
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<IntentEvent>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn publish(&self, _intent: &AppIntent, event: IntentEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// An intent with the metadata the API server would have filled in.
pub fn intent_fixture(namespace: &str, name: &str) -> AppIntent {
    intent_with_spec(
        namespace,
        name,
        json!({
            "hostname": "app.example.com",
            "service": {"name": "svc", "port": 8080},
        }),
    )
}

pub fn intent_with_spec(namespace: &str, name: &str, spec: serde_json::Value) -> AppIntent {
    let spec: AppIntentSpec = serde_json::from_value(spec).unwrap();
    let mut intent = AppIntent::new(name, spec);
    intent.metadata.namespace = Some(namespace.to_string());
    intent.metadata.uid = Some(format!("uid-{name}"));
    intent.metadata.generation = Some(1);
    intent
}

pub fn test_config(args: &[&str]) -> ControllerConfig {
    use clap::Parser;
    let mut argv = vec!["controller"];
    argv.extend_from_slice(args);
    ControllerConfig::try_parse_from(argv).unwrap()
}

/// A cluster with an opted-in namespace `apps`, service `svc:8080` and the default gateway.
pub fn ready_cluster() -> Arc<MemoryCluster> {
    let store = Arc::new(MemoryCluster::default());
    store.add_namespace("apps", &[("appintent.io/managed", "true")]);
    store.add_service("apps", "svc", &[8080]);
    store.add_gateway("envoy-gateway-system", "eg");
    store
}

pub fn test_context(
    store: Arc<MemoryCluster>,
    events: Arc<RecordingEvents>,
    config: ControllerConfig,
) -> Context {
    let config = Arc::new(config);
    Context {
        providers: ProviderRegistry::new(config.clone()).unwrap(),
        config,
        intents: store.clone(),
        cluster: store.clone(),
        routes: store.clone(),
        policies: store.clone(),
        secrets: store,
        events,
    }
}
