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

use tracing::*;

use crate::appintent::AppIntent;
use crate::consts::NAMESPACE_OPT_IN_LABEL;
use crate::store::intent_key;
use crate::{Context, Error, Result};

// Checks the preconditions that must hold before anything is written for the intent:
// the namespace has opted in and the backend service exposes the requested port.
pub async fn validate(intent: &AppIntent, ctx: &Context) -> Result<()> {
    let (ns, _) = intent_key(intent)?;

    let opted_in = ctx
        .cluster
        .namespace_labels(&ns)
        .await?
        .and_then(|labels| labels.get(NAMESPACE_OPT_IN_LABEL).cloned())
        .is_some_and(|value| value == "true");
    if !opted_in {
        return Err(Error::NamespaceNotOptedIn(ns));
    }

    let service = &intent.spec.service;
    let ports = ctx
        .cluster
        .service_ports(&ns, &service.name)
        .await?
        .ok_or_else(|| Error::ServiceNotFound {
            namespace: ns.clone(),
            name: service.name.clone(),
        })?;
    if !ports.contains(&service.port) {
        return Err(Error::ServicePortNotFound {
            namespace: ns,
            name: service.name.clone(),
            port: service.port,
        });
    }

    debug!("preconditions hold for service {}:{}", service.name, service.port);
    Ok(())
}
