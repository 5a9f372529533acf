use kube::ResourceExt;

use crate::appintent::AppIntent;
use crate::{Error, Result};

/// Any OIDC issuer whose client is registered out of band. Credentials come
/// from a secret supplied with the intent.
#[derive(Clone, Debug)]
pub struct GenericProvider {
    issuer_url: Option<String>,
}

impl GenericProvider {
    pub fn new(issuer_url: Option<String>) -> Self {
        GenericProvider { issuer_url }
    }

    pub fn issuer_url(&self, intent: &AppIntent) -> Result<String> {
        self.issuer_url.clone().ok_or_else(|| {
            Error::InvalidConfigError(format!(
                "no OIDC issuer configured for generic provider used by {}",
                intent.name_any()
            ))
        })
    }
}
