// The finalizer gating cleanup of externally provisioned identity-provider clients.
pub const APP_INTENT_FINALIZER: &str = "appintent.io/cleanup";

// Namespaces must carry this label with value "true" to be managed.
pub const NAMESPACE_OPT_IN_LABEL: &str = "appintent.io/managed";

// Field manager for the AppIntent controller.
pub const FIELD_MANAGER: &str = "appintent-controller";

// Name reported as the source of emitted events.
pub const CONTROLLER_NAME: &str = "appintent-controller";

// Labels set on every owned resource.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const INTENT_LABEL: &str = "appintent.io/intent";

// Records which identity-provider client a provisioned secret belongs to.
pub const CLIENT_ID_ANNOTATION: &str = "appintent.io/client-id";

// Owned resource name suffixes.
pub const ROUTE_SUFFIX: &str = "route";
pub const SECURITY_POLICY_SUFFIX: &str = "auth";
pub const CLIENT_SECRET_SUFFIX: &str = "client-secret";

// Keys a client secret must hold.
pub const CLIENT_ID_KEY: &str = "client-id";
pub const CLIENT_SECRET_KEY: &str = "client-secret";

pub const DEFAULT_REDIRECT_PATH: &str = "/oauth2/callback";
pub const DEFAULT_LOGOUT_PATH: &str = "/logout";
pub const DEFAULT_PROVIDER: &str = "keycloak";

// Condition types.
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_ROUTING_READY: &str = "RoutingReady";
pub const CONDITION_AUTH_READY: &str = "AuthReady";

// Condition reasons.
pub const REASON_RECONCILING: &str = "Reconciling";
pub const REASON_RECONCILED: &str = "Reconciled";
pub const REASON_NOT_EVALUATED: &str = "NotEvaluated";
pub const REASON_NAMESPACE_NOT_OPTED_IN: &str = "NamespaceNotOptedIn";
pub const REASON_SERVICE_NOT_FOUND: &str = "ServiceNotFound";
pub const REASON_GATEWAY_NOT_FOUND: &str = "GatewayNotFound";
pub const REASON_UNSUPPORTED_TLS_MODE: &str = "UnsupportedTlsMode";
pub const REASON_ROUTE_SYNCED: &str = "RouteSynced";
pub const REASON_ROUTE_SYNC_FAILED: &str = "RouteSyncFailed";
pub const REASON_ROUTING_DISABLED: &str = "RoutingDisabled";
pub const REASON_ROUTING_NOT_READY: &str = "RoutingNotReady";
pub const REASON_AUTH_DISABLED: &str = "AuthDisabled";
pub const REASON_AUTH_CONFIGURED: &str = "AuthConfigured";
pub const REASON_AUTH_NOT_READY: &str = "AuthNotReady";
pub const REASON_INVALID_PROVIDER: &str = "InvalidProvider";
pub const REASON_PROVISIONING_FAILED: &str = "ProvisioningFailed";
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";
pub const REASON_SECURITY_POLICY_FAILED: &str = "SecurityPolicyFailed";

/// Deterministic name of a resource owned by the named intent.
pub fn owned_name(intent_name: &str, suffix: &str) -> String {
    format!("{intent_name}-{suffix}")
}
