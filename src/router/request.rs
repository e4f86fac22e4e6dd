use serde_json::Value;
use std::collections::BTreeMap;

/// One call into the router.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// Resource name, e.g. `blog`.
    pub resource: String,
    /// Operation name, e.g. `info`.
    pub operation: String,
    /// Named parameters; fill path placeholders first, then query or body.
    pub parameters: BTreeMap<String, Value>,
    /// Credential identity the call is made and rate-limited for.
    pub credential_id: String,
    /// Result may be served from and stored in the cache.
    pub cacheable: bool,
    /// Safe to execute more than once.
    pub idempotent: bool,
}

impl OperationRequest {
    /// Creates a request with no parameters that bypasses the cache.
    pub fn new(
        resource: impl Into<String>,
        operation: impl Into<String>,
        credential_id: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            operation: operation.into(),
            parameters: BTreeMap::new(),
            credential_id: credential_id.into(),
            cacheable: false,
            idempotent: false,
        }
    }

    /// Sets one parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Replaces all parameters.
    pub fn parameters(mut self, parameters: BTreeMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Marks the result as cacheable.
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Marks the operation as idempotent.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// `resource.operation`, as used in logs and metrics.
    pub fn name(&self) -> String {
        format!("{}.{}", self.resource, self.operation)
    }

    pub(crate) fn uses_cache(&self) -> bool {
        self.cacheable && self.idempotent
    }
}
