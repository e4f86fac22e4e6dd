//! The set of (resource, operation) pairs the router knows how to call.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::errors::{ClassifiedError, ContentApiResult};
use crate::transport::Method;

/// Characters left as-is in a path segment (RFC 3986 unreserved).
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Whether an operation reads or mutates remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Safe to repeat; eligible for caching.
    Read,
    /// Mutates remote state; never cached, invalidates on success.
    Write,
}

/// How one operation maps onto an HTTP call.
#[derive(Debug, Clone)]
pub struct OperationSpec {
    resource: String,
    operation: String,
    method: Method,
    path: String,
    class: OperationClass,
    cache_ttl: Option<Duration>,
    invalidates: Vec<String>,
}

impl OperationSpec {
    /// A read operation. `path` may contain `{param}` placeholders.
    pub fn read(resource: &str, operation: &str, path: &str) -> Self {
        Self {
            resource: resource.to_string(),
            operation: operation.to_string(),
            method: Method::Get,
            path: path.to_string(),
            class: OperationClass::Read,
            cache_ttl: None,
            invalidates: Vec::new(),
        }
    }

    /// A write operation that invalidates its own resource on success.
    pub fn write(resource: &str, operation: &str, method: Method, path: &str) -> Self {
        Self {
            resource: resource.to_string(),
            operation: operation.to_string(),
            method,
            path: path.to_string(),
            class: OperationClass::Write,
            cache_ttl: None,
            invalidates: vec![resource.to_string()],
        }
    }

    /// Overrides the router's default TTL for this read.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Adds resource prefixes invalidated when this write succeeds.
    pub fn also_invalidates(mut self, resources: &[&str]) -> Self {
        for resource in resources {
            if !self.invalidates.iter().any(|r| r == resource) {
                self.invalidates.push((*resource).to_string());
            }
        }
        self
    }

    /// Resource name.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Path template.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read or write.
    pub fn class(&self) -> OperationClass {
        self.class
    }

    /// Per-operation cache TTL, if set.
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    /// Resource prefixes invalidated on success.
    pub fn invalidates(&self) -> &[String] {
        &self.invalidates
    }

    /// Fills the path template from `parameters`. Parameters not consumed by
    /// the template go to the query string for GET/DELETE and to the JSON
    /// body otherwise.
    pub fn render(&self, parameters: &BTreeMap<String, Value>) -> ContentApiResult<PreparedCall> {
        let mut remaining: BTreeMap<&str, &Value> = parameters
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.as_str(), v))
            .collect();

        let mut path = String::with_capacity(self.path.len());
        let mut rest = self.path.as_str();

        while let Some(open) = rest.find('{') {
            let close = rest[open..].find('}').map(|i| open + i).ok_or_else(|| {
                ClassifiedError::validation(format!("malformed path template '{}'", self.path))
            })?;
            let name = &rest[open + 1..close];
            let value = remaining.remove(name).ok_or_else(|| {
                ClassifiedError::validation(format!(
                    "{}.{} requires parameter '{}'",
                    self.resource, self.operation, name
                ))
            })?;

            path.push_str(&rest[..open]);
            path.extend(utf8_percent_encode(&scalar(value), PATH_SEGMENT));
            rest = &rest[close + 1..];
        }
        path.push_str(rest);

        if remaining.is_empty() {
            return Ok(PreparedCall {
                method: self.method,
                path,
                body: None,
            });
        }

        if self.method.uses_query() {
            let pairs: Vec<(&str, String)> =
                remaining.iter().map(|(k, v)| (*k, scalar(v))).collect();
            let query = serde_urlencoded::to_string(&pairs).map_err(|e| {
                ClassifiedError::validation(format!("cannot encode query parameters: {}", e))
            })?;
            path.push('?');
            path.push_str(&query);

            Ok(PreparedCall {
                method: self.method,
                path,
                body: None,
            })
        } else {
            let body: Map<String, Value> = remaining
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();

            Ok(PreparedCall {
                method: self.method,
                path,
                body: Some(Value::Object(body)),
            })
        }
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A rendered transport call.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    /// HTTP method.
    pub method: Method,
    /// Path with placeholders filled and any query string appended.
    pub path: String,
    /// JSON body for non-query methods.
    pub body: Option<Value>,
}

/// Registry of known operations.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    specs: HashMap<(String, String), OperationSpec>,
}

impl OperationCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an operation.
    pub fn register(&mut self, spec: OperationSpec) -> &mut Self {
        self.specs
            .insert((spec.resource.clone(), spec.operation.clone()), spec);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, spec: OperationSpec) -> Self {
        self.register(spec);
        self
    }

    /// Looks up an operation.
    pub fn get(&self, resource: &str, operation: &str) -> Option<&OperationSpec> {
        self.specs
            .get(&(resource.to_string(), operation.to_string()))
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Iterates over registered operations in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &OperationSpec> {
        self.specs.values()
    }

    /// Operations of the blog content API.
    pub fn blog_api() -> Self {
        const LONG: Duration = Duration::from_secs(600);

        Self::new()
            // blog
            .with(OperationSpec::read("blog", "info", "/blog/{blog}/info").with_cache_ttl(LONG))
            .with(OperationSpec::read("blog", "posts", "/blog/{blog}/posts"))
            .with(OperationSpec::read("blog", "followers", "/blog/{blog}/followers"))
            .with(OperationSpec::read("blog", "likes", "/blog/{blog}/likes"))
            // post
            .with(OperationSpec::read("post", "get", "/blog/{blog}/posts/{id}"))
            .with(
                OperationSpec::write("post", "create", Method::Post, "/blog/{blog}/posts")
                    .also_invalidates(&["blog", "user"]),
            )
            .with(
                OperationSpec::write("post", "update", Method::Put, "/blog/{blog}/posts/{id}")
                    .also_invalidates(&["blog", "user"]),
            )
            .with(
                OperationSpec::write("post", "delete", Method::Delete, "/blog/{blog}/posts/{id}")
                    .also_invalidates(&["blog", "user"]),
            )
            // user
            .with(OperationSpec::read("user", "info", "/user/info").with_cache_ttl(LONG))
            .with(OperationSpec::read("user", "dashboard", "/user/dashboard"))
            .with(OperationSpec::read("user", "likes", "/user/likes"))
            .with(OperationSpec::read("user", "following", "/user/following"))
            .with(OperationSpec::write("user", "follow", Method::Post, "/user/follow").also_invalidates(&["blog"]))
            .with(OperationSpec::write("user", "unfollow", Method::Post, "/user/unfollow").also_invalidates(&["blog"]))
            .with(OperationSpec::write("user", "like", Method::Post, "/user/like").also_invalidates(&["blog", "post"]))
            .with(OperationSpec::write("user", "unlike", Method::Post, "/user/unlike").also_invalidates(&["blog", "post"]))
    }
}
