use otel_core::{Key, KeyValue, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// An immutable description of the entity producing telemetry.
///
/// The SDK never interprets resource attributes; they are attached to every
/// exported batch as-is. Cloning is cheap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

#[derive(Debug, Default, PartialEq)]
struct ResourceInner {
    attrs: HashMap<Key, Value>,
    schema_url: Option<String>,
}

impl Resource {
    /// Creates a [ResourceBuilder].
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder {
            resource: Resource::empty(),
        }
    }

    /// A resource with no attributes.
    pub fn empty() -> Self {
        Resource::default()
    }

    fn from_attributes<T: IntoIterator<Item = KeyValue>>(kvs: T, schema_url: Option<String>) -> Self {
        let attrs = kvs.into_iter().map(|kv| (kv.key, kv.value)).collect();
        Resource {
            inner: Arc::new(ResourceInner { attrs, schema_url }),
        }
    }

    /// Creates a new resource from both `self` and `other`.
    ///
    /// Values from `other` replace values of `self` with the same key. The
    /// schema URL of `other` wins when set.
    pub fn merge(&self, other: &Resource) -> Self {
        if self.is_empty() && self.schema_url().is_none() {
            return other.clone();
        }
        if other.is_empty() && other.schema_url().is_none() {
            return self.clone();
        }
        let mut attrs = self.inner.attrs.clone();
        attrs.extend(other.inner.attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        let schema_url = other
            .inner
            .schema_url
            .clone()
            .or_else(|| self.inner.schema_url.clone());
        Resource {
            inner: Arc::new(ResourceInner { attrs, schema_url }),
        }
    }

    /// The schema URL of the resource, if any.
    pub fn schema_url(&self) -> Option<&str> {
        self.inner.schema_url.as_deref()
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.inner.attrs.len()
    }

    /// Returns `true` if the resource has no attributes.
    pub fn is_empty(&self) -> bool {
        self.inner.attrs.is_empty()
    }

    /// Iterates over the attributes, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.inner.attrs.iter()
    }

    /// Retrieves the value of an attribute.
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.inner.attrs.get(key).cloned()
    }
}

/// Builder for [Resource].
#[derive(Debug)]
pub struct ResourceBuilder {
    resource: Resource,
}

impl ResourceBuilder {
    /// Adds a single attribute.
    pub fn with_attribute(self, kv: KeyValue) -> Self {
        self.with_attributes([kv])
    }

    /// Adds attributes; later values replace earlier ones with the same key.
    pub fn with_attributes<T: IntoIterator<Item = KeyValue>>(mut self, kvs: T) -> Self {
        self.resource = self.resource.merge(&Resource::from_attributes(kvs, None));
        self
    }

    /// Sets the schema URL.
    pub fn with_schema_url(mut self, schema_url: impl Into<String>) -> Self {
        self.resource = Resource {
            inner: Arc::new(ResourceInner {
                attrs: self.resource.inner.attrs.clone(),
                schema_url: Some(schema_url.into()),
            }),
        };
        self
    }

    /// Creates the [Resource].
    pub fn build(self) -> Resource {
        self.resource
    }
}
