use crate::{AttributeValue, Attributes};

/// Kind assumed for contexts that don't carry an explicit `kind` attribute.
pub const DEFAULT_KIND: &str = "user";
/// Kind of a context that bundles several single-kind contexts.
pub const MULTI_KIND: &str = "multi";

/// A caller-constructed evaluation context: `key`, `kind` and any custom attributes.
///
/// The context is an open attribute bag. `key` and `kind` are stored as regular attributes, so a
/// context can be assembled from arbitrary (possibly malformed) data with
/// [`EvaluationContext::from_attributes`].
///
/// ```
/// # use experiment_firehose::EvaluationContext;
/// let context = EvaluationContext::new("u1")
///     .kind("user")
///     .set("tier", "gold");
/// assert_eq!(context.key(), Some("u1"));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EvaluationContext {
    attributes: Attributes,
}

impl EvaluationContext {
    /// Create a context of [`DEFAULT_KIND`] with the given key.
    pub fn new(key: impl Into<String>) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert("key".to_owned(), AttributeValue::String(key.into()));
        attributes.insert("kind".to_owned(), DEFAULT_KIND.into());
        EvaluationContext { attributes }
    }

    /// Wrap an existing attribute map without validation.
    pub fn from_attributes(attributes: Attributes) -> Self {
        EvaluationContext { attributes }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.attributes
            .insert("kind".to_owned(), AttributeValue::String(kind.into()));
        self
    }

    /// Set an attribute, replacing any previous value with the same name.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.get("key").and_then(AttributeValue::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}
