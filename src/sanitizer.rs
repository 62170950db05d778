//! Extraction of caller-defined context attributes for export.
use serde::{Deserialize, Serialize};

use crate::{
    context::{DEFAULT_KIND, MULTI_KIND},
    error::ContextExtractionError,
    AttributeValue, Attributes, EvaluationContext,
};

/// Attribute names that belong to the SDK rather than to the caller. They are never exported.
pub const RESERVED_ATTRIBUTES: &[&str] = &[
    "_meta",
    "privateAttributes",
    "private_attributes",
    "_private_attributes",
    "valid",
    "error",
    "multiple",
    "fully_qualified_key",
    "fullyQualifiedKey",
    "individual_context_count",
    "DEFAULT_KIND",
    "MULTI_KIND",
];

/// Context attributes that are safe to export: `key`, `kind` and caller-defined attributes.
///
/// Every attribute value is JSON-encodable. `kind` is absent only in the minimal record produced
/// when extraction fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedContext {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(flatten)]
    attributes: Attributes,
}

impl SanitizedContext {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Caller-defined attributes, without `key` and `kind`.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Fallback record for contexts that could not be extracted.
    fn minimal(context: &EvaluationContext) -> SanitizedContext {
        let key = match context.get("key") {
            Some(AttributeValue::String(key)) => key.clone(),
            Some(other) => serde_json::to_string(other).unwrap_or_default(),
            None => String::new(),
        };

        let mut attributes = Attributes::new();
        if let Some(name @ AttributeValue::String(_)) = context.get("name") {
            attributes.insert("name".to_owned(), name.clone());
        }

        SanitizedContext {
            key,
            kind: None,
            attributes,
        }
    }
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_ATTRIBUTES.contains(&name)
}

/// Extract exportable attributes from `context`, falling back to a minimal record (`key` and,
/// when available, `name`) if the context is malformed.
pub fn extract(context: &EvaluationContext) -> SanitizedContext {
    try_extract(context).unwrap_or_else(|err| {
        log::warn!(target: "experiment_firehose",
                   context_key = context.key();
                   "unable to extract evaluation context, exporting minimal record: {:?}", err);
        SanitizedContext::minimal(context)
    })
}

/// Extract exportable attributes from `context`.
///
/// Attributes that cannot be encoded as JSON are dropped one by one. Only the shape of the
/// context itself (`key`/`kind`) can fail the extraction.
pub fn try_extract(
    context: &EvaluationContext,
) -> std::result::Result<SanitizedContext, ContextExtractionError> {
    let key = match context.get("key") {
        Some(AttributeValue::String(key)) => key.clone(),
        Some(_) => return Err(ContextExtractionError::InvalidKey),
        None => return Err(ContextExtractionError::MissingKey),
    };

    let kind = match context.get("kind") {
        None => DEFAULT_KIND.to_owned(),
        Some(AttributeValue::String(kind)) if kind == MULTI_KIND => {
            return Err(ContextExtractionError::MultiKind)
        }
        Some(AttributeValue::String(kind)) => kind.clone(),
        Some(_) => return Err(ContextExtractionError::InvalidKind),
    };

    let mut attributes = Attributes::new();
    for (name, value) in context.attributes() {
        if name == "key" || name == "kind" || is_reserved(name) {
            continue;
        }
        if !value.is_json_encodable() {
            log::warn!(target: "experiment_firehose",
                       context_key:display = key,
                       attribute = name.as_str();
                       "dropping context attribute that cannot be encoded as JSON");
            continue;
        }
        attributes.insert(name.clone(), value.clone());
    }

    Ok(SanitizedContext {
        key,
        kind: Some(kind),
        attributes,
    })
}
