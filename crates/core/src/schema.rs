//! Structural validation of generation output. Stage descriptors are JSON
//! Schema documents kept as plain `serde_json::Value` data.

use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{path}: {}", self.message)
    }
}

impl std::error::Error for SchemaViolation {}

/// Validates `value` against the descriptor and reports the first violation
/// with the JSON pointer of the offending instance.
pub fn validate(schema: &Value, value: &Value) -> Result<(), SchemaViolation> {
    let validator = jsonschema::validator_for(schema).map_err(|error| SchemaViolation {
        path: "#schema".to_string(),
        message: error.to_string(),
    })?;

    validator.validate(value).map_err(|error| SchemaViolation {
        path: error.instance_path.to_string(),
        message: error.to_string(),
    })
}

pub fn query_plan_schema(max_queries: usize) -> Value {
    json!({
        "type": "object",
        "required": ["queries"],
        "properties": {
            "queries": {
                "type": "array",
                "minItems": 1,
                "maxItems": max_queries,
                "items": {
                    "type": "object",
                    "required": ["facet", "terms"],
                    "properties": {
                        "facet": {
                            "type": "string",
                            "enum": ["problem", "method", "domain", "broad"]
                        },
                        "terms": {
                            "type": "array",
                            "minItems": 1,
                            "maxItems": 4,
                            "items": { "type": "string", "minLength": 1 }
                        },
                        "filters": {
                            "type": ["object", "null"],
                            "properties": {
                                "category": { "type": ["string", "null"] },
                                "published_after": { "type": ["string", "null"] }
                            }
                        }
                    }
                }
            }
        }
    })
}

pub fn ranking_schema(max_selections: usize) -> Value {
    json!({
        "type": "object",
        "required": ["selections"],
        "properties": {
            "selections": {
                "type": "array",
                "maxItems": max_selections,
                "items": {
                    "type": "object",
                    "required": ["identifier", "relevance", "justification"],
                    "properties": {
                        "identifier": { "type": "string", "pattern": "\\S" },
                        "relevance": {
                            "type": "string",
                            "enum": ["high", "medium", "low", "irrelevant"]
                        },
                        "justification": { "type": "string" }
                    }
                }
            }
        }
    })
}

pub fn finding_schema() -> Value {
    json!({
        "type": "object",
        "required": ["overlap_dimensions", "severity", "cited_excerpt", "rationale"],
        "properties": {
            "overlap_dimensions": {
                "type": "array",
                "maxItems": 4,
                "items": {
                    "type": "string",
                    "enum": ["problem", "methodology", "domain", "innovation_claim"]
                }
            },
            "severity": {
                "type": "string",
                "enum": ["none", "low", "medium", "high"]
            },
            "cited_excerpt": { "type": "string" },
            "rationale": { "type": "string", "pattern": "\\S" }
        }
    })
}

pub fn synthesis_schema(sentence_count: usize) -> Value {
    json!({
        "type": "object",
        "required": ["sentence_labels", "overall_rationale"],
        "properties": {
            "sentence_labels": {
                "type": "array",
                "maxItems": sentence_count,
                "items": {
                    "type": "object",
                    "required": ["sentence_index", "originality", "supporting_paper_ids", "explanation"],
                    "properties": {
                        "sentence_index": {
                            "type": "integer",
                            "minimum": 0,
                            "maximum": sentence_count.saturating_sub(1)
                        },
                        "originality": {
                            "type": "string",
                            "enum": ["high", "medium", "low"]
                        },
                        "supporting_paper_ids": {
                            "type": "array",
                            "items": { "type": "string" }
                        },
                        "explanation": { "type": "string" }
                    }
                }
            },
            "overall_rationale": { "type": "string", "pattern": "\\S" }
        }
    })
}
