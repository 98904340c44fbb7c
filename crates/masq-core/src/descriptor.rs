//! # Persisted request descriptors
//!
//! Serde model for the two documents that configure an export request:
//! `query.json` (connection, attributes, conditions) and `options.json`
//! (per-column anonymization rules). Loading performs structural validation
//! only — semantic checks happen in the planner and the rule binder.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Connection parameters for the export target database.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnSpec {
    pub host: String,
    pub port: String,
    pub user: String,
    pub pwd: String,
    pub database: String,
    pub table: String,
}

/// Per-attribute export settings.
///
/// Attributes are keyed by column name. `BTreeMap` gives the stable
/// iteration order shared by the SELECT projection and the transformer
/// binding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeSpec {
    pub is_export: bool,
    #[serde(default)]
    pub is_pii: bool,
    #[serde(default)]
    pub is_consent_skip: bool,
    #[serde(default)]
    pub consent_database: String,
    #[serde(default)]
    pub consent_table: String,
    /// Consent validity window in months.
    #[serde(default)]
    pub legal_duration: f64,
}

/// Comparison operator of a user condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "not like")]
    NotLike,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Like => "like",
            Self::NotLike => "not like",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

/// Connective joining a condition to the preceding one.
/// Ignored on the first condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum Connective {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl Connective {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// One user-supplied predicate of the WHERE clause.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionSpec {
    pub attribute: String,
    pub operator: Operator,
    pub value: String,
    /// `false` turns the value into a bound parameter.
    pub fixed: bool,
    #[serde(default)]
    pub connection: Connective,
}

/// The `query.json` document.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryDescriptor {
    pub conn: ConnSpec,
    pub attributes: BTreeMap<String, AttributeSpec>,
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
}

/// Method-specific parameters of an anonymization rule.
///
/// The persisted form keeps the numeric and boolean knobs as strings
/// (except `position`); they are parsed when the rule is bound and parse
/// failures reject the configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleOptions {
    pub algorithm: Option<String>,
    pub digest: Option<String>,
    pub key: Option<String>,
    pub position: i32,
    pub lower: Option<String>,
    pub upper: Option<String>,
    pub bin: Option<String>,
    pub fore: Option<String>,
    pub aft: Option<String>,
    pub mask_char: Option<String>,
    pub keep_length: Option<String>,
}

/// One entry of the `options.json` document.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnRule {
    pub method: String,
    #[serde(default)]
    pub options: RuleOptions,
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub description: String,
}

/// The `options.json` document: column name → anonymization rule.
pub type AnonymizationDescriptor = BTreeMap<String, ColumnRule>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_descriptor_round_trip() {
        let raw = r#"{
            "conn": {
                "host": "db.internal", "port": "5432", "user": "export",
                "pwd": "secret", "database": "crm", "table": "profiles"
            },
            "attributes": {
                "email": {
                    "isExport": true, "isPii": true, "isConsentSkip": false,
                    "consentDatabase": "crm", "consentTable": "consents",
                    "legalDuration": 6
                },
                "age": { "isExport": true }
            },
            "conditions": [
                { "attribute": "age", "operator": ">=", "value": "20", "fixed": true, "connection": "AND" }
            ]
        }"#;

        let descriptor: QueryDescriptor = serde_json::from_str(raw).unwrap();
        assert_eq!(descriptor.conn.table, "profiles");
        assert_eq!(descriptor.attributes.len(), 2);
        assert!(descriptor.attributes["email"].is_pii);
        assert!(!descriptor.attributes["age"].is_pii);
        assert_eq!(descriptor.conditions[0].operator, Operator::Gte);
    }

    #[test]
    fn test_attribute_order_is_lexicographic() {
        let raw = r#"{
            "conn": { "host": "h", "port": "5432", "user": "u", "pwd": "p", "database": "d", "table": "t" },
            "attributes": {
                "zeta": { "isExport": true },
                "alpha": { "isExport": true },
                "mid": { "isExport": true }
            }
        }"#;

        let descriptor: QueryDescriptor = serde_json::from_str(raw).unwrap();
        let names: Vec<&str> = descriptor.attributes.keys().map(String::as_str).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let raw = r#"{ "attribute": "a", "operator": "<>", "value": "1", "fixed": true }"#;
        assert!(serde_json::from_str::<ConditionSpec>(raw).is_err());
    }

    #[test]
    fn test_anonymization_descriptor_defaults() {
        let raw = r#"{
            "email": {
                "method": "encryption",
                "options": { "algorithm": "hmac", "digest": "sha256", "key": "k" },
                "level": 3,
                "description": "mail hash"
            },
            "name": { "method": "non" }
        }"#;

        let rules: AnonymizationDescriptor = serde_json::from_str(raw).unwrap();
        assert_eq!(rules["email"].options.algorithm.as_deref(), Some("hmac"));
        assert_eq!(rules["name"].method, "non");
        assert_eq!(rules["name"].level, 0);
    }
}
