//! # Anonymization rule engine
//!
//! Turns the `options.json` document into a *function vector*: one
//! `string → string` transform per result-set column, bound once per request
//! and then applied concurrently by the transformer pool.
//!
//! Binding is strict: a rule whose parameters do not parse (unknown
//! algorithm, non-numeric bounds, empty mask character) rejects the whole
//! configuration instead of leaking diagnostic strings into exported cells.
//! Per-cell failures that depend on the data itself (a non-numeric value
//! reaching a numeric rule) still yield the `parseFloat error:` sentinel.

use crate::descriptor::{AnonymizationDescriptor, RuleOptions};
use crate::Row;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A bound per-column transform.
pub type Transform = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Rule parameters that failed to parse at bind time.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("column `{column}`: {reason}")]
pub struct BindError {
    pub column: String,
    pub reason: String,
}

/// The function vector for one request, aligned with the column order.
pub struct RuleSet {
    transforms: Vec<Transform>,
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("transforms", &format!("<{} transform(s)>", self.transforms.len()))
            .finish()
    }
}

impl RuleSet {
    /// Bind one transform per column.
    ///
    /// Columns absent from the descriptor and columns with method `non`
    /// pass through unchanged; an unrecognized method drops the cell to the
    /// empty string.
    pub fn bind(
        columns: &[String],
        descriptor: &AnonymizationDescriptor,
    ) -> Result<Self, BindError> {
        let mut transforms: Vec<Transform> = Vec::with_capacity(columns.len());
        for column in columns {
            let transform = match descriptor.get(column) {
                None => identity(),
                Some(rule) => match rule.method.as_str() {
                    "non" => identity(),
                    "encryption" => bind_encryption(&rule.options).map_err(|reason| {
                        BindError {
                            column: column.clone(),
                            reason,
                        }
                    })?,
                    "rounding" => bind_rounding(&rule.options).map_err(|reason| BindError {
                        column: column.clone(),
                        reason,
                    })?,
                    "data_range" => bind_data_range(&rule.options).map_err(|reason| {
                        BindError {
                            column: column.clone(),
                            reason,
                        }
                    })?,
                    "blank_impute" | "pii_reduction" => {
                        bind_masking(&rule.options).map_err(|reason| BindError {
                            column: column.clone(),
                            reason,
                        })?
                    }
                    _ => drop_cell(),
                },
            };
            transforms.push(transform);
        }
        Ok(Self { transforms })
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Apply entry *i* of the vector to cell *i*.
    pub fn apply(&self, row: &[String]) -> Row {
        self.transforms
            .iter()
            .zip(row)
            .map(|(transform, cell)| transform(cell))
            .collect()
    }
}

fn identity() -> Transform {
    Box::new(|input: &str| input.to_string())
}

fn drop_cell() -> Transform {
    Box::new(|_: &str| String::new())
}

// =============================================================================
// encryption
// =============================================================================

fn bind_encryption(options: &RuleOptions) -> Result<Transform, String> {
    match options.algorithm.as_deref().unwrap_or("") {
        "hmac" => {
            let key = options.key.clone().unwrap_or_default().into_bytes();
            // Digest state is created per call; MAC instances must not be
            // shared across concurrent invocations.
            match options.digest.as_deref() {
                Some("md5") => Ok(Box::new(move |input: &str| {
                    let mut mac = Hmac::<Md5>::new_from_slice(&key)
                        .expect("HMAC accepts keys of any length");
                    mac.update(input.as_bytes());
                    hex::encode(mac.finalize().into_bytes())
                })),
                _ => Ok(Box::new(move |input: &str| {
                    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
                        .expect("HMAC accepts keys of any length");
                    mac.update(input.as_bytes());
                    hex::encode(mac.finalize().into_bytes())
                })),
            }
        }
        "hash(sha256)" => Ok(Box::new(|input: &str| {
            hex::encode(Sha256::digest(input.as_bytes()))
        })),
        "hash(md5)" => Ok(Box::new(|input: &str| hex::encode(Md5::digest(input.as_bytes())))),
        other => Err(format!("unknown encryption algorithm `{other}`")),
    }
}

// =============================================================================
// rounding
// =============================================================================

fn bind_rounding(options: &RuleOptions) -> Result<Transform, String> {
    let op: fn(f64) -> f64 = match options.algorithm.as_deref().unwrap_or("") {
        "round" => f64::round,
        "ceil" => f64::ceil,
        "floor" => f64::floor,
        other => return Err(format!("unknown rounding algorithm `{other}`")),
    };
    let position = options.position;
    let scale = 10f64.powi(position.abs());

    Ok(Box::new(move |input: &str| match input.parse::<f64>() {
        Ok(value) => {
            if position > 0 {
                format!("{:.*}", position as usize, op(value * scale) / scale)
            } else {
                format!("{:.0}", op(value / scale) * scale)
            }
        }
        Err(_) => format!("parseFloat error:{input}"),
    }))
}

// =============================================================================
// data_range
// =============================================================================

fn bind_data_range(options: &RuleOptions) -> Result<Transform, String> {
    let lower = parse_f64(options.lower.as_deref(), "lower")?;
    let upper = parse_f64(options.upper.as_deref(), "upper")?;
    let bin = parse_i64(options.bin.as_deref(), "bin")?;
    if bin <= 0 {
        return Err(format!("bin must be positive, got {bin}"));
    }
    if upper < lower {
        return Err(format!("upper {upper} is below lower {lower}"));
    }

    let mut boundaries: Vec<f64> = (0..bin)
        .map(|i| lower + ((upper - lower) / bin as f64) * i as f64)
        .collect();
    boundaries.push(upper);

    Ok(Box::new(move |input: &str| match input.parse::<f64>() {
        Ok(value) => {
            let mut previous = String::new();
            for boundary in &boundaries {
                if *boundary > value {
                    return format!("{previous} ~ {boundary}");
                }
                previous = boundary.to_string();
            }
            format!("{previous} ~ ")
        }
        Err(_) => format!("parseFloat error:{input}"),
    }))
}

// =============================================================================
// blank_impute / pii_reduction
// =============================================================================

fn bind_masking(options: &RuleOptions) -> Result<Transform, String> {
    let fore = parse_usize(options.fore.as_deref(), "fore")?;
    let aft = parse_usize(options.aft.as_deref(), "aft")?;
    let keep_length = parse_bool(options.keep_length.as_deref(), "keepLength")?;
    let mask_char = options.mask_char.clone().unwrap_or_default();
    if mask_char.is_empty() {
        return Err("maskChar must not be empty".to_string());
    }
    let mask_unit = mask_char.chars().count();

    Ok(Box::new(move |input: &str| {
        if input.is_empty() {
            return String::new();
        }
        let chars: Vec<char> = input.chars().collect();
        if chars.len() < fore + aft {
            return String::new();
        }

        let prefix: String = chars[..fore].iter().collect();
        let suffix: String = chars[chars.len() - aft..].iter().collect();
        if keep_length {
            let masked_len = chars.len() - fore - aft;
            let repeats = masked_len.div_ceil(mask_unit);
            let mask: String = mask_char.repeat(repeats).chars().take(masked_len).collect();
            format!("{prefix}{mask}{suffix}")
        } else {
            format!("{prefix}{mask_char}{suffix}")
        }
    }))
}

// =============================================================================
// Parameter parsing
// =============================================================================

fn parse_f64(raw: Option<&str>, name: &str) -> Result<f64, String> {
    raw.unwrap_or("")
        .parse::<f64>()
        .map_err(|_| format!("{name} parameter is not a number"))
}

fn parse_i64(raw: Option<&str>, name: &str) -> Result<i64, String> {
    raw.unwrap_or("")
        .parse::<i64>()
        .map_err(|_| format!("{name} parameter is not an integer"))
}

fn parse_usize(raw: Option<&str>, name: &str) -> Result<usize, String> {
    raw.unwrap_or("")
        .parse::<usize>()
        .map_err(|_| format!("{name} parameter is not a non-negative integer"))
}

fn parse_bool(raw: Option<&str>, name: &str) -> Result<bool, String> {
    match raw.unwrap_or("") {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(format!("{name} parameter is not a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::AnonymizationDescriptor;

    fn rules(raw: &str) -> AnonymizationDescriptor {
        serde_json::from_str(raw).unwrap()
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn single(descriptor: &AnonymizationDescriptor, column: &str, input: &str) -> String {
        let set = RuleSet::bind(&columns(&[column]), descriptor).unwrap();
        set.apply(&[input.to_string()])[0].clone()
    }

    #[test]
    fn test_absent_column_passes_through() {
        let descriptor = rules("{}");
        assert_eq!(single(&descriptor, "id", "value"), "value");
    }

    #[test]
    fn test_non_method_passes_through() {
        let descriptor = rules(r#"{ "id": { "method": "non" } }"#);
        assert_eq!(single(&descriptor, "id", "\u{1F512} as-is"), "\u{1F512} as-is");
    }

    #[test]
    fn test_unknown_method_drops_cell() {
        let descriptor = rules(r#"{ "id": { "method": "redact_v2" } }"#);
        assert_eq!(single(&descriptor, "id", "anything"), "");
    }

    #[test]
    fn test_hmac_sha256() {
        let descriptor = rules(
            r#"{ "email": { "method": "encryption",
                "options": { "algorithm": "hmac", "digest": "sha256", "key": "k" } } }"#,
        );
        assert_eq!(
            single(&descriptor, "email", "a@b"),
            "2307c9d8a720b996aee3b10119d6e349fc29c231016c75073ca7ce4ebbca7161"
        );
    }

    #[test]
    fn test_hmac_md5() {
        let descriptor = rules(
            r#"{ "email": { "method": "encryption",
                "options": { "algorithm": "hmac", "digest": "md5", "key": "k" } } }"#,
        );
        assert_eq!(
            single(&descriptor, "email", "a@b"),
            "b11492a82f7259ee592d293e9777c07c"
        );
    }

    #[test]
    fn test_hmac_digest_defaults_to_sha256() {
        let descriptor = rules(
            r#"{ "email": { "method": "encryption",
                "options": { "algorithm": "hmac", "key": "k" } } }"#,
        );
        assert_eq!(
            single(&descriptor, "email", "a@b"),
            "2307c9d8a720b996aee3b10119d6e349fc29c231016c75073ca7ce4ebbca7161"
        );
    }

    #[test]
    fn test_plain_hashes() {
        let sha = rules(
            r#"{ "c": { "method": "encryption", "options": { "algorithm": "hash(sha256)" } } }"#,
        );
        assert_eq!(
            single(&sha, "c", "a@b"),
            "7508d8b5018ea640b85269861a101203f0c26900555268e930025dac844b0f35"
        );
        let md = rules(
            r#"{ "c": { "method": "encryption", "options": { "algorithm": "hash(md5)" } } }"#,
        );
        assert_eq!(single(&md, "c", "a@b"), "a1ca0ed6e42a23f4758e8a3f6b54de58");
    }

    #[test]
    fn test_digest_state_is_not_carried_between_calls() {
        let descriptor = rules(
            r#"{ "c": { "method": "encryption", "options": { "algorithm": "hash(sha256)" } } }"#,
        );
        let set = RuleSet::bind(&columns(&["c"]), &descriptor).unwrap();
        let first = set.apply(&["hello".to_string()])[0].clone();
        let _ = set.apply(&["noise".to_string()]);
        let again = set.apply(&["hello".to_string()])[0].clone();
        assert_eq!(first, again);
        assert_eq!(
            first,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_unknown_encryption_algorithm_rejects_binding() {
        let descriptor = rules(
            r#"{ "c": { "method": "encryption", "options": { "algorithm": "rot13" } } }"#,
        );
        let err = RuleSet::bind(&columns(&["c"]), &descriptor).unwrap_err();
        assert_eq!(err.column, "c");
        assert!(err.reason.contains("rot13"));
    }

    #[test]
    fn test_rounding_floor_negative_position() {
        let descriptor = rules(
            r#"{ "n": { "method": "rounding",
                "options": { "algorithm": "floor", "position": -2 } } }"#,
        );
        assert_eq!(single(&descriptor, "n", "12345.6"), "12300");
        assert_eq!(single(&descriptor, "n", "99"), "0");
    }

    #[test]
    fn test_rounding_positive_position_keeps_fractional_digits() {
        let descriptor = rules(
            r#"{ "n": { "method": "rounding",
                "options": { "algorithm": "round", "position": 2 } } }"#,
        );
        assert_eq!(single(&descriptor, "n", "3.14159"), "3.14");
        assert_eq!(single(&descriptor, "n", "2"), "2.00");
    }

    #[test]
    fn test_rounding_ceil() {
        let descriptor = rules(
            r#"{ "n": { "method": "rounding",
                "options": { "algorithm": "ceil", "position": 1 } } }"#,
        );
        assert_eq!(single(&descriptor, "n", "2.0001"), "2.1");
    }

    #[test]
    fn test_rounding_parse_failure_is_per_cell() {
        let descriptor = rules(
            r#"{ "n": { "method": "rounding",
                "options": { "algorithm": "round", "position": 0 } } }"#,
        );
        assert_eq!(single(&descriptor, "n", "n/a"), "parseFloat error:n/a");
    }

    #[test]
    fn test_unknown_rounding_algorithm_rejects_binding() {
        let descriptor = rules(
            r#"{ "n": { "method": "rounding", "options": { "algorithm": "trunc" } } }"#,
        );
        assert!(RuleSet::bind(&columns(&["n"]), &descriptor).is_err());
    }

    #[test]
    fn test_data_range_bins() {
        let descriptor = rules(
            r#"{ "v": { "method": "data_range",
                "options": { "lower": "0", "upper": "100", "bin": "4" } } }"#,
        );
        assert_eq!(single(&descriptor, "v", "37"), "25 ~ 50");
        assert_eq!(single(&descriptor, "v", "0"), "0 ~ 25");
        assert_eq!(single(&descriptor, "v", "100"), "100 ~ ");
        assert_eq!(single(&descriptor, "v", "-3"), " ~ 0");
        assert_eq!(single(&descriptor, "v", "120"), "100 ~ ");
    }

    #[test]
    fn test_data_range_parse_failure_is_per_cell() {
        let descriptor = rules(
            r#"{ "v": { "method": "data_range",
                "options": { "lower": "0", "upper": "10", "bin": "2" } } }"#,
        );
        assert_eq!(single(&descriptor, "v", "oops"), "parseFloat error:oops");
    }

    #[test]
    fn test_data_range_bad_parameters_reject_binding() {
        for options in [
            r#"{ "lower": "x", "upper": "10", "bin": "2" }"#,
            r#"{ "lower": "0", "upper": "10", "bin": "0" }"#,
            r#"{ "lower": "10", "upper": "0", "bin": "2" }"#,
        ] {
            let descriptor = rules(&format!(
                r#"{{ "v": {{ "method": "data_range", "options": {options} }} }}"#
            ));
            assert!(RuleSet::bind(&columns(&["v"]), &descriptor).is_err());
        }
    }

    #[test]
    fn test_masking_keep_length() {
        let descriptor = rules(
            r#"{ "m": { "method": "pii_reduction",
                "options": { "fore": "2", "aft": "2", "maskChar": "*", "keepLength": "true" } } }"#,
        );
        assert_eq!(single(&descriptor, "m", "abcdef"), "ab**ef");
        assert_eq!(single(&descriptor, "m", "ab"), "");
        assert_eq!(single(&descriptor, "m", ""), "");
        assert_eq!(single(&descriptor, "m", "abcd"), "abcd");
    }

    #[test]
    fn test_masking_single_mask_char() {
        let descriptor = rules(
            r#"{ "m": { "method": "blank_impute",
                "options": { "fore": "2", "aft": "2", "maskChar": "*", "keepLength": "false" } } }"#,
        );
        assert_eq!(single(&descriptor, "m", "abcdef"), "ab*ef");
        assert_eq!(single(&descriptor, "m", "abcdefghij"), "ab*ij");
    }

    #[test]
    fn test_masking_multichar_mask_truncates_to_middle_length() {
        let descriptor = rules(
            r#"{ "m": { "method": "pii_reduction",
                "options": { "fore": "1", "aft": "1", "maskChar": "ab", "keepLength": "true" } } }"#,
        );
        // middle is 3 chars: "ab" repeated twice then cut to 3.
        assert_eq!(single(&descriptor, "m", "xyzzy"), "xabay");
    }

    #[test]
    fn test_masking_counts_characters_not_bytes() {
        let descriptor = rules(
            r#"{ "m": { "method": "pii_reduction",
                "options": { "fore": "1", "aft": "1", "maskChar": "*", "keepLength": "true" } } }"#,
        );
        assert_eq!(single(&descriptor, "m", "가나다라마바"), "가****바");
    }

    #[test]
    fn test_masking_bad_parameters_reject_binding() {
        for options in [
            r#"{ "fore": "x", "aft": "2", "maskChar": "*", "keepLength": "true" }"#,
            r#"{ "fore": "1", "aft": "2", "maskChar": "", "keepLength": "true" }"#,
            r#"{ "fore": "1", "aft": "2", "maskChar": "*", "keepLength": "maybe" }"#,
        ] {
            let descriptor = rules(&format!(
                r#"{{ "m": {{ "method": "pii_reduction", "options": {options} }} }}"#
            ));
            assert!(RuleSet::bind(&columns(&["m"]), &descriptor).is_err());
        }
    }

    #[test]
    fn test_binding_is_deterministic() {
        let descriptor = rules(
            r#"{
                "email": { "method": "encryption",
                    "options": { "algorithm": "hmac", "digest": "sha256", "key": "k" } },
                "age": { "method": "rounding",
                    "options": { "algorithm": "floor", "position": -1 } }
            }"#,
        );
        let cols = columns(&["email", "age", "name"]);
        let first = RuleSet::bind(&cols, &descriptor).unwrap();
        let second = RuleSet::bind(&cols, &descriptor).unwrap();
        let row = vec!["a@b".to_string(), "47".to_string(), "kim".to_string()];
        assert_eq!(first.apply(&row), second.apply(&row));
    }

    #[test]
    fn test_apply_preserves_arity_and_order() {
        let descriptor = rules(r#"{ "b": { "method": "drop_me" } }"#);
        let set = RuleSet::bind(&columns(&["a", "b", "c"]), &descriptor).unwrap();
        assert_eq!(set.len(), 3);
        let out = set.apply(&[
            "1".to_string(),
            "secret".to_string(),
            "3".to_string(),
        ]);
        assert_eq!(out, vec!["1".to_string(), String::new(), "3".to_string()]);
    }
}
