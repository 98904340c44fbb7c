//! # Query planner
//!
//! Compiles a [`QueryDescriptor`] into the three statements the pipeline
//! needs: the base SELECT, the COUNT variant used to size the reader pool,
//! and the paged variant with a trailing `LIMIT $n OFFSET $m`.
//!
//! Exported attributes are projected in descriptor iteration order; that
//! same order is what the database reports back as the result-set columns,
//! so the transformer binding downstream sees the projection order again.

use crate::descriptor::{Operator, QueryDescriptor};
use thiserror::Error;

/// Semantic descriptor problems detected while planning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("no exported attributes in query descriptor")]
    NoExportedAttributes,
    #[error("attribute `{attribute}` requires consent checks but names no consent table")]
    MissingConsentTable { attribute: String },
    #[error(
        "attribute `{attribute}` declares consent table `{got}` but `{first}` is already in use"
    )]
    MultipleConsentTables {
        attribute: String,
        first: String,
        got: String,
    },
}

/// The compiled statements for one export request.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// `SELECT <projections> FROM <base> [INNER JOIN ...] [WHERE ...]`
    pub base_sql: String,
    /// Same statement with the projection replaced by `COUNT(*)`.
    pub count_sql: String,
    /// Base statement plus the pagination suffix.
    pub paged_sql: String,
    /// Projected column names, in SELECT order.
    pub projected: Vec<String>,
    /// Number of bound condition parameters preceding limit/offset.
    pub condition_params: usize,
}

/// Build the query plan for a descriptor.
pub fn build(descriptor: &QueryDescriptor) -> Result<QueryPlan, PlanError> {
    let base_table = format!("{}.{}", descriptor.conn.database, descriptor.conn.table);

    // Projection and consent clauses share the attribute iteration order.
    let mut projections = Vec::new();
    let mut projected = Vec::new();
    let mut consent_table: Option<String> = None;
    let mut consent_clauses = Vec::new();

    for (column, attribute) in &descriptor.attributes {
        if !attribute.is_export {
            continue;
        }
        projections.push(format!("{base_table}.{column}"));
        projected.push(column.clone());

        if attribute.is_pii && !attribute.is_consent_skip {
            if attribute.consent_database.is_empty() || attribute.consent_table.is_empty() {
                return Err(PlanError::MissingConsentTable {
                    attribute: column.clone(),
                });
            }
            let qualified = format!(
                "{}.{}",
                attribute.consent_database, attribute.consent_table
            );
            match &consent_table {
                None => consent_table = Some(qualified.clone()),
                Some(first) if *first != qualified => {
                    return Err(PlanError::MultipleConsentTables {
                        attribute: column.clone(),
                        first: first.clone(),
                        got: qualified,
                    });
                }
                Some(_) => {}
            }
            consent_clauses.push(format!(
                "{qualified}.{column} = 1 AND ADD_MONTHS(TO_DATE({base_table}.LAST_ACCESSED), {:.0}) > NOW()",
                attribute.legal_duration
            ));
        }
    }

    if projections.is_empty() {
        return Err(PlanError::NoExportedAttributes);
    }

    // User conditions. Non-fixed equality and ordering predicates become
    // numbered bound parameters; `like` keeps its placeholder inside the
    // pattern literal, as the source dialect spelled it.
    let mut condition_params = 0usize;
    let mut user_sql = String::new();
    for (index, condition) in descriptor.conditions.iter().enumerate() {
        if index > 0 {
            user_sql.push(' ');
            user_sql.push_str(condition.connection.as_sql());
        }
        if !user_sql.is_empty() {
            user_sql.push(' ');
        }

        let lhs = format!("{base_table}.{}", condition.attribute);
        let operator = condition.operator.as_sql();
        let rendered = match condition.operator {
            Operator::Like | Operator::NotLike => {
                if condition.fixed {
                    format!("'%{}%'", condition.value)
                } else {
                    "'%?%'".to_string()
                }
            }
            Operator::Eq | Operator::Neq => {
                if !condition.fixed {
                    condition_params += 1;
                    format!("${condition_params}")
                } else if condition.value.parse::<f64>().is_ok() {
                    condition.value.clone()
                } else {
                    format!("'{}'", condition.value)
                }
            }
            _ => {
                if condition.fixed {
                    condition.value.clone()
                } else {
                    condition_params += 1;
                    format!("${condition_params}")
                }
            }
        };

        user_sql.push_str(&format!("{lhs} {operator} {rendered}"));
    }

    // FROM clause shared verbatim by the base and COUNT statements.
    let mut from_sql = base_table.clone();
    if let Some(consent) = &consent_table {
        from_sql.push_str(&format!(
            " INNER JOIN {consent} ON {base_table}.PROFILES_ID = {consent}.PROFILES_ID"
        ));
    }
    let consent_sql = consent_clauses.join(" AND ");
    match (consent_sql.is_empty(), user_sql.is_empty()) {
        (true, true) => {}
        (false, true) => from_sql.push_str(&format!(" WHERE {consent_sql}")),
        (true, false) => from_sql.push_str(&format!(" WHERE {user_sql}")),
        (false, false) => from_sql.push_str(&format!(" WHERE {consent_sql} AND {user_sql}")),
    }

    let base_sql = format!("SELECT {} FROM {from_sql}", projections.join(", "));
    let count_sql = format!("SELECT COUNT(*) FROM {from_sql}");
    let paged_sql = format!(
        "{base_sql} LIMIT ${} OFFSET ${}",
        condition_params + 1,
        condition_params + 2
    );

    Ok(QueryPlan {
        base_sql,
        count_sql,
        paged_sql,
        projected,
        condition_params,
    })
}
