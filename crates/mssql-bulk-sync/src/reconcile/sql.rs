//! SQL text for the set-based reconcile statements.
//!
//! Every builder takes already-resolved identifiers; names are bracket
//! quoted here and caller fragments were screened during planning.

use crate::core::identifier::{quote_unchecked, TableName};
use crate::staging::CORRELATION_COLUMN;

use super::plan::ReconcilePlan;

/// Alias of the target table in generated statements.
pub const TARGET_ALIAS: &str = "t";
/// Alias of the staging table in generated statements.
pub const STAGING_ALIAS: &str = "s";

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_unchecked(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn prefixed_list(alias: &str, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("{}.{}", alias, quote_unchecked(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `t.[a] = s.[b] AND ...`
pub fn match_clause(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(staging, target)| {
            format!(
                "{}.{} = {}.{}",
                TARGET_ALIAS,
                quote_unchecked(target),
                STAGING_ALIAS,
                quote_unchecked(staging)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn set_clause(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| {
            let quoted = quote_unchecked(c);
            format!("{}.{} = {}.{}", TARGET_ALIAS, quoted, STAGING_ALIAS, quoted)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_branch(columns: &[String]) -> String {
    if columns.is_empty() {
        "INSERT DEFAULT VALUES".to_string()
    } else {
        format!(
            "INSERT ({}) VALUES ({})",
            column_list(columns),
            prefixed_list(STAGING_ALIAS, columns)
        )
    }
}

fn output_clause(plan: &ReconcilePlan) -> String {
    match (&plan.identity, plan.map_identity) {
        (Some(identity), true) => format!(
            "OUTPUT $action, {}.{}, inserted.{}",
            STAGING_ALIAS,
            quote_unchecked(CORRELATION_COLUMN),
            quote_unchecked(identity)
        ),
        _ => "OUTPUT $action".to_string(),
    }
}

/// Wrap `statement` in `SET IDENTITY_INSERT` when explicit identities are written.
pub fn with_identity_insert(plan: &ReconcilePlan, statement: String) -> String {
    if plan.keep_identity {
        let target = plan.target.qualified();
        format!(
            "SET IDENTITY_INSERT {0} ON; {1} SET IDENTITY_INSERT {0} OFF;",
            target, statement
        )
    } else {
        statement
    }
}

/// Plain insert of every staged row.
pub fn insert_sql(plan: &ReconcilePlan, staging: &TableName) -> String {
    let cols = column_list(&plan.insert_columns);
    let statement = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {};",
        plan.target.qualified(),
        cols,
        cols,
        staging.qualified()
    );
    with_identity_insert(plan, statement)
}

/// Insert every staged row, reporting one output row per insert.
///
/// `MERGE ... ON 1 = 0` is used instead of `INSERT ... SELECT` because only
/// a MERGE `OUTPUT` clause can reference staging columns, which ties each
/// generated identity to its correlation id.
pub fn insert_with_output_sql(plan: &ReconcilePlan, staging: &TableName) -> String {
    let statement = format!(
        "MERGE {target} AS {t} USING {staging} AS {s} ON 1 = 0 \
         WHEN NOT MATCHED BY TARGET THEN {insert} \
         {output};",
        target = plan.target.qualified(),
        staging = staging.qualified(),
        t = TARGET_ALIAS,
        s = STAGING_ALIAS,
        insert = insert_branch(&plan.insert_columns),
        output = output_clause(plan),
    );
    with_identity_insert(plan, statement)
}

/// `UPDATE ... FROM` joined on the match condition.
pub fn update_sql(plan: &ReconcilePlan, staging: &TableName) -> String {
    let mut on = match_clause(&plan.match_pairs);
    if let Some(condition) = &plan.update_condition {
        on = format!("{} AND ({})", on, condition);
    }
    format!(
        "UPDATE {t} SET {set} FROM {target} AS {t} INNER JOIN {staging} AS {s} ON {on};",
        t = TARGET_ALIAS,
        s = STAGING_ALIAS,
        set = set_clause(&plan.update_columns),
        target = plan.target.qualified(),
        staging = staging.qualified(),
        on = on,
    )
}

/// Single MERGE that updates matched rows and inserts the rest.
///
/// `HOLDLOCK` keeps the match and the insert atomic against concurrent
/// writers. The `WHEN MATCHED` branch is left out when there is nothing to
/// update.
pub fn merge_sql(plan: &ReconcilePlan, staging: &TableName) -> String {
    let matched = if plan.update_columns.is_empty() {
        String::new()
    } else {
        let condition = plan
            .update_condition
            .as_ref()
            .map(|c| format!(" AND ({})", c))
            .unwrap_or_default();
        format!(
            "WHEN MATCHED{} THEN UPDATE SET {} ",
            condition,
            set_clause(&plan.update_columns)
        )
    };

    let statement = format!(
        "MERGE {target} WITH (HOLDLOCK) AS {t} USING {staging} AS {s} ON {on} \
         {matched}WHEN NOT MATCHED BY TARGET THEN {insert} \
         {output};",
        target = plan.target.qualified(),
        staging = staging.qualified(),
        t = TARGET_ALIAS,
        s = STAGING_ALIAS,
        on = match_clause(&plan.match_pairs),
        matched = matched,
        insert = insert_branch(&plan.insert_columns),
        output = output_clause(plan),
    );
    with_identity_insert(plan, statement)
}

/// Delete target rows matching a staged key.
pub fn delete_sql(plan: &ReconcilePlan, staging: &TableName) -> String {
    format!(
        "DELETE {t} FROM {target} AS {t} INNER JOIN {staging} AS {s} ON {on};",
        t = TARGET_ALIAS,
        s = STAGING_ALIAS,
        target = plan.target.qualified(),
        staging = staging.qualified(),
        on = match_clause(&plan.match_pairs),
    )
}

/// Delete by caller predicate, without staging.
pub fn delete_where_sql(target: &TableName, predicate: &str) -> String {
    format!("DELETE FROM {} WHERE {};", target.qualified(), predicate)
}

/// Set-based update by caller predicate, without staging.
pub fn update_where_sql(
    target: &TableName,
    assignments: &[(String, String)],
    predicate: Option<&str>,
) -> String {
    let set = assignments
        .iter()
        .map(|(column, expr)| format!("{} = {}", quote_unchecked(column), expr))
        .collect::<Vec<_>>()
        .join(", ");
    match predicate {
        Some(p) => format!("UPDATE {} SET {} WHERE {};", target.qualified(), set, p),
        None => format!("UPDATE {} SET {};", target.qualified(), set),
    }
}

/// Copy rows of `source` into `target`.
///
/// A missing target is created by `SELECT ... INTO`.
pub fn insert_from_query_sql(
    source: &TableName,
    target: &TableName,
    columns: &[String],
    predicate: Option<&str>,
    target_exists: bool,
) -> String {
    let cols = column_list(columns);
    let filter = predicate
        .map(|p| format!(" WHERE {}", p))
        .unwrap_or_default();
    if target_exists {
        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}{};",
            target.qualified(),
            cols,
            cols,
            source.qualified(),
            filter
        )
    } else {
        format!(
            "SELECT {} INTO {} FROM {}{};",
            cols,
            target.qualified(),
            source.qualified(),
            filter
        )
    }
}
