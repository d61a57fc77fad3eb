//! Identifier validation, quoting and table-name parsing for SQL Server.
//!
//! Identifiers cannot be bound as parameters, so every table and column name
//! that reaches generated SQL goes through [`quote`]. Caller-supplied
//! predicate fragments are screened by [`validate_predicate`].

use std::fmt;

use crate::error::{BulkSyncError, Result};

/// SQL Server identifier length limit (characters).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Local temporary table names are limited to 116 characters.
pub const MAX_TEMP_TABLE_NAME_LENGTH: usize = 116;

/// Validate an identifier.
///
/// Rejects empty identifiers, null bytes and names over the length limit.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BulkSyncError::Configuration(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(BulkSyncError::Configuration(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(BulkSyncError::Configuration(format!(
            "Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a SQL Server identifier with brackets, doubling closing brackets.
pub fn quote(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(quote_unchecked(name))
}

/// Quote without validation, for names the crate generated itself.
pub(crate) fn quote_unchecked(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Escape a value for use inside an `N'...'` literal.
pub(crate) fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// A schema-qualified table name.
///
/// Local temporary tables (`#name`) carry no schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// A session-scoped temporary table. The name must start with `#`.
    pub fn temp(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Parse `table`, `schema.table`, `[schema].[table]` or `#temp`.
    ///
    /// Unqualified names get `default_schema`.
    pub fn parse(input: &str, default_schema: &str) -> Result<Self> {
        let parts = split_qualified(input.trim())?;
        let table = match parts.as_slice() {
            [name] if name.starts_with('#') => TableName::temp(name.clone()),
            [name] => TableName::new(default_schema, name.clone()),
            [schema, name] => TableName::new(schema.clone(), name.clone()),
            _ => {
                return Err(BulkSyncError::Configuration(format!(
                    "Table name must be 'table' or 'schema.table', got {:?}",
                    input
                )))
            }
        };
        table.validate()?;
        Ok(table)
    }

    pub fn is_temp(&self) -> bool {
        self.name.starts_with('#')
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(schema) = &self.schema {
            validate_identifier(schema)?;
        }
        validate_identifier(&self.name)
    }

    /// Bracket-quoted, schema-qualified form for SQL text.
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_unchecked(schema), quote_unchecked(&self.name)),
            None => quote_unchecked(&self.name),
        }
    }

    /// The name `OBJECT_ID` resolves; temp tables resolve through tempdb.
    pub fn object_id_name(&self) -> String {
        if self.is_temp() {
            format!("tempdb..{}", quote_unchecked(&self.name))
        } else {
            self.qualified()
        }
    }

    /// [`object_id_name`](Self::object_id_name) escaped for `OBJECT_ID(N'...')`.
    pub fn object_id_literal(&self) -> String {
        escape_literal(&self.object_id_name())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// Split a possibly bracket-quoted dotted name into its parts.
fn split_qualified(input: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut in_brackets = false;

    while let Some(c) = chars.next() {
        match c {
            '[' if !in_brackets && current.is_empty() => in_brackets = true,
            ']' if in_brackets => {
                if chars.peek() == Some(&']') {
                    current.push(']');
                    chars.next();
                } else {
                    in_brackets = false;
                }
            }
            '.' if !in_brackets => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_brackets {
        return Err(BulkSyncError::Configuration(format!(
            "Unterminated bracket in table name {:?}",
            input
        )));
    }
    parts.push(current);
    Ok(parts)
}

/// Validate a caller-supplied predicate or assignment fragment.
///
/// Fragments are spliced into a single generated statement, so anything
/// that could end it or start another is rejected: semicolons, comment
/// markers and `EXEC`/`EXECUTE`.
pub fn validate_predicate(fragment: &str) -> Result<()> {
    if fragment.trim().is_empty() {
        return Err(BulkSyncError::Configuration(
            "Predicate cannot be empty".to_string(),
        ));
    }

    if fragment.contains(';') {
        return Err(BulkSyncError::Configuration(format!(
            "SECURITY: Predicate contains semicolon (possible injection): {:?}",
            fragment
        )));
    }

    if fragment.contains("--") || fragment.contains("/*") || fragment.contains("*/") {
        return Err(BulkSyncError::Configuration(format!(
            "SECURITY: Predicate contains SQL comment markers (possible injection): {:?}",
            fragment
        )));
    }

    let lower = fragment.to_lowercase();
    if lower.split_whitespace().any(|word| {
        word == "exec"
            || word == "execute"
            || word.starts_with("exec(")
            || word.starts_with("execute(")
    }) {
        return Err(BulkSyncError::Configuration(format!(
            "SECURITY: Predicate contains EXEC/EXECUTE keyword (possible injection): {:?}",
            fragment
        )));
    }

    Ok(())
}
