//! Identifier quoting and logical-reference → SQL alias resolution.
//!
//! Logical references are what callers write (`amount`, `primary.id`,
//! `join_2.name`); aliases are the physical column names the subquery
//! exposes to the outer query.

use std::collections::HashMap;

use crate::ast::{Expr, SqlType, TargetType};
use crate::error::{EtlError, EtlResult};
use crate::transpiler::Dialect;
use crate::transpiler::plan::ColumnType;

/// Alias of the subquery wrapped by the outer query.
pub const SUBQUERY_ALIAS: &str = "sub";

/// Alias of the primary table in a star join.
pub const PRIMARY_ALIAS: &str = "p";

/// Quote an identifier for `dialect`.
pub fn quote_ident(name: &str, dialect: Dialect) -> String {
    dialect.generator().quote_identifier(name)
}

/// Quote each dot-separated segment of `path` independently.
pub fn quote_qualified(path: &str, dialect: Dialect) -> String {
    let generator = dialect.generator();
    path.split('.')
        .map(|segment| generator.quote_identifier(segment))
        .collect::<Vec<_>>()
        .join(".")
}

/// Map a logical reference to its SQL alias.
///
/// `primary.x` → `primary_x`, `join_N.x` → `join_N_x`, and any other dots
/// are folded to underscores.
pub fn resolve_alias(reference: &str) -> String {
    reference.trim().replace('.', "_")
}

/// Table alias used inside the join for edge `index` (1-based).
pub fn join_alias(index: usize) -> String {
    format!("j{}", index)
}

/// Logical prefix for edge `index` (1-based).
pub fn join_prefix(index: usize) -> String {
    format!("join_{}", index)
}

/// Logical references registered in one plan, in registration order.
///
/// Registration fails when two distinct references fold to the same alias.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasMap {
    entries: Vec<(String, String)>,
    by_alias: HashMap<String, usize>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `reference` and return its alias.
    pub fn register(&mut self, reference: &str) -> EtlResult<String> {
        let alias = resolve_alias(reference);
        if let Some(&idx) = self.by_alias.get(&alias) {
            let existing = &self.entries[idx].0;
            if existing == reference {
                return Ok(alias);
            }
            return Err(EtlError::Compilation(format!(
                "alias collision: '{}' and '{}' both map to '{}'",
                existing, reference, alias
            )));
        }
        self.by_alias.insert(alias.clone(), self.entries.len());
        self.entries.push((reference.to_string(), alias.clone()));
        Ok(alias)
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.by_alias.contains_key(alias)
    }

    pub fn alias_of(&self, reference: &str) -> Option<&str> {
        let alias = resolve_alias(reference);
        self.by_alias
            .get(&alias)
            .map(|&idx| &self.entries[idx])
            .filter(|(logical, _)| logical == reference || resolve_alias(logical) == alias)
            .map(|(_, alias)| alias.as_str())
    }

    /// `(logical, alias)` pairs in registration order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn first_alias(&self) -> Option<&str> {
        self.entries.first().map(|(_, alias)| alias.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Column-resolution context for the compilers.
///
/// A `Base` scope resolves references to raw table columns (`"amount"` or
/// `p."amount"`); an `Outer` scope resolves them to the subquery's aliases
/// (`sub."primary_amount"`) and to derived columns, whose expressions are
/// inlined because SQL cannot see SELECT aliases in the same query.
#[derive(Debug, Clone)]
pub struct Scope {
    kind: ScopeKind,
    aliases: AliasMap,
    /// Projection unknown (`*`): references cannot be verified.
    open: bool,
    casts: HashMap<String, TargetType>,
    types: HashMap<String, ColumnType>,
    derived: Vec<Derived>,
}

#[derive(Debug, Clone)]
struct Derived {
    name: String,
    expr: Expr,
    hint: Option<TargetType>,
}

#[derive(Debug, Clone)]
enum ScopeKind {
    /// Single table, unqualified physical columns
    Table,
    /// Star join with `edges` secondaries
    Join { edges: usize },
    /// Outer query over the subquery
    Outer,
}

impl Scope {
    /// Raw columns of a single table.
    pub fn table(aliases: AliasMap, open: bool) -> Self {
        Self::with_kind(ScopeKind::Table, aliases, open)
    }

    /// Raw columns of a star join with `edges` secondaries.
    pub fn join(aliases: AliasMap, open: bool, edges: usize) -> Self {
        Self::with_kind(ScopeKind::Join { edges }, aliases, open)
    }

    /// Aliased columns of the subquery.
    pub fn outer(aliases: AliasMap, open: bool) -> Self {
        Self::with_kind(ScopeKind::Outer, aliases, open)
    }

    fn with_kind(kind: ScopeKind, aliases: AliasMap, open: bool) -> Self {
        Self {
            kind,
            aliases,
            open,
            casts: HashMap::new(),
            types: HashMap::new(),
            derived: Vec::new(),
        }
    }

    /// Record the cast type of a column, used to type bound parameters.
    pub fn with_casts<'a>(mut self, casts: impl IntoIterator<Item = (&'a str, TargetType)>) -> Self {
        for (column, target) in casts {
            self.casts.insert(column.to_string(), target);
        }
        self
    }

    /// Record source column types from metadata.
    pub fn with_column_types<'a>(mut self, types: impl IntoIterator<Item = (&'a str, ColumnType)>) -> Self {
        for (column, column_type) in types {
            self.types.insert(column.to_string(), column_type);
        }
        self
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    /// Cast registered for `reference`, if any.
    pub fn cast_of(&self, reference: &str) -> Option<TargetType> {
        self.casts.get(reference).copied()
    }

    /// Whether `reference` names a derived (outer-query) column.
    pub fn is_derived(&self, reference: &str) -> bool {
        self.derived.iter().any(|d| d.name == reference)
    }

    /// Type for a value compared against `reference`: its cast, the
    /// derived column's type, then the source column's type.
    pub fn param_hint(&self, reference: &str) -> Option<TargetType> {
        let reference = reference.trim();
        if let Some(derived) = self.derived.iter().find(|d| d.name == reference) {
            return derived.hint;
        }
        self.cast_of(reference)
            .or_else(|| self.types.get(reference).map(|t| t.param_hint()))
    }

    /// Resolve `reference` for a comparison with a bound value. Source
    /// columns of a type with no parameter mapping compare as text.
    pub fn resolve_comparable(&self, reference: &str) -> EtlResult<(Expr, Option<TargetType>)> {
        let expr = self.resolve(reference)?;
        let reference = reference.trim();
        let as_text = !self.is_derived(reference)
            && self.cast_of(reference).is_none()
            && self.types.get(reference) == Some(&ColumnType::Other);
        let expr = if as_text { expr.cast(SqlType::Text) } else { expr };
        Ok((expr, self.param_hint(reference)))
    }

    /// Register a derived column so later references inline `expr`.
    pub fn add_derived(&mut self, name: &str, expr: Expr, hint: Option<TargetType>) -> EtlResult<()> {
        let clashes_base = self.aliases.contains_alias(name) || self.aliases.alias_of(name).is_some();
        if clashes_base || self.is_derived(name) {
            return Err(EtlError::Compilation(format!(
                "result column '{}' already exists",
                name
            )));
        }
        self.derived.push(Derived {
            name: name.to_string(),
            expr,
            hint,
        });
        Ok(())
    }

    /// Resolve a logical reference to an expression.
    pub fn resolve(&self, reference: &str) -> EtlResult<Expr> {
        let reference = reference.trim();
        if let ScopeKind::Outer = self.kind {
            if let Some(derived) = self.derived.iter().find(|d| d.name == reference) {
                return Ok(derived.expr.clone());
            }
        }
        match &self.kind {
            ScopeKind::Table => {
                if self.open || self.aliases.alias_of(reference).is_some() {
                    Ok(Expr::column(reference))
                } else {
                    Err(unresolved(reference))
                }
            }
            ScopeKind::Join { edges } => {
                let (qualifier, column) = split_join_reference(reference, *edges)?;
                if self.open || self.aliases.alias_of(reference).is_some() {
                    Ok(Expr::qualified(qualifier, column))
                } else {
                    Err(unresolved(reference))
                }
            }
            ScopeKind::Outer => match self.aliases.alias_of(reference) {
                Some(alias) => Ok(Expr::qualified(SUBQUERY_ALIAS, alias)),
                None if self.open => Ok(Expr::qualified(SUBQUERY_ALIAS, resolve_alias(reference))),
                None => Err(unresolved(reference)),
            },
        }
    }
}

fn unresolved(reference: &str) -> EtlError {
    EtlError::Compilation(format!("unresolved column reference '{}'", reference))
}

/// Split `primary.col` / `join_N.col` into a table alias and column.
pub fn split_join_reference(reference: &str, edges: usize) -> EtlResult<(String, String)> {
    let (prefix, column) = reference.split_once('.').ok_or_else(|| {
        EtlError::Compilation(format!(
            "join column '{}' must be written as primary.<col> or join_<n>.<col>",
            reference
        ))
    })?;
    if prefix == "primary" {
        return Ok((PRIMARY_ALIAS.to_string(), column.to_string()));
    }
    let index = prefix
        .strip_prefix("join_")
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| (1..=edges).contains(n))
        .ok_or_else(|| {
            EtlError::Compilation(format!(
                "column '{}' references unknown table '{}'",
                reference, prefix
            ))
        })?;
    Ok((join_alias(index), column.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("a\"b", Dialect::Postgres), "\"a\"\"b\"");
        assert_eq!(quote_ident("a`b", Dialect::MySQL), "`a``b`");
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(quote_qualified("public.sales", Dialect::Postgres), "\"public\".\"sales\"");
        assert_eq!(quote_qualified("shop.orders", Dialect::MySQL), "`shop`.`orders`");
    }

    #[test]
    fn test_resolve_alias() {
        assert_eq!(resolve_alias("primary.x"), "primary_x");
        assert_eq!(resolve_alias("join_2.name"), "join_2_name");
        assert_eq!(resolve_alias("a.b.c"), "a_b_c");
        assert_eq!(resolve_alias("amount"), resolve_alias("amount"));
    }

    #[test]
    fn test_alias_collision() {
        let mut map = AliasMap::new();
        assert_eq!(map.register("a.b_c").unwrap(), "a_b_c");
        assert_eq!(map.register("a.b_c").unwrap(), "a_b_c");
        let err = map.register("a_b.c").unwrap_err();
        assert!(matches!(err, EtlError::Compilation(_)));
    }

    #[test]
    fn test_outer_scope_resolution() {
        let mut map = AliasMap::new();
        map.register("primary.amount").unwrap();
        let scope = Scope::outer(map, false);
        assert_eq!(
            scope.resolve("primary.amount").unwrap(),
            Expr::qualified("sub", "primary_amount")
        );
        assert!(scope.resolve("primary.missing").is_err());
    }

    #[test]
    fn test_join_reference() {
        assert_eq!(split_join_reference("join_2.x", 2).unwrap(), ("j2".to_string(), "x".to_string()));
        assert!(split_join_reference("join_3.x", 2).is_err());
        assert!(split_join_reference("x", 2).is_err());
    }
}
