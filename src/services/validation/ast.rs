//! SQL AST extraction helpers
//!
//! Thin layer over sqlparser (MySQL dialect) that turns a candidate SQL
//! string into the facts the validation engine and the guard compare
//! against: used tables, used columns, serialized join/where conditions,
//! select aliases, and aggregate/grouping shape.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use sqlparser::ast::{
    Expr, GroupByExpr, Join, JoinConstraint, JoinOperator, Query, Select, SelectItem, SetExpr,
    Statement, TableFactor, visit_expressions, visit_relations,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::{Parser, ParserError};

const AGGREGATE_FUNCTIONS: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX"];

/// Parse SQL as a single MySQL statement.
pub fn parse_statement(sql: &str) -> Result<Statement, ParserError> {
    let mut statements = Parser::parse_sql(&MySqlDialect {}, sql)?;
    if statements.len() != 1 {
        return Err(ParserError::ParserError(format!(
            "expected a single statement, got {}",
            statements.len()
        )));
    }
    Ok(statements.remove(0))
}

/// Parse a bare predicate atom as a standalone expression.
pub fn parse_expression(text: &str) -> Result<Expr, ParserError> {
    Parser::new(&MySqlDialect {})
        .try_with_sql(text)?
        .parse_expr()
}

/// Canonical lowercase identifier: backticks stripped, qualifier dropped.
pub fn normalize_identifier(name: &str) -> String {
    let cleaned = name.replace('`', "").to_lowercase();
    cleaned
        .rsplit('.')
        .next()
        .unwrap_or(cleaned.as_str())
        .to_string()
}

/// All table names referenced by the statement (aliases stripped,
/// lowercased).
pub fn extract_used_tables(statement: &Statement) -> BTreeSet<String> {
    let mut tables = BTreeSet::new();
    let _ = visit_relations(statement, |relation| {
        tables.insert(normalize_identifier(&relation.to_string()));
        ControlFlow::<()>::Continue(())
    });
    tables
}

/// All column names referenced by the statement (qualifiers stripped,
/// lowercased).
pub fn extract_used_columns(statement: &Statement) -> BTreeSet<String> {
    let mut columns = BTreeSet::new();
    let _ = visit_expressions(statement, |expr: &Expr| {
        match expr {
            Expr::Identifier(ident) => {
                columns.insert(ident.value.to_lowercase());
            }
            Expr::CompoundIdentifier(parts) => {
                if let Some(last) = parts.last() {
                    columns.insert(last.value.to_lowercase());
                }
            }
            _ => {}
        }
        ControlFlow::<()>::Continue(())
    });
    columns
}

/// Serialized join/where conditions and projection aliases, collected
/// from every SELECT the statement contains.
#[derive(Debug, Default)]
pub struct SelectFacts {
    pub join_conditions: Vec<String>,
    pub where_conditions: Vec<String>,
    pub select_aliases: BTreeSet<String>,
}

pub fn collect_select_facts(statement: &Statement) -> SelectFacts {
    let mut facts = SelectFacts::default();
    if let Statement::Query(query) = statement {
        walk_query(query, &mut facts);
    }
    facts
}

fn walk_query(query: &Query, facts: &mut SelectFacts) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            walk_query(&cte.query, facts);
        }
    }
    walk_set_expr(&query.body, facts);
}

fn walk_set_expr(body: &SetExpr, facts: &mut SelectFacts) {
    match body {
        SetExpr::Select(select) => walk_select(select, facts),
        SetExpr::Query(query) => walk_query(query, facts),
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, facts);
            walk_set_expr(right, facts);
        }
        _ => {}
    }
}

fn walk_select(select: &Select, facts: &mut SelectFacts) {
    for item in &select.projection {
        if let SelectItem::ExprWithAlias { alias, .. } = item {
            facts.select_aliases.insert(alias.value.to_lowercase());
        }
    }
    for table_with_joins in &select.from {
        walk_table_factor(&table_with_joins.relation, facts);
        for join in &table_with_joins.joins {
            if let Some(condition) = join_condition_text(join) {
                facts.join_conditions.push(condition);
            }
            walk_table_factor(&join.relation, facts);
        }
    }
    if let Some(selection) = &select.selection {
        facts.where_conditions.push(selection.to_string().to_lowercase());
    }
}

fn walk_table_factor(factor: &TableFactor, facts: &mut SelectFacts) {
    if let TableFactor::Derived { subquery, .. } = factor {
        walk_query(subquery, facts);
    }
}

/// Serialized, lowercased ON condition of a join, when it has one.
///
/// The structured match covers the stable operator variants; anything
/// else (dialect-specific operators) falls back to slicing the printed
/// join clause after its `ON` keyword.
fn join_condition_text(join: &Join) -> Option<String> {
    let constraint = match &join.join_operator {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c) => Some(c),
        _ => None,
    };
    match constraint {
        Some(JoinConstraint::On(expr)) => Some(expr.to_string().to_lowercase()),
        Some(_) => None,
        None => {
            let text = join.to_string().to_lowercase();
            text.find(" on ")
                .map(|pos| text[pos + 4..].trim().to_string())
        }
    }
}

/// Does any expression below `expr` call an aggregate function?
pub fn expr_contains_aggregate(expr: &Expr) -> bool {
    let mut found = false;
    let _ = visit_expressions(expr, |e: &Expr| {
        if let Expr::Function(func) = e {
            let name = func.name.to_string().replace('`', "").to_uppercase();
            let last = name.rsplit('.').next().unwrap_or("");
            if AGGREGATE_FUNCTIONS.contains(&last) {
                found = true;
                return ControlFlow::Break(());
            }
        }
        ControlFlow::<()>::Continue(())
    });
    found
}

/// A SELECT with aggregate function(s) and no GROUP BY yields a single
/// row; the guard strips LIMIT from those.
pub fn is_single_row_aggregate(query: &Query) -> bool {
    let SetExpr::Select(select) = query.body.as_ref() else {
        return false;
    };
    let grouped = match &select.group_by {
        GroupByExpr::Expressions(exprs, _) => !exprs.is_empty(),
        _ => true,
    };
    if grouped {
        return false;
    }
    select.projection.iter().any(|item| match item {
        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
            expr_contains_aggregate(expr)
        }
        _ => false,
    })
}

/// The top-level query of a statement, when it is one.
pub fn top_query_mut(statement: &mut Statement) -> Option<&mut Query> {
    match statement {
        Statement::Query(query) => Some(query),
        _ => None,
    }
}

/// Apply `f` to every query node reachable from `query` (CTEs, set
/// operation branches, derived tables).
pub fn for_each_query_mut<F: FnMut(&mut Query)>(query: &mut Query, f: &mut F) {
    f(query);
    if let Some(with) = query.with.as_mut() {
        for cte in with.cte_tables.iter_mut() {
            for_each_query_mut(&mut cte.query, f);
        }
    }
    for_each_set_expr_mut(query.body.as_mut(), f);
}

fn for_each_set_expr_mut<F: FnMut(&mut Query)>(body: &mut SetExpr, f: &mut F) {
    match body {
        SetExpr::Select(select) => {
            for table_with_joins in select.from.iter_mut() {
                for_each_table_factor_mut(&mut table_with_joins.relation, f);
                for join in table_with_joins.joins.iter_mut() {
                    for_each_table_factor_mut(&mut join.relation, f);
                }
            }
        }
        SetExpr::Query(query) => for_each_query_mut(query, f),
        SetExpr::SetOperation { left, right, .. } => {
            for_each_set_expr_mut(left, f);
            for_each_set_expr_mut(right, f);
        }
        _ => {}
    }
}

fn for_each_table_factor_mut<F: FnMut(&mut Query)>(factor: &mut TableFactor, f: &mut F) {
    if let TableFactor::Derived { subquery, .. } = factor {
        for_each_query_mut(subquery, f);
    }
}
