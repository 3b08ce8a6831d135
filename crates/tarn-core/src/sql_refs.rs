//! Inspection and rewriting of file-reading table functions
//! (`read_csv('...')`, `read_parquet([...])`, `read_json(...)`) embedded in
//! source SQL.

use anyhow::{anyhow, bail, Result};
use datafusion::sql::sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, Ident, ObjectName, Query, SetExpr, Statement, TableFactor,
    Value,
};
use datafusion::sql::sqlparser::dialect::GenericDialect;
use datafusion::sql::sqlparser::parser::Parser;

use crate::handle::FileFormat;

/// One table function reference found in a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFunctionRef {
    pub function: String,
    pub format: FileFormat,
    pub paths: Vec<String>,
}

fn format_for_function(name: &str) -> Option<FileFormat> {
    match name {
        "read_csv" | "read_csv_auto" => Some(FileFormat::Csv),
        "read_parquet" => Some(FileFormat::Parquet),
        "read_json" | "read_json_auto" | "read_ndjson" => Some(FileFormat::Json),
        _ => None,
    }
}

fn parse_single(sql: &str) -> Result<Statement> {
    let mut statements = Parser::parse_sql(&GenericDialect {}, sql)?;
    if statements.len() != 1 {
        bail!("expected exactly one statement, found {}", statements.len());
    }
    let stmt = statements.remove(0);
    if !matches!(stmt, Statement::Query(_)) {
        bail!("source SQL must be a query");
    }
    Ok(stmt)
}

/// All file table functions referenced by `sql`, in source order.
pub fn table_function_refs(sql: &str) -> Result<Vec<TableFunctionRef>> {
    let mut stmt = parse_single(sql)?;
    let mut refs = Vec::new();
    visit_statement(&mut stmt, &mut |factor| {
        if let Some(r) = function_ref(factor)? {
            refs.push(r);
        }
        Ok(())
    })?;
    Ok(refs)
}

/// Replace every file table function in `sql` with the table name returned
/// by `replace`. Returns the rewritten SQL.
pub fn rewrite_table_functions<F>(sql: &str, mut replace: F) -> Result<String>
where
    F: FnMut(&TableFunctionRef) -> Result<Vec<String>>,
{
    let mut stmt = parse_single(sql)?;
    visit_statement(&mut stmt, &mut |factor| {
        let Some(r) = function_ref(factor)? else {
            return Ok(());
        };
        let parts = replace(&r)?;
        if let TableFactor::Table { name, args, .. } = factor {
            *name = ObjectName(parts.into_iter().map(|p| Ident::with_quote('"', p)).collect());
            *args = None;
        }
        Ok(())
    })?;
    Ok(stmt.to_string())
}

/// Rewrite only the path arguments of each file table function, keeping the
/// function call itself.
pub fn rewrite_table_function_paths<F>(sql: &str, mut rewrite: F) -> Result<String>
where
    F: FnMut(&str) -> Result<String>,
{
    let mut stmt = parse_single(sql)?;
    visit_statement(&mut stmt, &mut |factor| {
        if function_ref(factor)?.is_none() {
            return Ok(());
        }
        if let TableFactor::Table {
            args: Some(args), ..
        } = factor
        {
            if let Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))) = args.args.first_mut() {
                match expr {
                    Expr::Value(Value::SingleQuotedString(s)) => *s = rewrite(s)?,
                    Expr::Array(arr) => {
                        for e in arr.elem.iter_mut() {
                            if let Expr::Value(Value::SingleQuotedString(s)) = e {
                                *s = rewrite(s)?;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    })?;
    Ok(stmt.to_string())
}

fn function_ref(factor: &TableFactor) -> Result<Option<TableFunctionRef>> {
    let TableFactor::Table {
        name,
        args: Some(args),
        ..
    } = factor
    else {
        return Ok(None);
    };
    let Some(function) = name.0.last().map(|i| i.value.to_ascii_lowercase()) else {
        return Ok(None);
    };
    let Some(format) = format_for_function(&function) else {
        return Ok(None);
    };

    let first = args
        .args
        .iter()
        .find_map(|a| match a {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Some(e),
            _ => None,
        })
        .ok_or_else(|| anyhow!("{} requires a path argument", function))?;

    let paths = match first {
        Expr::Value(Value::SingleQuotedString(s)) => vec![s.clone()],
        Expr::Array(arr) => arr
            .elem
            .iter()
            .map(|e| match e {
                Expr::Value(Value::SingleQuotedString(s)) => Ok(s.clone()),
                other => Err(anyhow!("unsupported path expression {}", other)),
            })
            .collect::<Result<Vec<_>>>()?,
        other => bail!("unsupported path expression {}", other),
    };

    Ok(Some(TableFunctionRef {
        function,
        format,
        paths,
    }))
}

// ---------------------------------------------------------------------------
// AST walk
// ---------------------------------------------------------------------------

type Visit<'a> = dyn FnMut(&mut TableFactor) -> Result<()> + 'a;

fn visit_statement(stmt: &mut Statement, f: &mut Visit<'_>) -> Result<()> {
    if let Statement::Query(q) = stmt {
        visit_query(q, f)?;
    }
    Ok(())
}

fn visit_query(q: &mut Query, f: &mut Visit<'_>) -> Result<()> {
    if let Some(with) = q.with.as_mut() {
        for cte in with.cte_tables.iter_mut() {
            visit_query(&mut cte.query, f)?;
        }
    }
    visit_set_expr(&mut q.body, f)
}

fn visit_set_expr(e: &mut SetExpr, f: &mut Visit<'_>) -> Result<()> {
    match e {
        SetExpr::Select(select) => {
            for twj in select.from.iter_mut() {
                visit_factor(&mut twj.relation, f)?;
                for join in twj.joins.iter_mut() {
                    visit_factor(&mut join.relation, f)?;
                }
            }
        }
        SetExpr::Query(q) => visit_query(q, f)?,
        SetExpr::SetOperation { left, right, .. } => {
            visit_set_expr(left, f)?;
            visit_set_expr(right, f)?;
        }
        _ => {}
    }
    Ok(())
}

fn visit_factor(t: &mut TableFactor, f: &mut Visit<'_>) -> Result<()> {
    match t {
        TableFactor::Derived { subquery, .. } => visit_query(subquery, f),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            visit_factor(&mut table_with_joins.relation, f)?;
            for join in table_with_joins.joins.iter_mut() {
                visit_factor(&mut join.relation, f)?;
            }
            Ok(())
        }
        other => f(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_single_path_reference() {
        let refs = table_function_refs("SELECT * FROM read_csv('s3://bkt/data/*.csv')").unwrap();
        assert_eq!(
            refs,
            vec![TableFunctionRef {
                function: "read_csv".into(),
                format: FileFormat::Csv,
                paths: vec!["s3://bkt/data/*.csv".into()],
            }]
        );
    }

    #[test]
    fn finds_references_inside_subqueries_and_ctes() {
        let sql = "WITH a AS (SELECT * FROM read_parquet(['x.parquet', 'y.parquet'])) \
                   SELECT * FROM a JOIN (SELECT * FROM read_json('z.json')) b ON true";
        let refs = table_function_refs(sql).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].paths, vec!["x.parquet", "y.parquet"]);
        assert_eq!(refs[1].format, FileFormat::Json);
    }

    #[test]
    fn ignores_ordinary_tables() {
        assert!(table_function_refs("SELECT * FROM orders").unwrap().is_empty());
    }

    #[test]
    fn rewrites_function_to_table() {
        let out = rewrite_table_functions("SELECT a FROM read_csv('f.csv') WHERE a > 1", |_| {
            Ok(vec!["tarn_sources".into(), "__tmp".into()])
        })
        .unwrap();
        assert_eq!(out, r#"SELECT a FROM "tarn_sources"."__tmp" WHERE a > 1"#);
    }

    #[test]
    fn rewrites_paths_in_place() {
        let out = rewrite_table_function_paths("SELECT * FROM read_csv('data/f.csv')", |p| {
            Ok(format!("/repo/{p}"))
        })
        .unwrap();
        assert_eq!(out, "SELECT * FROM read_csv('/repo/data/f.csv')");
    }

    #[test]
    fn rejects_multiple_statements() {
        assert!(table_function_refs("SELECT 1; SELECT 2").is_err());
    }
}
