//! The macro interpolation engine.
//!
//! Each registered macro name `name` rewrites `$__name(args, ...)` tokens in
//! the raw SQL. Drivers supply their own table; names they do not claim fall
//! back to the defaults below. Expanders must be pure over the query they
//! receive and must not emit `$__` sequences, which keeps the observable
//! output independent of iteration order.

use crate::driver::Driver;
use crate::error::{SqlError, SqlResult};
use crate::query::SqlQuery;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Applies one macro: receives the live query and the trimmed argument list,
/// returns the replacement SQL fragment.
pub type MacroFunc = Arc<dyn Fn(&mut SqlQuery, &[String]) -> SqlResult<String> + Send + Sync>;

/// Macro table keyed by regex-safe macro name.
pub type Macros = BTreeMap<String, MacroFunc>;

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn bad_argument_count(name: &str, expected: usize, received: usize) -> SqlError {
    SqlError::BadArgumentCount {
        macro_name: name.to_string(),
        expected,
        received,
    }
}

fn macro_time_filter(query: &mut SqlQuery, args: &[String]) -> SqlResult<String> {
    if args.len() != 1 {
        return Err(bad_argument_count("timeFilter", 1, args.len()));
    }
    let column = &args[0];
    Ok(format!(
        "{} >= '{}' AND {} <= '{}'",
        column,
        rfc3339(query.time_range.from),
        column,
        rfc3339(query.time_range.to),
    ))
}

fn macro_time_from(query: &mut SqlQuery, args: &[String]) -> SqlResult<String> {
    if args.len() != 1 {
        return Err(bad_argument_count("timeFrom", 1, args.len()));
    }
    Ok(format!("{} >= '{}'", args[0], rfc3339(query.time_range.from)))
}

fn macro_time_to(query: &mut SqlQuery, args: &[String]) -> SqlResult<String> {
    if args.len() != 1 {
        return Err(bad_argument_count("timeTo", 1, args.len()));
    }
    Ok(format!("{} <= '{}'", args[0], rfc3339(query.time_range.to)))
}

/// Granularities emitted by `$__timeGroup`, coarsest last. A requested
/// period expands to every datepart from that period down to year.
const TIME_GROUP_PERIODS: &[&str] = &["minute", "hour", "day", "month", "year"];

fn macro_time_group(_query: &mut SqlQuery, args: &[String]) -> SqlResult<String> {
    if args.len() != 2 {
        return Err(bad_argument_count("timeGroup", 2, args.len()));
    }
    let column = &args[0];
    let start = match TIME_GROUP_PERIODS.iter().position(|p| *p == args[1]) {
        Some(idx) => idx,
        None => return Ok(String::new()),
    };
    Ok(TIME_GROUP_PERIODS[start..]
        .iter()
        .map(|p| format!("datepart({}, {})", p, column))
        .collect::<Vec<_>>()
        .join(","))
}

fn macro_table(query: &mut SqlQuery, _args: &[String]) -> SqlResult<String> {
    Ok(query.table.clone().unwrap_or_default())
}

fn macro_column(query: &mut SqlQuery, _args: &[String]) -> SqlResult<String> {
    Ok(query.column.clone().unwrap_or_default())
}

fn macro_schema(query: &mut SqlQuery, _args: &[String]) -> SqlResult<String> {
    Ok(query.schema.clone().unwrap_or_default())
}

/// The macros every driver gets unless it overrides the name.
pub fn default_macros() -> Macros {
    let mut macros = Macros::new();
    macros.insert("timeFilter".into(), Arc::new(macro_time_filter) as MacroFunc);
    macros.insert("timeFrom".into(), Arc::new(macro_time_from) as MacroFunc);
    macros.insert("timeTo".into(), Arc::new(macro_time_to) as MacroFunc);
    macros.insert("timeGroup".into(), Arc::new(macro_time_group) as MacroFunc);
    macros.insert("table".into(), Arc::new(macro_table) as MacroFunc);
    macros.insert("column".into(), Arc::new(macro_column) as MacroFunc);
    macros.insert("schema".into(), Arc::new(macro_schema) as MacroFunc);
    macros
}

/// Index of the `)` closing the `(` that `text` starts with.
fn balanced_close(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_args(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|a| a.trim().to_string()).collect()
}

/// Expand every registered macro in the query's SQL and return the rewritten
/// text. The caller assigns the result back to the query.
///
/// One pass over the macro set, no rescan of expander output: interpolation
/// is idempotent whenever the output carries no `$__` sequences.
pub fn interpolate(driver: &dyn Driver, query: &mut SqlQuery) -> SqlResult<String> {
    let mut macros = driver.macros();
    for (name, func) in default_macros() {
        macros.entry(name).or_insert(func);
    }

    let mut sql = query.raw_sql.clone();
    let mut fill_mode_set = false;

    for (name, func) in &macros {
        let pattern = Regex::new(&format!(r"\$__{}\b", name))
            .map_err(|e| SqlError::Internal(format!("macro name {} is not regex-safe: {}", name, e)))?;

        // Collect the distinct tokens up front; each is then replaced
        // globally, so the same invocation text expands the same way
        // everywhere it appears.
        let snapshot = sql.clone();
        let mut tokens: Vec<(String, Vec<String>)> = Vec::new();
        for m in pattern.find_iter(&snapshot) {
            let rest = &snapshot[m.end()..];
            let (token, args) = if rest.starts_with('(') {
                let close = balanced_close(rest)
                    .ok_or_else(|| SqlError::ParsingMacroBrackets(format!("$__{}", name)))?;
                (
                    snapshot[m.start()..m.end() + close + 1].to_string(),
                    split_args(&rest[1..close]),
                )
            } else {
                warn!(macro_name = %name, "macro invoked without parentheses");
                (snapshot[m.start()..m.end()].to_string(), Vec::new())
            };
            if !tokens.iter().any(|(t, _)| t == &token) {
                tokens.push((token, args));
            }
        }

        for (token, args) in tokens {
            // The expander sees the in-progress SQL.
            query.raw_sql = sql.clone();
            let fill_before = query.fill_missing;
            let replacement = func(query, &args)?;
            if query.fill_missing != fill_before {
                if fill_mode_set {
                    return Err(SqlError::FillModeSetTwice);
                }
                fill_mode_set = true;
            }
            sql = sql.replace(&token, &replacement);
        }
    }

    Ok(sql)
}
