//! # Split Routing
//!
//! Splits select outgoing edges by evaluating a routing script or expression
//! against item data and matching the produced tokens against edge aliases.
//! Alias entries are `|`-separated; each entry supports literal match,
//! negation (`!value`), and prefix/suffix/substring wildcards (`value*`,
//! `*value`, `*value*`). Entries are evaluated independently and the first
//! match per token wins.

use serde_json::Value;

use crate::error::{invalid_data, Result};
use crate::graph::{Vertex, WorkflowGraph};
use crate::models::{prop_str, ItemId, TransactionKey};
use crate::workflow::context::EngineContext;

/// Whether one alias entry matches one routing token
fn entry_matches(entry: &str, token: &str) -> bool {
    if let Some(negated) = entry.strip_prefix('!') {
        return token != negated;
    }
    if let Some(inner) = entry
        .strip_prefix('*')
        .and_then(|rest| rest.strip_suffix('*'))
    {
        return token.contains(inner);
    }
    if let Some(suffix) = entry.strip_prefix('*') {
        return token.ends_with(suffix);
    }
    if let Some(prefix) = entry.strip_suffix('*') {
        return token.starts_with(prefix);
    }
    entry == token
}

/// Whether an edge alias matches any of the routing tokens
pub fn alias_matches(alias: &str, tokens: &[String]) -> bool {
    if alias.is_empty() {
        return false;
    }
    tokens
        .iter()
        .any(|token| alias.split('|').any(|entry| entry_matches(entry, token)))
}

/// Normalize an evaluator result into a token list
pub fn tokens_from_value(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Ok(other.to_string()),
            })
            .collect(),
        Value::Bool(b) => Ok(vec![b.to_string()]),
        Value::Number(n) => Ok(vec![n.to_string()]),
        other => Err(invalid_data(format!(
            "Routing result {other} is not a token list"
        ))),
    }
}

/// Evaluate a split's routing configuration into alias tokens
///
/// `RoutingScript` names a registered script; `RoutingExpr` is handed to the
/// evaluator verbatim (the in-memory host resolves `literal:` expressions
/// without registration). A split with neither is a configuration error.
pub async fn evaluate_routing(
    ctx: &EngineContext,
    graph: &WorkflowGraph,
    split: &Vertex,
    item: ItemId,
    txn: &TransactionKey,
) -> Result<Vec<String>> {
    let context = prop_str(&split.properties, "RoutingScript")
        .or_else(|| prop_str(&split.properties, "RoutingExpr"))
        .ok_or_else(|| {
            invalid_data(format!(
                "Split '{}' has no routing script or expression",
                graph.path_of(split.id).unwrap_or_else(|_| split.name.clone())
            ))
        })?;
    let result = ctx
        .scripts
        .evaluate(item, &split.properties, context, Some(txn))
        .await?;
    let tokens = tokens_from_value(&result)?;
    tracing::debug!(
        split = %split.name,
        context = context,
        tokens = ?tokens,
        "Evaluated split routing"
    );
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokens(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_literal_and_alternative_match() {
        assert!(alias_matches("A|B", &tokens(&["A"])));
        assert!(alias_matches("A|B", &tokens(&["B"])));
        assert!(!alias_matches("A|B", &tokens(&["C"])));
    }

    #[test]
    fn test_negation() {
        assert!(!alias_matches("!A", &tokens(&["A"])));
        assert!(alias_matches("!A", &tokens(&["B"])));
    }

    #[test]
    fn test_wildcards() {
        assert!(alias_matches("*fix", &tokens(&["hotfix"])));
        assert!(!alias_matches("*fix", &tokens(&["fixture"])));
        assert!(alias_matches("pre*", &tokens(&["prerelease"])));
        assert!(!alias_matches("pre*", &tokens(&["release"])));
        assert!(alias_matches("*sub*", &tokens(&["a-sub-b"])));
        assert!(!alias_matches("*sub*", &tokens(&["other"])));
    }

    #[test]
    fn test_empty_alias_never_matches() {
        assert!(!alias_matches("", &tokens(&["A"])));
    }

    #[test]
    fn test_spec_alias_table_against_token_a() {
        // Edges aliased "A|B", "!A", "*fix", "pre*", "*sub*" with routing ["A"]
        let routing = tokens(&["A"]);
        assert!(alias_matches("A|B", &routing));
        assert!(!alias_matches("!A", &routing));
        // Substring rules evaluated against the literal token "A"
        assert!(!alias_matches("*fix", &routing));
        assert!(!alias_matches("pre*", &routing));
        assert!(!alias_matches("*sub*", &routing));
    }

    #[test]
    fn test_token_normalization() {
        assert_eq!(
            tokens_from_value(&json!("A, B ,C")).unwrap(),
            tokens(&["A", "B", "C"])
        );
        assert_eq!(
            tokens_from_value(&json!(["left", "right"])).unwrap(),
            tokens(&["left", "right"])
        );
        assert_eq!(tokens_from_value(&json!(true)).unwrap(), tokens(&["true"]));
        assert_eq!(tokens_from_value(&json!(3)).unwrap(), tokens(&["3"]));
        assert!(tokens_from_value(&json!({"not": "tokens"})).is_err());
    }
}
