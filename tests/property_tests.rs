//! Property-based coverage of the alias matcher and routing token
//! normalization.

use proptest::prelude::*;
use serde_json::json;

use itemflow::workflow::routing::{alias_matches, tokens_from_value};

fn plain_token() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9]{1,8}"
}

proptest! {
    #[test]
    fn literal_alias_always_matches_its_own_token(token in plain_token()) {
        prop_assert!(alias_matches(&token, &[token.clone()]));
    }

    #[test]
    fn negation_matches_every_other_token(a in plain_token(), b in plain_token()) {
        let alias = format!("!{a}");
        prop_assert_eq!(alias_matches(&alias, &[b.clone()]), a != b);
    }

    #[test]
    fn prefix_wildcard_matches_extensions(stem in plain_token(), rest in plain_token()) {
        let alias = format!("{stem}*");
        let token = format!("{stem}{rest}");
        prop_assert!(alias_matches(&alias, &[token]));
    }

    #[test]
    fn suffix_wildcard_matches_prefixed_tokens(stem in plain_token(), rest in plain_token()) {
        let alias = format!("*{stem}");
        let token = format!("{rest}{stem}");
        prop_assert!(alias_matches(&alias, &[token]));
    }

    #[test]
    fn alternatives_match_when_any_entry_does(a in plain_token(), b in plain_token()) {
        let alias = format!("{a}|{b}");
        prop_assert!(alias_matches(&alias, &[a.clone()]));
        prop_assert!(alias_matches(&alias, &[b.clone()]));
    }

    #[test]
    fn comma_lists_normalize_to_trimmed_tokens(tokens in prop::collection::vec(plain_token(), 1..5)) {
        let joined = tokens.join(" , ");
        let parsed = tokens_from_value(&json!(joined)).unwrap();
        prop_assert_eq!(parsed, tokens);
    }
}
