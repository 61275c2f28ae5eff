use std::collections::{BTreeSet, HashMap};

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use super::AclError;
use super::types::{AggregatedRule, PermissionRule, Privilege};

#[derive(Parser)]
#[grammar = "acl/grammar.pest"]
struct AclParser;

pub fn decode(input: &str) -> Result<PermissionRule, AclError> {
    let pairs =
        AclParser::parse(Rule::acl_item, input).map_err(|e| AclError::Syntax(e.to_string()))?;

    let mut rule = PermissionRule::default();
    for pair in pairs {
        if pair.as_rule() != Rule::acl_item {
            continue;
        }
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::grant => parse_grant(inner, &mut rule)?,
                Rule::grantor => rule.grantor = parse_name(inner),
                Rule::EOI => {}
                other => return Err(unexpected_rule(other)),
            }
        }
    }

    let with_grant_option = rule.privileges_with_grant_option.clone();
    rule.privileges.retain(|p| !with_grant_option.contains(p));

    Ok(rule)
}

pub fn encode(rule: &PermissionRule) -> String {
    rule.to_string()
}

pub fn decode_many<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<PermissionRule>, AclError> {
    inputs.iter().map(|input| decode(input.as_ref())).collect()
}

/// Folds every item of a grantee into one entry, keeping first-seen grantee order.
pub fn aggregate<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<AggregatedRule>, AclError> {
    let mut merged: Vec<AggregatedRule> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for input in inputs {
        let rule = decode(input.as_ref())?;
        let slot = *index.entry(rule.grantee.clone()).or_insert_with(|| {
            merged.push(AggregatedRule {
                grantee: rule.grantee.clone(),
                ..Default::default()
            });
            merged.len() - 1
        });

        let entry = &mut merged[slot];
        entry.merged_rules += 1;
        entry.privileges.extend(rule.privileges);
        entry
            .privileges_with_grant_option
            .extend(rule.privileges_with_grant_option);
    }

    for entry in &mut merged {
        let with_grant_option: BTreeSet<Privilege> = entry.privileges_with_grant_option.clone();
        entry.privileges.retain(|p| !with_grant_option.contains(p));
    }

    Ok(merged)
}

fn parse_grant(pair: Pair<'_, Rule>, rule: &mut PermissionRule) -> Result<(), AclError> {
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::grantee => rule.grantee = parse_name(inner),
            Rule::privileges => parse_privileges(inner, rule)?,
            Rule::grantor => rule.grantor = parse_name(inner),
            other => return Err(unexpected_rule(other)),
        }
    }
    Ok(())
}

fn parse_privileges(pair: Pair<'_, Rule>, rule: &mut PermissionRule) -> Result<(), AclError> {
    for privilege in pair.into_inner() {
        let mut parts = privilege.into_inner();
        let symbol = parts
            .next()
            .and_then(|s| s.as_str().chars().next())
            .ok_or_else(|| AclError::Syntax("expected privilege symbol".to_string()))?;

        let decoded = Privilege::from_symbol(symbol)?;
        if parts.next().is_some() {
            rule.privileges_with_grant_option.insert(decoded);
        } else {
            rule.privileges.insert(decoded);
        }
    }
    Ok(())
}

fn parse_name(pair: Pair<'_, Rule>) -> String {
    match pair.into_inner().next() {
        Some(name) if name.as_rule() == Rule::quoted_name => {
            let quoted = name.as_str();
            quoted[1..quoted.len() - 1].replace("\"\"", "\"")
        }
        Some(name) => name.as_str().to_string(),
        None => String::new(),
    }
}

fn unexpected_rule(rule: Rule) -> AclError {
    AclError::Syntax(format!("unexpected rule: {rule:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(privileges: &[Privilege]) -> BTreeSet<Privilege> {
        privileges.iter().copied().collect()
    }

    #[test]
    fn decode_plain_rule() {
        let rule = decode("alice=r/bob").unwrap();

        assert_eq!(rule.grantee, "alice");
        assert_eq!(rule.grantor, "bob");
        assert_eq!(rule.privileges, set(&[Privilege::Select]));
        assert!(rule.privileges_with_grant_option.is_empty());
    }

    #[test]
    fn decode_missing_grantee_is_public() {
        let rule = decode("=r/bob").unwrap();

        assert_eq!(rule.grantee, "");
        assert!(rule.is_public());
        assert_eq!(rule.grantor, "bob");
    }

    #[test]
    fn decode_bare_grantor_has_no_privileges() {
        let rule = decode("bob").unwrap();

        assert_eq!(rule.grantee, "");
        assert_eq!(rule.grantor, "bob");
        assert!(rule.privileges.is_empty());
        assert!(rule.privileges_with_grant_option.is_empty());
    }

    #[test]
    fn decode_empty_privilege_list() {
        let rule = decode("=/bob").unwrap();
        assert!(rule.effective().is_empty());
        assert_eq!(rule.grantor, "bob");
    }

    #[test]
    fn decode_splits_grant_option_markers() {
        let rule = decode("etl=ar*w*d/admin").unwrap();

        assert_eq!(rule.privileges, set(&[Privilege::Insert, Privilege::Delete]));
        assert_eq!(
            rule.privileges_with_grant_option,
            set(&[Privilege::Select, Privilege::Update])
        );
    }

    #[test]
    fn decode_quoted_names_with_special_characters() {
        let rule = decode(r#""data team"=UC/"we""ird=/""#).unwrap();

        assert_eq!(rule.grantee, "data team");
        assert_eq!(rule.grantor, "we\"ird=/");
        assert_eq!(rule.privileges, set(&[Privilege::Usage, Privilege::Create]));
    }

    #[test]
    fn decode_letter_listed_twice_keeps_grant_option_only() {
        let rule = decode("alice=rr*/bob").unwrap();

        assert!(rule.privileges.is_empty());
        assert_eq!(rule.privileges_with_grant_option, set(&[Privilege::Select]));
    }

    #[test]
    fn decode_unknown_letter_is_malformed_symbol() {
        let err = decode("alice=rq/bob").unwrap_err();
        assert_eq!(err, AclError::MalformedPermissionSymbol('q'));
    }

    #[test]
    fn decode_missing_grantor_is_syntax_error() {
        let err = decode("alice=r/").unwrap_err();
        assert!(matches!(err, AclError::Syntax(_)), "got: {err}");
    }

    #[test]
    fn encode_then_decode_preserves_rule() {
        let rule = PermissionRule::new(
            "report\"ing",
            "owner",
            [Privilege::Select, Privilege::Truncate, Privilege::Trigger],
            [Privilege::References, Privilege::Delete],
        );

        let decoded = decode(&encode(&rule)).unwrap();
        assert_eq!(decoded, rule);
    }

    fn partition(mut code: usize) -> (Vec<Privilege>, Vec<Privilege>) {
        let mut plain = Vec::new();
        let mut with_grant_option = Vec::new();
        for privilege in Privilege::ALL {
            match code % 3 {
                1 => plain.push(privilege),
                2 => with_grant_option.push(privilege),
                _ => {}
            }
            code /= 3;
        }
        (plain, with_grant_option)
    }

    #[test]
    fn encode_then_decode_holds_across_partitions_and_names() {
        let grantees = ["", "a\"b", "x=y/z", "analyst", "with space", "\"\""];
        let grantors = ["owner", "a\"b", "x=y/z"];
        let total = 3usize.pow(Privilege::ALL.len() as u32);

        let codes = (0..total).step_by(41).chain([total - 1]);
        for (i, code) in codes.enumerate() {
            let (plain, with_grant_option) = partition(code);
            let rule = PermissionRule::new(
                grantees[i % grantees.len()],
                grantors[i % grantors.len()],
                plain,
                with_grant_option,
            );

            let encoded = encode(&rule);
            let decoded = decode(&encoded)
                .unwrap_or_else(|e| panic!("failed to decode {encoded}: {e}"));
            assert_eq!(decoded, rule, "round trip through {encoded}");
        }
    }

    #[test]
    fn decode_many_keeps_every_item() {
        let rules = decode_many(&["alice=r/bob", "alice=a/carol", "=c/bob"]).unwrap();

        assert_eq!(rules.len(), 3);
        assert_eq!(rules[1].grantor, "carol");
        assert!(rules[2].is_public());
    }

    #[test]
    fn decode_many_fails_on_first_bad_item() {
        let err = decode_many(&["alice=r/bob", "alice=?/bob"]).unwrap_err();
        assert_eq!(err, AclError::MalformedPermissionSymbol('?'));
    }

    #[test]
    fn aggregate_grant_option_wins_over_plain() {
        let merged = aggregate(&["alice=r*/bob", "alice=r/carol"]).unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].grantee, "alice");
        assert_eq!(merged[0].merged_rules, 2);
        assert!(merged[0].privileges.is_empty());
        assert_eq!(
            merged[0].privileges_with_grant_option,
            set(&[Privilege::Select])
        );
    }

    #[test]
    fn aggregate_grant_option_arriving_later_still_wins() {
        let merged = aggregate(&["alice=ra/carol", "alice=r*/bob"]).unwrap();

        assert_eq!(merged[0].privileges, set(&[Privilege::Insert]));
        assert_eq!(
            merged[0].privileges_with_grant_option,
            set(&[Privilege::Select])
        );
    }

    #[test]
    fn aggregate_groups_by_grantee_in_first_seen_order() {
        let merged =
            aggregate(&["bob=r/owner", "=c/owner", "bob=w/owner", "carol=U/owner"]).unwrap();

        let grantees: Vec<&str> = merged.iter().map(|m| m.grantee.as_str()).collect();
        assert_eq!(grantees, vec!["bob", "", "carol"]);
        assert_eq!(merged[0].merged_rules, 2);
        assert_eq!(
            merged[0].privileges,
            set(&[Privilege::Select, Privilege::Update])
        );
        assert_eq!(merged[1].merged_rules, 1);
    }
}
