//! Composite on-disk sort keys for the three block families (§4.3) and the
//! comparison operators `find`/`search` accept.
//!
//! Every family stores the same [`Revision`](crate::write::Write) payload;
//! what differs is the byte string a family sorts by. Each encoder produces
//! a key whose lexicographic order matches the family's documented sort
//! order — `version` is always the last component so that, for a fixed
//! group prefix, revisions come out oldest-first.

use crate::value::Value;
use crate::write::Write as Revision;

/// Comparison operators accepted by `find`/`search` (§6 added).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
    Regex,
    NotRegex,
}

impl Operator {
    pub fn matches(self, lhs: &Value, rhs: &Value) -> bool {
        match self {
            Operator::Equals => lhs == rhs,
            Operator::NotEquals => lhs != rhs,
            Operator::GreaterThan => lhs.partial_cmp_typed(rhs) == Some(std::cmp::Ordering::Greater),
            Operator::GreaterThanOrEquals => matches!(
                lhs.partial_cmp_typed(rhs),
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            ),
            Operator::LessThan => lhs.partial_cmp_typed(rhs) == Some(std::cmp::Ordering::Less),
            Operator::LessThanOrEquals => matches!(
                lhs.partial_cmp_typed(rhs),
                Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
            ),
            Operator::Regex => match lhs {
                Value::String(s) | Value::Tag(s) => rhs_as_pattern(rhs).map(|re| re.is_match(s)).unwrap_or(false),
                _ => false,
            },
            Operator::NotRegex => !Operator::Regex.matches(lhs, rhs),
        }
    }
}

fn rhs_as_pattern(rhs: &Value) -> Option<regex::Regex> {
    match rhs {
        Value::String(s) | Value::Tag(s) => regex::Regex::new(s).ok(),
        _ => None,
    }
}

fn encode_str(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// `(record, key, version)` — the primary (`cpb`) family's sort key.
pub fn primary_key(record: i64, key: &str, version: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 4 + key.len() + 8);
    out.extend_from_slice(&record.to_be_bytes());
    encode_str(key, &mut out);
    out.extend_from_slice(&version.to_be_bytes());
    out
}

/// The `(record, key)` group prefix a primary scan restricts to.
pub fn primary_prefix(record: i64, key: Option<&str>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&record.to_be_bytes());
    if let Some(key) = key {
        encode_str(key, &mut out);
    }
    out
}

/// `(key, value, version)` — the secondary (`csb`) family's sort key.
/// `value` sorts by its type tag then its big-endian payload, so that
/// range comparisons for a fixed type behave as numeric/lexicographic
/// order within that type (cross-type values never compare equal here —
/// `find` across mixed types simply never matches, per [`Value::partial_cmp_typed`]).
pub fn secondary_key(key: &str, value: &Value, version: u64) -> Vec<u8> {
    let mut out = Vec::new();
    encode_str(key, &mut out);
    out.push(value.value_type() as u8);
    let payload = value.encode_be();
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&version.to_be_bytes());
    out
}

/// The `(key, [type])` group prefix a secondary scan restricts to.
pub fn secondary_key_prefix(key: &str) -> Vec<u8> {
    let mut out = Vec::new();
    encode_str(key, &mut out);
    out
}

/// `(key, token, record, version)` — the search (`ctb`) family's sort key.
pub fn search_key(key: &str, token: &str, record: i64, version: u64) -> Vec<u8> {
    let mut out = Vec::new();
    encode_str(key, &mut out);
    encode_str(token, &mut out);
    out.extend_from_slice(&record.to_be_bytes());
    out.extend_from_slice(&version.to_be_bytes());
    out
}

pub fn search_key_token_prefix(key: &str, token: &str) -> Vec<u8> {
    let mut out = Vec::new();
    encode_str(key, &mut out);
    encode_str(token, &mut out);
    out
}

/// Every composite key this revision occupies in a given family.
pub fn primary_keys_for(revision: &Revision) -> Vec<u8> {
    primary_key(revision.record, &revision.key, revision.version)
}

pub fn secondary_keys_for(revision: &Revision) -> Vec<u8> {
    secondary_key(&revision.key, &revision.value, revision.version)
}

/// Zero or more search keys — one per token, since a single STRING value
/// may contain many tokens; `Tag` values are never tokenized (§6).
pub fn search_keys_for(revision: &Revision) -> Vec<Vec<u8>> {
    revision
        .value
        .search_tokens()
        .into_iter()
        .map(|token| search_key(&revision.key, &token, revision.record, revision.version))
        .collect()
}
