//! Removal of forbidden owner content from OData envelopes.
//!
//! Rows are dropped when any string in their transitive value graph matches a
//! forbidden name. Matching is exact on trimmed, lowercased strings; values
//! under `@odata.*` keys are never inspected.

use std::borrow::Cow;
use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

/// Owner names that must never appear in proxied payloads.
static BUILTIN_FORBIDDEN_OWNERS: &[&str] = &["wals huren", "wals beheer b.v."];

/// Set of normalised (trimmed, lowercased) strings to redact on.
#[derive(Debug, Clone)]
pub struct ForbiddenNames {
    names: HashSet<String>,
}

impl ForbiddenNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// The set shipped with the proxy.
    pub fn builtin() -> Self {
        Self::new(BUILTIN_FORBIDDEN_OWNERS.iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn matches(&self, value: &str) -> bool {
        self.names.contains(&value.trim().to_lowercase())
    }
}

impl Default for ForbiddenNames {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Redact an upstream response body.
///
/// Returns the input bytes untouched when the body is not JSON, is not an
/// OData collection envelope, or no row matches; otherwise reserialises the
/// envelope with the matching rows removed. Top-level envelope fields
/// (`@odata.count` included) are preserved as-is.
pub fn redact_envelope<'a>(body: &'a [u8], forbidden: &ForbiddenNames) -> Cow<'a, [u8]> {
    if forbidden.is_empty() {
        return Cow::Borrowed(body);
    }

    let parsed: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return Cow::Borrowed(body),
    };
    let envelope = match parsed.as_object() {
        Some(o) => o,
        None => return Cow::Borrowed(body),
    };
    let rows = match envelope.get("value").and_then(Value::as_array) {
        Some(r) => r,
        None => return Cow::Borrowed(body),
    };

    let survivors: Vec<&Value> = rows
        .iter()
        .filter(|row| !contains_forbidden(row, forbidden))
        .collect();
    if survivors.len() == rows.len() {
        return Cow::Borrowed(body);
    }

    debug!(
        dropped = rows.len() - survivors.len(),
        remaining = survivors.len(),
        "redacted forbidden rows from response"
    );

    let mut rebuilt = serde_json::Map::new();
    for (key, value) in envelope {
        if key == "value" {
            rebuilt.insert(
                key.clone(),
                Value::Array(survivors.iter().map(|v| (*v).clone()).collect()),
            );
        } else {
            rebuilt.insert(key.clone(), value.clone());
        }
    }

    match serde_json::to_vec(&Value::Object(rebuilt)) {
        Ok(bytes) => Cow::Owned(bytes),
        Err(_) => Cow::Borrowed(body),
    }
}

/// Depth-first walk over a row's value graph with an identity-visited set, so
/// adversarial payloads cannot loop the traversal.
fn contains_forbidden(root: &Value, forbidden: &ForbiddenNames) -> bool {
    let mut stack: Vec<&Value> = vec![root];
    let mut visited: HashSet<*const Value> = HashSet::new();

    while let Some(node) = stack.pop() {
        if !visited.insert(node as *const Value) {
            continue;
        }
        match node {
            Value::String(s) => {
                if forbidden.matches(s) {
                    return true;
                }
            }
            Value::Array(items) => stack.extend(items.iter()),
            Value::Object(map) => {
                for (key, value) in map {
                    if key.starts_with("@odata.") {
                        continue;
                    }
                    stack.push(value);
                }
            }
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forbidden() -> ForbiddenNames {
        ForbiddenNames::new(["wals huren"])
    }

    #[test]
    fn matching_rows_are_dropped() {
        let body = br#"{"value":[{"OwnerName":"Acme"},{"OwnerName":"Wals Huren"}]}"#;
        let out = redact_envelope(body, &forbidden());
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["value"].as_array().unwrap().len(), 1);
        assert_eq!(parsed["value"][0]["OwnerName"], "Acme");
    }

    #[test]
    fn clean_body_passes_through_byte_identical() {
        let body = br#"{"value":[{"OwnerName":"Acme"}]}"#;
        let out = redact_envelope(body, &forbidden());
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out.as_ref(), body);
    }

    #[test]
    fn non_json_and_non_envelope_bodies_pass_through() {
        let not_json = b"<html>upstream error</html>";
        assert!(matches!(
            redact_envelope(not_json, &forbidden()),
            Cow::Borrowed(_)
        ));

        let no_value = br#"{"error":{"message":"boom"}}"#;
        assert!(matches!(
            redact_envelope(no_value, &forbidden()),
            Cow::Borrowed(_)
        ));

        let scalar_value = br#"{"value":42}"#;
        assert!(matches!(
            redact_envelope(scalar_value, &forbidden()),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn matching_is_trimmed_and_case_insensitive() {
        let body = br#"{"value":[{"OwnerName":"  WALS huren  "}]}"#;
        let out = redact_envelope(body, &forbidden());
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert!(parsed["value"].as_array().unwrap().is_empty());
    }

    #[test]
    fn near_matches_survive() {
        // Exact-match policy: longer strings containing the name are kept.
        let body = br#"{"value":[{"OwnerName":"Wals Huren BV"}]}"#;
        assert!(matches!(
            redact_envelope(body, &forbidden()),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn nested_values_are_inspected() {
        let body =
            br#"{"value":[{"Unit":{"Owner":{"Names":["x","Wals Huren"]}}},{"Unit":"ok"}]}"#;
        let out = redact_envelope(body, &forbidden());
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["value"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn odata_annotation_values_are_skipped() {
        let body = br#"{"value":[{"@odata.etag":"wals huren","OwnerName":"Acme"}]}"#;
        assert!(matches!(
            redact_envelope(body, &forbidden()),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn envelope_fields_survive_redaction() {
        let body = br#"{"@odata.context":"ctx","@odata.count":2,"value":[{"OwnerName":"Wals Huren"}]}"#;
        let out = redact_envelope(body, &forbidden());
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        // Count is deliberately left at the upstream figure.
        assert_eq!(parsed["@odata.count"], 2);
        assert_eq!(parsed["@odata.context"], "ctx");
        assert!(parsed["value"].as_array().unwrap().is_empty());
        // Top-level key order is preserved on reserialisation.
        let text = String::from_utf8(out.into_owned()).unwrap();
        assert!(text.starts_with(r#"{"@odata.context""#));
    }

    #[test]
    fn empty_forbidden_set_disables_redaction() {
        let names: [&str; 0] = [];
        let set = ForbiddenNames::new(names);
        let body = br#"{"value":[{"OwnerName":"Wals Huren"}]}"#;
        assert!(matches!(redact_envelope(body, &set), Cow::Borrowed(_)));
    }
}
