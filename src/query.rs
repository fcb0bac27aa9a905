//! Query-string sanitisation against the entity catalog.
//!
//! The sanitiser rewrites only `$top` and `$orderby`; every other parameter
//! passes through byte-for-byte in its original position. It is pure: no
//! network, no clock.

use crate::catalog;

/// Rewrite a raw query string for the given entity.
///
/// Returns the sanitised string prefixed with `?`, or an empty string when no
/// parameters remain. `entity` is `None` when the request path carried no
/// entity segment.
pub fn sanitise_query(raw: &str, entity: Option<&str>) -> String {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    if raw.is_empty() {
        return String::new();
    }

    let entity = entity.unwrap_or("");
    let mut kept: Vec<String> = Vec::new();

    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key_raw, value_raw) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };

        match decode(key_raw).as_str() {
            "$top" => {
                if let Some(capped) = cap_top(&decode(value_raw), catalog::top_cap_for(entity)) {
                    kept.push(format!("{}={}", key_raw, capped));
                }
                // zero, negative, or non-integer $top is dropped
            }
            "$orderby" => {
                if let Some(rewritten) =
                    rewrite_orderby(&decode(value_raw), catalog::fields_for(entity))
                {
                    kept.push(format!("{}={}", key_raw, urlencoding::encode(&rewritten)));
                }
            }
            _ => kept.push(pair.to_string()),
        }
    }

    if kept.is_empty() {
        String::new()
    } else {
        format!("?{}", kept.join("&"))
    }
}

/// Whether a (possibly sanitised) query string carries a `$filter` parameter.
pub fn has_filter(query: &str) -> bool {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|p| !p.is_empty())
        .any(|pair| {
            let key = pair.split_once('=').map(|(k, _)| k).unwrap_or(pair);
            decode(key) == "$filter"
        })
}

/// First value of a named query parameter, percent-decoded.
pub fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|p| !p.is_empty())
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (decode(key) == name).then(|| decode(value))
        })
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Clamp `$top` to the entity cap. `None` means the parameter is dropped.
fn cap_top(value: &str, cap: u32) -> Option<u32> {
    let parsed: i64 = value.trim().parse().ok()?;
    if parsed <= 0 {
        return None;
    }
    Some((parsed as u64).min(cap as u64) as u32)
}

/// Validate `$orderby` segments against the sortable-field allowlist.
///
/// `None` means the parameter is deleted entirely (only possible when the
/// entity exposes no fields at all).
fn rewrite_orderby(value: &str, fields: &[&'static str]) -> Option<String> {
    if fields.is_empty() {
        return None;
    }

    let mut valid: Vec<String> = Vec::new();
    for segment in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let mut tokens = segment.split_whitespace();
        let field = match tokens.next() {
            Some(f) => f,
            None => continue,
        };
        let direction = tokens.next();

        if let Some(canonical) = fields.iter().find(|f| f.eq_ignore_ascii_case(field)) {
            if direction.is_some_and(|d| d.eq_ignore_ascii_case("desc")) {
                valid.push(format!("{} desc", canonical));
            } else {
                valid.push((*canonical).to_string());
            }
        }
    }

    if !valid.is_empty() {
        return Some(valid.join(", "));
    }

    // Nothing survived: fall back to a safe sort key, keeping the requested
    // direction when the original expression asked for descending anywhere.
    let safe = fields
        .iter()
        .find(|f| f.ends_with("Id") || **f == "Reference")
        .unwrap_or(&fields[0]);
    if value.to_ascii_lowercase().contains("desc") {
        Some(format!("{} desc", safe))
    } else {
        Some((*safe).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_is_capped_to_the_entity_limit() {
        let out = sanitise_query(
            "$filter=FinancialYear%20eq%202025&$top=500",
            Some("FinancialMutations"),
        );
        assert_eq!(out, "?$filter=FinancialYear%20eq%202025&$top=100");
    }

    #[test]
    fn top_below_cap_is_untouched() {
        assert_eq!(sanitise_query("$top=50", Some("Units")), "?$top=50");
    }

    #[test]
    fn invalid_top_is_dropped() {
        assert_eq!(sanitise_query("$top=0", Some("Units")), "");
        assert_eq!(sanitise_query("$top=-5", Some("Units")), "");
        assert_eq!(sanitise_query("$top=abc", Some("Units")), "");
        assert_eq!(sanitise_query("$top=10.5", Some("Units")), "");
        assert_eq!(
            sanitise_query("$top=abc&$select=UnitId", Some("Units")),
            "?$select=UnitId"
        );
    }

    #[test]
    fn orderby_drops_unknown_fields_and_normalises_direction() {
        let out = sanitise_query("$orderby=Foo%20desc,UnitId%20asc", Some("Units"));
        assert_eq!(out, "?$orderby=UnitId");
    }

    #[test]
    fn orderby_keeps_desc_on_known_fields() {
        let out = sanitise_query("$orderby=UnitId%20DESC", Some("Units"));
        assert_eq!(out, "?$orderby=UnitId%20desc");
    }

    #[test]
    fn orderby_canonicalises_field_casing() {
        let out = sanitise_query("$orderby=unitid", Some("Units"));
        assert_eq!(out, "?$orderby=UnitId");
    }

    #[test]
    fn orderby_with_no_valid_segment_falls_back_to_safe_field() {
        assert_eq!(
            sanitise_query("$orderby=Bogus", Some("Units")),
            "?$orderby=UnitId"
        );
        assert_eq!(
            sanitise_query("$orderby=Bogus%20desc", Some("Units")),
            "?$orderby=UnitId%20desc"
        );
    }

    #[test]
    fn orderby_fallback_applies_to_unknown_entities_too() {
        // Unknown entities use the generic field set; "Id" is the safe key.
        assert_eq!(
            sanitise_query("$orderby=Whatever", Some("Mystery")),
            "?$orderby=Id"
        );
    }

    #[test]
    fn other_parameters_pass_through_in_order() {
        let raw = "$select=UnitId,City&$filter=City%20eq%20%27Delft%27&$count=true";
        assert_eq!(sanitise_query(raw, Some("Units")), format!("?{}", raw));
    }

    #[test]
    fn empty_query_stays_empty() {
        assert_eq!(sanitise_query("", Some("Units")), "");
        assert_eq!(sanitise_query("?", Some("Units")), "");
    }

    #[test]
    fn has_filter_detects_the_parameter() {
        assert!(has_filter("?$filter=UnitId%20eq%201"));
        assert!(has_filter("$top=5&$filter=x"));
        assert!(!has_filter("?$top=5"));
        assert!(!has_filter(""));
    }

    #[test]
    fn query_param_decodes_values() {
        assert_eq!(
            query_param("?entity=Units&x=1", "entity"),
            Some("Units".to_string())
        );
        assert_eq!(
            query_param("entity=financial%20mutations", "entity"),
            Some("financial mutations".to_string())
        );
        assert_eq!(query_param("?x=1", "entity"), None);
    }
}
