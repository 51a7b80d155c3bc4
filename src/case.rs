//! Name normalisation: URL entity segments to canonical entity names, struct-style field
//! names (`SiteID`) to column names (`site_id`).

/// Canonical entity name for a path segment: first letter upper-cased, rest untouched.
/// e.g. "gatePass" -> "GatePass", "due" -> "Due"
pub fn canonical_entity_name(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Convert a PascalCase or camelCase identifier to snake_case, keeping acronym runs together.
/// e.g. "SiteID" -> "site_id", "userId" -> "user_id", "HTTPStatus" -> "http_status"
pub fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).map(|n| n.is_lowercase()).unwrap_or(false);
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if i > 0 && (prev_lower || (prev_upper && next_lower)) && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Split a comma-separated exclude list and normalise each entry to a column name.
pub fn exclude_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(to_snake_case)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_entity_name("due"), "Due");
        assert_eq!(canonical_entity_name("gatePass"), "GatePass");
        assert_eq!(canonical_entity_name(""), "");
    }

    #[test]
    fn snake_case_handles_acronyms() {
        assert_eq!(to_snake_case("SiteID"), "site_id");
        assert_eq!(to_snake_case("ID"), "id");
        assert_eq!(to_snake_case("userId"), "user_id");
        assert_eq!(to_snake_case("DateCreated"), "date_created");
        assert_eq!(to_snake_case("HTTPStatus"), "http_status");
        assert_eq!(to_snake_case("site_id"), "site_id");
    }

    #[test]
    fn exclude_list_normalises_entries() {
        assert_eq!(exclude_list("SiteID, DateCreated,"), vec!["site_id", "date_created"]);
        assert!(exclude_list("").is_empty());
    }
}
