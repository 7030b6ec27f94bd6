//! Template placeholder rendering.
//!
//! Bodies use `{field}` placeholders resolved against a customer's
//! attributes (plus the `phone` built-in). Rendering happens once, at
//! planning time. A missing field fails only that recipient's message; the
//! planner records it as skipped and the batch proceeds.

use sw_common::Customer;

/// A per-recipient render failure. Isolated by the planner, never propagated
/// as a batch-level error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError {
    pub missing_field: String,
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "missing attribute '{}'", self.missing_field)
    }
}

impl std::error::Error for RenderError {}

/// Substitute every `{field}` in `body` from the customer's attributes.
/// `{{` and `}}` escape literal braces.
pub fn render(body: &str, customer: &Customer) -> Result<String, RenderError> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    field.push(c);
                }
                if !closed || field.is_empty() {
                    // Malformed placeholder; keep the literal text.
                    out.push('{');
                    out.push_str(&field);
                    if closed {
                        out.push('}');
                    }
                    continue;
                }
                match customer.field(&field) {
                    Some(value) => out.push_str(value),
                    None => return Err(RenderError { missing_field: field }),
                }
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

/// Distinct placeholder names in a template body, in first-seen order.
pub fn placeholders(body: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '{' {
            if chars.peek() == Some(&'{') {
                chars.next();
                continue;
            }
            let mut field = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                field.push(c);
            }
            if closed && !field.is_empty() && !found.contains(&field) {
                found.push(field);
            }
        } else if c == '}' && chars.peek() == Some(&'}') {
            chars.next();
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn customer() -> Customer {
        let mut attributes = BTreeMap::new();
        attributes.insert("name".to_string(), "Ada".to_string());
        attributes.insert("category".to_string(), "bulk_buyer".to_string());
        Customer {
            id: "cust-1".into(),
            phone: "+15550001".into(),
            attributes,
        }
    }

    #[test]
    fn substitutes_attributes_and_builtins() {
        let body = "Hi {name}, we have an offer for {phone}";
        assert_eq!(
            render(body, &customer()).unwrap(),
            "Hi Ada, we have an offer for +15550001"
        );
    }

    #[test]
    fn missing_field_names_the_culprit() {
        let err = render("Hi {nickname}", &customer()).unwrap_err();
        assert_eq!(err.missing_field, "nickname");
    }

    #[test]
    fn escaped_braces_pass_through() {
        assert_eq!(render("{{literal}} {name}", &customer()).unwrap(), "{literal} Ada");
    }

    #[test]
    fn unclosed_placeholder_is_literal() {
        assert_eq!(render("oops {name", &customer()).unwrap(), "oops {name");
    }

    #[test]
    fn extracts_distinct_placeholders_in_order() {
        assert_eq!(
            placeholders("Hi {name}, {name}: your {category} deal at {phone}"),
            vec!["name", "category", "phone"]
        );
        assert!(placeholders("no fields {{here}}").is_empty());
    }
}
