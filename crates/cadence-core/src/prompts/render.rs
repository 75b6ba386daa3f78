//! `{placeholder}` substitution.
//!
//! A placeholder is `{` + one or more `[A-Za-z0-9_]` + `}`. Any other brace
//! is literal text, so JSON examples inside templates need no escaping.

use std::collections::BTreeMap;

/// Values substituted into a template.
pub type Vars = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("template {template:?} references unknown placeholder {{{name}}}")]
    MissingPlaceholder { template: String, name: String },

    #[error("template {0:?} not found")]
    UnknownTemplate(String),
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Byte ranges of every placeholder name in `template`.
fn scan(template: &str) -> Vec<(usize, usize)> {
    let bytes = template.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && is_ident(bytes[end] as char) {
                end += 1;
            }
            if end > start && end < bytes.len() && bytes[end] == b'}' {
                spans.push((start, end));
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    spans
}

/// Names of all placeholders in order of appearance (duplicates kept).
pub fn placeholders(template: &str) -> Vec<&str> {
    scan(template)
        .into_iter()
        .map(|(s, e)| &template[s..e])
        .collect()
}

/// Substitute every placeholder from `vars`. `name` is only used in error
/// messages.
pub fn render(name: &str, template: &str, vars: &Vars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for (start, end) in scan(template) {
        let key = &template[start..end];
        let value = vars.get(key).ok_or_else(|| TemplateError::MissingPlaceholder {
            template: name.to_string(),
            name: key.to_string(),
        })?;
        // `start - 1` is the opening brace.
        out.push_str(&template[last..start - 1]);
        out.push_str(value);
        last = end + 1;
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Build [`Vars`] from `(name, value)` pairs.
pub fn vars<I, K, V>(pairs: I) -> Vars
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_placeholders() {
        let out = render(
            "t",
            "Write {count} topics for {org}.",
            &vars([("count", "3"), ("org", "Acme")]),
        )
        .unwrap();
        assert_eq!(out, "Write 3 topics for Acme.");
    }

    #[test]
    fn json_braces_are_literal() {
        let template = r#"Return [{"title": "...", "n": {count}}]"#;
        assert_eq!(placeholders(template), vec!["count"]);
        let out = render("t", template, &vars([("count", "2")])).unwrap();
        assert_eq!(out, r#"Return [{"title": "...", "n": 2}]"#);
    }

    #[test]
    fn missing_placeholder_is_an_error() {
        let err = render("topics", "Hi {name}", &Vars::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingPlaceholder {
                template: "topics".into(),
                name: "name".into()
            }
        );
    }

    #[test]
    fn unmatched_and_empty_braces() {
        let out = render("t", "a {} b { c {x", &Vars::new()).unwrap();
        assert_eq!(out, "a {} b { c {x");
    }

    #[test]
    fn repeated_placeholder() {
        let out = render("t", "{a}-{a}", &vars([("a", "x")])).unwrap();
        assert_eq!(out, "x-x");
    }
}
