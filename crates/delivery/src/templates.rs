//! Template rendering — merge variables and light markup to final
//! subject/HTML/text.
//!
//! Deliberately not a general templating engine: a `{{name}}` token pass,
//! `**bold**`/`*italic*` emphasis, and blank-line paragraph handling are
//! the whole grammar. Rendering is pure and deterministic; unknown tokens
//! are left as literal text so a missing optional field can never crash a
//! send.

use std::collections::HashMap;

use coursedrip_core::types::Recipient;

/// Replace `{{key}}` tokens from `vars`. Unknown tokens stay literal.
pub fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let token = &after_open[..end];
                match vars.get(token.trim()) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(token);
                        out.push_str("}}");
                    }
                }
                rest = &after_open[end + 2..];
            }
            None => {
                // Dangling "{{" with no closer: literal from here on.
                out.push_str("{{");
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render a subject line: token substitution only.
pub fn render_subject(template: &str, vars: &HashMap<String, String>) -> String {
    substitute(template, vars)
}

/// Render an HTML body: tokens, emphasis markup, paragraph blocks.
pub fn render_html(template: &str, vars: &HashMap<String, String>) -> String {
    let substituted = substitute(template, vars);
    let emphasized = replace_pairs(&substituted, "**", "<strong>", "</strong>");
    let emphasized = replace_pairs(&emphasized, "*", "<em>", "</em>");

    paragraphs(&emphasized)
        .iter()
        .map(|p| format!("<p>{}</p>", p.replace('\n', "<br />")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a plain-text body: tokens substituted, emphasis markers
/// stripped, paragraph breaks normalized to exactly one blank line.
pub fn render_text(template: &str, vars: &HashMap<String, String>) -> String {
    let substituted = substitute(template, vars);
    let stripped = replace_pairs(&substituted, "**", "", "");
    let stripped = replace_pairs(&stripped, "*", "", "");

    paragraphs(&stripped).join("\n\n")
}

/// Standard merge-variable map for a recipient. Profile attributes come
/// first; the built-in keys win on collision.
pub fn merge_vars(recipient: &Recipient) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = recipient.attributes.clone();
    vars.insert("first_name".to_string(), recipient.first_name.clone());
    vars.insert("last_name".to_string(), recipient.last_name.clone());
    vars.insert("email".to_string(), recipient.email.clone());
    vars
}

/// Replace paired `marker`s with open/close strings. An unmatched trailing
/// marker is left as literal text.
fn replace_pairs(input: &str, marker: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(a) = rest.find(marker) {
        let after_open = &rest[a + marker.len()..];
        match after_open.find(marker) {
            Some(b) => {
                out.push_str(&rest[..a]);
                out.push_str(open);
                out.push_str(&after_open[..b]);
                out.push_str(close);
                rest = &after_open[b + marker.len()..];
            }
            None => {
                out.push_str(&rest[..a + marker.len()]);
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Split into trimmed, non-empty paragraphs on blank lines.
fn paragraphs(input: &str) -> Vec<String> {
    input
        .replace("\r\n", "\n")
        .split("\n\n")
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitution() {
        let out = substitute(
            "Hi {{first_name}}, welcome to {{course}}!",
            &vars(&[("first_name", "Ada"), ("course", "Rust 101")]),
        );
        assert_eq!(out, "Hi Ada, welcome to Rust 101!");
    }

    #[test]
    fn test_unknown_token_left_literal() {
        let out = substitute("Hi {{first_name}}, {{mystery}}", &vars(&[("first_name", "Ada")]));
        assert_eq!(out, "Hi Ada, {{mystery}}");
    }

    #[test]
    fn test_token_whitespace_trimmed() {
        let out = substitute("Hi {{ first_name }}", &vars(&[("first_name", "Ada")]));
        assert_eq!(out, "Hi Ada");
    }

    #[test]
    fn test_dangling_open_is_literal() {
        let out = substitute("broken {{first_name", &vars(&[("first_name", "Ada")]));
        assert_eq!(out, "broken {{first_name");
    }

    #[test]
    fn test_render_is_deterministic() {
        let v = vars(&[("first_name", "Ada")]);
        let template = "Hi {{first_name}},\n\n**Big news** about *your* course.";
        assert_eq!(render_html(template, &v), render_html(template, &v));
        assert_eq!(render_text(template, &v), render_text(template, &v));
    }

    #[test]
    fn test_html_emphasis() {
        let out = render_html("This is **bold** and *italic*.", &HashMap::new());
        assert_eq!(out, "<p>This is <strong>bold</strong> and <em>italic</em>.</p>");
    }

    #[test]
    fn test_unmatched_marker_stays_literal() {
        let out = render_html("5 * 3 = 15", &HashMap::new());
        assert_eq!(out, "<p>5 * 3 = 15</p>");
    }

    #[test]
    fn test_html_paragraphs_and_line_breaks() {
        let out = render_html("First line\nsecond line\n\nNext paragraph", &HashMap::new());
        assert_eq!(
            out,
            "<p>First line<br />second line</p>\n<p>Next paragraph</p>"
        );
    }

    #[test]
    fn test_text_strips_markup_and_normalizes_breaks() {
        let out = render_text("**Hello** there\n\n\n\n*fine* print", &HashMap::new());
        assert_eq!(out, "Hello there\n\nfine print");
    }

    #[test]
    fn test_merge_vars_builtins_win() {
        use chrono::Utc;
        use uuid::Uuid;

        let mut attributes = HashMap::new();
        attributes.insert("course".to_string(), "Rust 101".to_string());
        attributes.insert("email".to_string(), "spoofed@example.com".to_string());

        let recipient = Recipient {
            id: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            tags: vec![],
            attributes,
            created_at: Utc::now(),
        };

        let v = merge_vars(&recipient);
        assert_eq!(v.get("course").map(String::as_str), Some("Rust 101"));
        assert_eq!(v.get("email").map(String::as_str), Some("ada@example.com"));
        assert_eq!(v.get("first_name").map(String::as_str), Some("Ada"));
    }
}
