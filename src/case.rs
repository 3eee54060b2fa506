//! Identifier casing helpers used by metadata build, relation inference and slug rules.

use regex::Regex;
use std::sync::OnceLock;

/// Convert a single identifier from snake_case to camelCase.
/// e.g. "blog_post" -> "blogPost", "tag" -> "tag"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in s.chars() {
        if c == '_' {
            capitalize_next = !out.is_empty();
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Upper-case the first character: "team" -> "Team".
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Lower-case the first character: "BlogPost" -> "blogPost".
pub fn decapitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn separator_runs() -> Result<&'static Regex, regex::Error> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+")).as_ref().map_err(Clone::clone)
}

/// Lower-case and collapse every run of non-alphanumerics into a single '-'.
/// e.g. "Hello,  World!" -> "hello-world"
pub fn slugify(s: &str) -> Result<String, regex::Error> {
    let lower = s.trim().to_lowercase();
    Ok(separator_runs()?
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string())
}
