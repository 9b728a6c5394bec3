// ABOUTME: Placeholder substitution for configuration payloads sent to the target.
// ABOUTME: Rendering fails if any {{NAME}} marker survives substitution.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unresolved placeholder(s) in {template}: {}", .names.join(", "))]
    Unresolved { template: String, names: Vec<String> },
}

/// A template with `{{NAME}}` placeholders.
#[derive(Debug, Clone)]
pub struct Template<'a> {
    name: String,
    source: &'a str,
    values: BTreeMap<&'static str, String>,
}

impl<'a> Template<'a> {
    pub fn new(name: impl Into<String>, source: &'a str) -> Self {
        Self {
            name: name.into(),
            source,
            values: BTreeMap::new(),
        }
    }

    pub fn set(mut self, key: &'static str, value: impl ToString) -> Self {
        self.values.insert(key, value.to_string());
        self
    }

    /// Substitute every known placeholder, then refuse the result if any marker remains.
    pub fn render(&self) -> Result<String, TemplateError> {
        let mut out = self.source.to_string();
        for (key, value) in &self.values {
            out = out.replace(&format!("{{{{{key}}}}}"), value);
        }

        let names = unresolved(&out);
        if names.is_empty() {
            Ok(out)
        } else {
            Err(TemplateError::Unresolved {
                template: self.name.clone(),
                names,
            })
        }
    }
}

/// Names of `{{...}}` markers left in `text`, in order of first appearance.
pub fn unresolved(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // An opening marker with no close is still an unresolved marker.
            let name = after.lines().next().unwrap_or("").trim().to_string();
            if !names.contains(&name) {
                names.push(name);
            }
            break;
        };
        let name = after[..end].trim().to_string();
        if !names.contains(&name) {
            names.push(name);
        }
        rest = &after[end + 2..];
    }
    names
}
