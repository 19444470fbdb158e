//! `{{.Value}}` templates for rewritten resource coordinates
//!
//! Templates are parsed once at startup. A template that does not parse
//! renders as the empty string on every request instead of failing it.

use super::super::ResourceAttributes;
use thiserror::Error;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const VALUE_ACTION: &str = ".Value";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed action at offset {0}")]
    Unclosed(usize),

    #[error("unsupported action {0:?}, only {VALUE_ACTION} is available")]
    UnsupportedAction(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    Value,
}

/// A single template field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTemplate {
    parts: Result<Vec<Part>, TemplateError>,
}

impl ValueTemplate {
    pub fn parse(source: &str) -> Self {
        Self {
            parts: parse_parts(source),
        }
    }

    /// Parse failure, if any. Such a template renders as "".
    pub fn error(&self) -> Option<&TemplateError> {
        self.parts.as_ref().err()
    }

    pub fn render(&self, value: &str) -> String {
        let Ok(parts) = &self.parts else {
            return String::new();
        };
        parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => text.as_str(),
                Part::Value => value,
            })
            .collect()
    }
}

fn parse_parts(source: &str) -> Result<Vec<Part>, TemplateError> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut rest = source;
    let mut offset = 0;

    while let Some(start) = rest.find(OPEN) {
        text.push_str(&rest[..start]);
        let body_start = start + OPEN.len();
        let end = rest[body_start..]
            .find(CLOSE)
            .ok_or(TemplateError::Unclosed(offset + start))?;
        let mut action = &rest[body_start..body_start + end];

        // "{{- " and " -}}" trim adjacent whitespace
        if let Some(trimmed) = strip_left_marker(action) {
            text.truncate(text.trim_end().len());
            action = trimmed;
        }
        let trim_right = match strip_right_marker(action) {
            Some(trimmed) => {
                action = trimmed;
                true
            }
            None => false,
        };

        let action = action.trim();
        if action != VALUE_ACTION {
            return Err(TemplateError::UnsupportedAction(action.to_string()));
        }
        if !text.is_empty() {
            parts.push(Part::Text(std::mem::take(&mut text)));
        }
        parts.push(Part::Value);

        let consumed = body_start + end + CLOSE.len();
        offset += consumed;
        rest = &rest[consumed..];
        if trim_right {
            let trimmed = rest.trim_start();
            offset += rest.len() - trimmed.len();
            rest = trimmed;
        }
    }

    text.push_str(rest);
    if !text.is_empty() {
        parts.push(Part::Text(text));
    }
    Ok(parts)
}

fn strip_left_marker(action: &str) -> Option<&str> {
    let rest = action.strip_prefix('-')?;
    rest.starts_with(char::is_whitespace).then_some(rest)
}

fn strip_right_marker(action: &str) -> Option<&str> {
    let rest = action.strip_suffix('-')?;
    rest.ends_with(char::is_whitespace).then_some(rest)
}

/// Templates for all six resource coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTemplate {
    namespace: ValueTemplate,
    api_group: ValueTemplate,
    api_version: ValueTemplate,
    resource: ValueTemplate,
    subresource: ValueTemplate,
    name: ValueTemplate,
}

impl ResourceTemplate {
    pub fn parse(source: &ResourceAttributes) -> Self {
        Self {
            namespace: ValueTemplate::parse(&source.namespace),
            api_group: ValueTemplate::parse(&source.api_group),
            api_version: ValueTemplate::parse(&source.api_version),
            resource: ValueTemplate::parse(&source.resource),
            subresource: ValueTemplate::parse(&source.subresource),
            name: ValueTemplate::parse(&source.name),
        }
    }

    /// Fields whose template failed to parse, with the reason
    pub fn errors(&self) -> Vec<(&'static str, &TemplateError)> {
        [
            ("namespace", &self.namespace),
            ("apiGroup", &self.api_group),
            ("apiVersion", &self.api_version),
            ("resource", &self.resource),
            ("subresource", &self.subresource),
            ("name", &self.name),
        ]
        .into_iter()
        .filter_map(|(field, template)| template.error().map(|err| (field, err)))
        .collect()
    }

    pub fn render(&self, value: &str) -> ResourceAttributes {
        ResourceAttributes {
            namespace: self.namespace.render(value),
            api_group: self.api_group.render(value),
            api_version: self.api_version.render(value),
            resource: self.resource.render(value),
            subresource: self.subresource.render(value),
            name: self.name.render(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &str, value: &str) -> String {
        ValueTemplate::parse(source).render(value)
    }

    #[test]
    fn test_plain_text_renders_verbatim() {
        assert_eq!(render("pods", "ns1"), "pods");
        assert_eq!(render("", "ns1"), "");
        assert_eq!(render("a}}b", "ns1"), "a}}b");
    }

    #[test]
    fn test_value_substitution() {
        assert_eq!(render("{{.Value}}", "ns1"), "ns1");
        assert_eq!(render("{{ .Value }}", "ns1"), "ns1");
        assert_eq!(render("team-{{.Value}}-prod", "a"), "team-a-prod");
        assert_eq!(render("{{.Value}}/{{.Value}}", "x"), "x/x");
    }

    #[test]
    fn test_trim_markers() {
        assert_eq!(render("a  {{- .Value}}", "x"), "ax");
        assert_eq!(render("{{.Value -}}   b", "x"), "xb");
        assert_eq!(render("a {{- .Value -}} b", "x"), "axb");
    }

    #[test]
    fn test_bad_templates_render_empty() {
        assert_eq!(render("{{.Value", "ns1"), "");
        assert_eq!(render("ns-{{.Namespace}}", "ns1"), "");
        assert_eq!(render("{{}}", "ns1"), "");
        assert_eq!(
            ValueTemplate::parse("x{{.Value").error(),
            Some(&TemplateError::Unclosed(1))
        );
    }

    #[test]
    fn test_resource_template_renders_every_field() {
        let template = ResourceTemplate::parse(&ResourceAttributes {
            namespace: "{{.Value}}".into(),
            resource: "pods".into(),
            name: "{{.Nope}}".into(),
            ..Default::default()
        });

        let errors = template.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "name");

        let rendered = template.render("ns2");
        assert_eq!(rendered.namespace, "ns2");
        assert_eq!(rendered.resource, "pods");
        assert_eq!(rendered.name, "");
        assert_eq!(rendered.api_group, "");
    }
}
