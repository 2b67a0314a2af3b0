// ============================================================================
// Template Rendering
// ============================================================================
//
// The renderer seam between the engine and whatever produces email bodies.
// Rendering is best-effort: a missing template never fails a job - the
// worker falls back to a plain-text dump of the context.
//
// The built-in implementation loads `{name}.html`, `{name}.txt` and
// `{name}.subject` files from the template directory and substitutes
// `{{ key }}` placeholders from the job context. HTML bodies get their
// values escaped. Default `welcome` and `password_reset` templates are
// written out on first start so a fresh deployment can send something.
//
// ============================================================================

use courier_types::EmailJob;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedEmail {
    pub subject: Option<String>,
    pub html: Option<String>,
    pub text: Option<String>,
}

/// Template rendering contract. Returns `None` when the template is
/// unknown; must not fail on malformed context values.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, context: &HashMap<String, Value>) -> Option<RenderedEmail>;
}

#[derive(Debug, Clone, Default)]
struct Template {
    subject: Option<String>,
    html: Option<String>,
    text: Option<String>,
}

/// File-backed templates, loaded once at startup.
pub struct FileTemplates {
    templates: HashMap<String, Template>,
}

const DEFAULT_TEMPLATES: &[(&str, &str, &str)] = &[
    (
        "welcome",
        "Welcome, {{ name }}!",
        "<html><body>\
         <h1>Welcome, {{ name }}!</h1>\
         <p>Please confirm your address by following this link:</p>\
         <p><a href=\"{{ verification_link }}\">Verify email address</a></p>\
         </body></html>",
    ),
    (
        "password_reset",
        "Reset your password",
        "<html><body>\
         <h1>Password reset</h1>\
         <p>A password reset was requested for your account. The link below \
         is valid for one hour:</p>\
         <p><a href=\"{{ reset_link }}\">Reset password</a></p>\
         <p>If you did not request this, ignore this message.</p>\
         </body></html>",
    ),
];

impl FileTemplates {
    /// Load every template file under `dir`, writing the default templates
    /// first when they are missing.
    pub fn load(dir: &str) -> Self {
        let path = Path::new(dir);
        if let Err(e) = std::fs::create_dir_all(path) {
            warn!(dir = %dir, error = %e, "Cannot create template directory, rendering will fall back");
            return Self {
                templates: HashMap::new(),
            };
        }

        for (name, subject, html) in DEFAULT_TEMPLATES {
            let html_path = path.join(format!("{name}.html"));
            if !html_path.exists() {
                if std::fs::write(&html_path, html).is_ok() {
                    let _ = std::fs::write(path.join(format!("{name}.subject")), subject);
                    info!(template = %name, "Wrote default template");
                }
            }
        }

        let mut templates: HashMap<String, Template> = HashMap::new();
        if let Ok(dir_entries) = std::fs::read_dir(path) {
            for dir_entry in dir_entries.flatten() {
                let file = dir_entry.path();
                let (Some(stem), Some(ext)) = (
                    file.file_stem().and_then(|s| s.to_str()),
                    file.extension().and_then(|s| s.to_str()),
                ) else {
                    continue;
                };
                let Ok(content) = std::fs::read_to_string(&file) else {
                    continue;
                };
                let template = templates.entry(stem.to_string()).or_default();
                match ext {
                    "html" => template.html = Some(content),
                    "txt" => template.text = Some(content),
                    "subject" => template.subject = Some(content.trim().to_string()),
                    _ => {}
                }
            }
        }

        debug!(count = templates.len(), dir = %dir, "Loaded templates");
        Self { templates }
    }

    /// In-memory construction for tests.
    pub fn from_parts(
        parts: impl IntoIterator<Item = (String, Option<String>, Option<String>, Option<String>)>,
    ) -> Self {
        let templates = parts
            .into_iter()
            .map(|(name, subject, html, text)| (name, Template { subject, html, text }))
            .collect();
        Self { templates }
    }
}

impl Renderer for FileTemplates {
    fn render(&self, template: &str, context: &HashMap<String, Value>) -> Option<RenderedEmail> {
        let found = self.templates.get(template)?;
        Some(RenderedEmail {
            subject: found
                .subject
                .as_deref()
                .map(|s| substitute(s, context, false)),
            html: found.html.as_deref().map(|s| substitute(s, context, true)),
            text: found.text.as_deref().map(|s| substitute(s, context, false)),
        })
    }
}

/// Fallback body when the template is unknown: the provided subject (or a
/// placeholder) over a plain-text dump of the context.
pub fn fallback_render(job: &EmailJob) -> RenderedEmail {
    let mut lines: Vec<String> = job
        .context
        .iter()
        .map(|(key, value)| format!("{key}: {}", value_to_text(value)))
        .collect();
    lines.sort();

    RenderedEmail {
        subject: Some(
            job.subject
                .clone()
                .unwrap_or_else(|| "(no subject)".to_string()),
        ),
        html: None,
        text: Some(lines.join("\n")),
    }
}

/// Replace `{{ key }}` placeholders with context values. Unknown keys are
/// left in place so a half-filled template is visible in the output rather
/// than silently blank.
fn substitute(template: &str, context: &HashMap<String, Value>, escape: bool) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            result.push_str(&rest[start..]);
            return result;
        };
        let key = after[..end].trim();
        match context.get(key) {
            Some(value) => {
                let text = value_to_text(value);
                if escape {
                    result.push_str(&escape_html(&text));
                } else {
                    result.push_str(&text);
                }
            }
            None => {
                result.push_str(&rest[start..start + 2 + end + 2]);
            }
        }
        rest = &after[end + 2..];
    }
    result.push_str(rest);
    result
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::{Priority, ProviderKind};

    fn context(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitutes_string_and_number_values() {
        let ctx = context(&[
            ("name", Value::String("Ada".into())),
            ("count", Value::from(3)),
        ]);
        assert_eq!(
            substitute("Hi {{ name }}, you have {{count}} items", &ctx, false),
            "Hi Ada, you have 3 items"
        );
    }

    #[test]
    fn unknown_keys_stay_visible() {
        let ctx = context(&[]);
        assert_eq!(substitute("Hi {{ name }}", &ctx, false), "Hi {{ name }}");
    }

    #[test]
    fn html_bodies_escape_values() {
        let ctx = context(&[("name", Value::String("<script>".into()))]);
        assert_eq!(
            substitute("<p>{{ name }}</p>", &ctx, true),
            "<p>&lt;script&gt;</p>"
        );
    }

    #[test]
    fn renders_all_three_parts() {
        let templates = FileTemplates::from_parts([(
            "welcome".to_string(),
            Some("Hi {{ name }}".to_string()),
            Some("<p>{{ name }}</p>".to_string()),
            Some("Hi {{ name }}".to_string()),
        )]);
        let rendered = templates
            .render("welcome", &context(&[("name", Value::String("Ada".into()))]))
            .unwrap();
        assert_eq!(rendered.subject.as_deref(), Some("Hi Ada"));
        assert_eq!(rendered.html.as_deref(), Some("<p>Ada</p>"));
        assert_eq!(rendered.text.as_deref(), Some("Hi Ada"));
    }

    #[test]
    fn unknown_template_returns_none() {
        let templates = FileTemplates::from_parts([]);
        assert!(templates.render("nope", &HashMap::new()).is_none());
    }

    #[test]
    fn fallback_dumps_context_and_defaults_subject() {
        let job = EmailJob::new(
            vec!["a@example.com".into()],
            "missing".into(),
            context(&[
                ("b", Value::String("two".into())),
                ("a", Value::from(1)),
            ]),
            None,
            Priority::default(),
            ProviderKind::default(),
            None,
            "svc".into(),
        )
        .unwrap();

        let rendered = fallback_render(&job);
        assert_eq!(rendered.subject.as_deref(), Some("(no subject)"));
        assert_eq!(rendered.text.as_deref(), Some("a: 1\nb: two"));
    }
}
