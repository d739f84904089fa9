//! Message rendering - per-recipient variable substitution

use bullhorn_storage::models::Contact;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Renders campaign message templates for individual recipients
pub struct MessageRenderer {
    placeholder: Regex,
}

impl Default for MessageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRenderer {
    /// Create a new renderer
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(r"\{\{[^}]+\}\}").expect("invalid placeholder pattern"),
        }
    }

    /// Render a template with contact data
    pub fn render(&self, template: &str, contact: &Contact) -> String {
        let mut result = template.to_string();

        result = result.replace("{{phone}}", &contact.phone);
        result = result.replace("{{name}}", contact.name.as_deref().unwrap_or(""));

        if let Some(name) = &contact.name {
            let parts: Vec<&str> = name.split_whitespace().collect();
            let first_name = parts.first().unwrap_or(&"");
            result = result.replace("{{first_name}}", first_name);
        } else {
            result = result.replace("{{first_name}}", "");
        }

        // Custom attributes
        if let Some(attrs) = contact.attributes.as_object() {
            for (key, value) in attrs {
                let placeholder = format!("{{{{attributes.{}}}}}", key);
                let value_str = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => value.to_string(),
                };
                result = result.replace(&placeholder, &value_str);
            }
        }

        // Clean up any remaining placeholders
        self.placeholder.replace_all(&result, "").to_string()
    }

    /// Pick the message template for a recipient. Campaigns may carry a set
    /// of template variants (rotated by recipient index) alongside the base
    /// body; a malformed variant blob degrades to the base body.
    pub fn select_template<'a>(
        &self,
        variants: Option<&'a Value>,
        base_body: &'a str,
        recipient_index: usize,
    ) -> &'a str {
        let Some(value) = variants else {
            return base_body;
        };

        match parse_variants(value) {
            Some(list) if !list.is_empty() => list[recipient_index % list.len()],
            Some(_) => base_body,
            None => {
                warn!("Malformed message variants, using base body");
                base_body
            }
        }
    }
}

fn parse_variants(value: &Value) -> Option<Vec<&str>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str())
        .collect::<Option<Vec<_>>>()
}
