//! Secret redaction and output template resolution (spec §9 "Design Notes").
//! Both are pure functions, unit-testable in isolation from the store and
//! the container manager.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap());

/// Replaces the value of any env var whose key is marked `secret` in the
/// manifest with `***` before a log line is emitted. Never mutates the
/// stored `inputs` map itself — only the text about to be logged.
pub fn redact_secrets(message: &str, secret_values: &[&str]) -> String {
    let mut out = message.to_string();
    for value in secret_values {
        if value.is_empty() {
            continue;
        }
        out = out.replace(value, "***");
    }
    out
}

/// Resolves `{{ip}}`, `{{<input_key>}}`, and `{{<port_input_key>}}` tokens in
/// a template string (spec §4.5.3 "finalizing", §9). Unknown tokens are left
/// verbatim so a typo in a manifest surfaces rather than silently vanishing.
pub fn resolve(template: &str, ip: Option<&str>, inputs: &HashMap<String, String>) -> String {
    TOKEN
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            if key == "ip" {
                ip.unwrap_or_default().to_string()
            } else if let Some(v) = inputs.get(key) {
                v.clone()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

pub fn resolve_map(
    templates: &HashMap<String, String>,
    ip: Option<&str>,
    inputs: &HashMap<String, String>,
) -> HashMap<String, String> {
    templates
        .iter()
        .map(|(k, v)| (k.clone(), resolve(v, ip, inputs)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_ip_token() {
        let inputs = HashMap::new();
        assert_eq!(resolve("http://{{ip}}:8080", Some("10.0.0.5"), &inputs), "http://10.0.0.5:8080");
    }

    #[test]
    fn resolves_input_token_including_port_inputs() {
        let mut inputs = HashMap::new();
        inputs.insert("port".to_string(), "9000".to_string());
        inputs.insert("user".to_string(), "alice".to_string());
        assert_eq!(
            resolve("user={{user}} port={{port}}", None, &inputs),
            "user=alice port=9000"
        );
    }

    #[test]
    fn leaves_unknown_tokens_verbatim() {
        let inputs = HashMap::new();
        assert_eq!(resolve("{{missing}}", None, &inputs), "{{missing}}");
    }

    #[test]
    fn missing_ip_resolves_to_empty_string() {
        let inputs = HashMap::new();
        assert_eq!(resolve("ip={{ip}}", None, &inputs), "ip=");
    }

    #[test]
    fn redact_replaces_every_occurrence_of_each_secret_value() {
        let msg = "token=supersecret used twice: supersecret";
        assert_eq!(redact_secrets(msg, &["supersecret"]), "token=*** used twice: ***");
    }

    #[test]
    fn redact_ignores_empty_secret_values() {
        assert_eq!(redact_secrets("hello world", &[""]), "hello world");
    }
}
