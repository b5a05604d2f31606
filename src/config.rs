use anyhow::{Context, Result};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One configured route, as it appears in the rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoutingRule {
    pub listen: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    // 0 means "use the global flag value"
    #[serde(default)]
    pub dial_timeout: u64,
    #[serde(default)]
    pub keepalive: u64,
}

/// Load the rule file. Any failure here aborts startup before a listener binds.
pub async fn load_rules(path: impl AsRef<Path>) -> Result<Vec<RoutingRule>> {
    let path = path.as_ref();
    debug!("Loading rules from: {}", path.display());
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read config file error: {}", path.display()))?;
    let rules: Vec<RoutingRule> =
        serde_json::from_str(&content).with_context(|| format!("read config file error: {}", path.display()))?;
    trace!("Loaded {} rule(s): {:#?}", rules.len(), rules);
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_rule_record() {
        let json = r#"{
            "Listen": "tcp://0.0.0.0:9000",
            "Target": "tcp://10.0.0.3:22",
            "Proxy": "http://gateway.internal:3128",
            "DialTimeout": 5,
            "Keepalive": 15
        }"#;
        let rule: RoutingRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.listen, "tcp://0.0.0.0:9000");
        assert_eq!(rule.target, "tcp://10.0.0.3:22");
        assert_eq!(rule.proxy.as_deref(), Some("http://gateway.internal:3128"));
        assert_eq!(rule.dial_timeout, 5);
        assert_eq!(rule.keepalive, 15);
    }

    #[test]
    fn test_minimal_rule_record() {
        let json = r#"{"Listen": "http://app.example.com", "Target": "http://127.0.0.1:8080"}"#;
        let rule: RoutingRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.proxy, None);
        assert_eq!(rule.dial_timeout, 0);
        assert_eq!(rule.keepalive, 0);
    }

    #[test]
    fn test_rule_file_is_an_array() {
        let json = r#"[
            {"Listen": "http://a.example.com", "Target": "http://127.0.0.1:8001"},
            {"Listen": "http://b.example.com", "Target": "http://127.0.0.1:8002"}
        ]"#;
        let rules: Vec<RoutingRule> = serde_json::from_str(json).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].listen, "http://b.example.com");
    }

    #[test]
    fn test_missing_required_field_fails() {
        let json = r#"{"Listen": "http://a.example.com"}"#;
        assert!(serde_json::from_str::<RoutingRule>(json).is_err());
    }
}
