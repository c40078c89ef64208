use std::collections::BTreeMap;

pub const REDACTED: &str = "[REDACTED]";

/// Key fragments that mark an environment variable as secret.
pub const SENSITIVE_TOKENS: &[&str] = &[
    "PASSWORD",
    "SECRET",
    "TOKEN",
    "KEY",
    "CREDENTIAL",
    "API_KEY",
    "APIKEY",
    "AUTH",
    "PRIVATE",
    "CERT",
    "PASSPHRASE",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let upper = key.to_uppercase();
    SENSITIVE_TOKENS.iter().any(|t| upper.contains(t))
}

/// Copies `env`, replacing the value of every sensitive key.
pub fn sanitize_env(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(k, v)| {
            let v = if is_sensitive_key(k) {
                REDACTED.to_string()
            } else {
                v.clone()
            };
            (k.clone(), v)
        })
        .collect()
}
