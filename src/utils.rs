use sha2::{Digest, Sha256};

/// Short, stable fingerprint of a purchase token for logs
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

/// Play purchase tokens only use `[A-Za-z0-9._-]`
pub fn is_well_formed_purchase_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Replace every `purchaseToken` string in a JSON document with its fingerprint
pub fn redact_purchase_tokens(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if key == "purchaseToken" {
                    if let serde_json::Value::String(token) = entry {
                        *token = format!("sha256:{}", token_fingerprint(token));
                    }
                } else {
                    redact_purchase_tokens(entry);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact_purchase_tokens),
        _ => {}
    }
}
