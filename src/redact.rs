/// Secret redaction utilities for logging
///
/// Masks broker credentials and webhook ids so startup summaries and
/// dispatch logs never carry them verbatim.

/// Redact a secret entirely, keeping only whether it was set.
/// Example: "hunter2" -> "********"
pub fn secret(value: &str) -> String {
    if value.is_empty() {
        "<empty>".to_string()
    } else {
        "*".repeat(8)
    }
}

/// Redact a username, keeping the first character.
/// Example: "mqttuser" -> "m***"
pub fn username(user: &str) -> String {
    let mut chars = user.chars();
    match (chars.next(), chars.next()) {
        (None, _) => String::new(),
        (Some(_), None) => "*".to_string(),
        (Some(first), Some(_)) => format!("{}***", first),
    }
}

/// Redact the webhook id at the end of a Home Assistant webhook URL.
/// The id is the only thing authorising the call.
/// Example: "http://ha.local/api/webhook/badger2040w" -> "http://ha.local/api/webhook/b***"
pub fn webhook_url(url: &str) -> String {
    const MARKER: &str = "/api/webhook/";

    match url.find(MARKER) {
        Some(pos) => {
            let (base, id) = url.split_at(pos + MARKER.len());
            if id.is_empty() {
                url.to_string()
            } else {
                format!("{}{}", base, username(id))
            }
        }
        None => url.to_string(),
    }
}
