use once_cell::sync::Lazy;
use std::collections::HashMap;

// Include the entire .env file as a string at compile time
const ENV_FILE: &str = include_str!("../.env");

static ENV_VALUES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    ENV_FILE
        .lines()
        .map(str::trim)
        // Skip comments and empty lines
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim(), value)
        })
        .collect()
});

/// Value baked in from `.env`, if the key is present and non-empty
pub fn get_embedded_env_value(key: &str) -> Option<&'static str> {
    ENV_VALUES.get(key).copied().filter(|value| !value.is_empty())
}

/// Get a human-readable string for WiFi disconnect reasons
pub fn get_disconnect_reason_string(reason: u8) -> &'static str {
    match reason {
        2 => "AUTH_EXPIRE",
        3 => "AUTH_LEAVE",
        4 => "ASSOC_EXPIRE",
        5 => "ASSOC_TOOMANY",
        6 => "NOT_AUTHED",
        7 => "NOT_ASSOCED",
        8 => "ASSOC_LEAVE",
        9 => "ASSOC_NOT_AUTHED",
        13 => "IE_INVALID",
        14 => "MIC_FAILURE",
        15 => "4WAY_HANDSHAKE_TIMEOUT",
        16 => "GROUP_KEY_UPDATE_TIMEOUT",
        23 => "802_1X_AUTH_FAILED",
        200 => "BEACON_TIMEOUT",
        201 => "NO_AP_FOUND",
        202 => "AUTH_FAIL",
        203 => "ASSOC_FAIL",
        204 => "HANDSHAKE_TIMEOUT",
        205 => "CONNECTION_FAIL",
        _ => "UNKNOWN",
    }
}
