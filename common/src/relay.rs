use alloc::string::String;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Relay host used when no endpoint is configured.
pub const DEFAULT_RELAY_HOST: &str = "relay.example.net";
pub const DEFAULT_RELAY_PORT: u16 = 443;

/// Query parameter that carries the device identity on the socket URL.
pub const IDENTITY_QUERY_KEY: &str = "id";

/// Address the device serves on while running its configuration network.
pub const ACCESS_POINT_ADDRESS: [u8; 4] = [192, 168, 4, 1];
pub const ACCESS_POINT_NETMASK: [u8; 4] = [255, 255, 255, 0];

/// Everything but the URL unreserved characters.
const IDENTITY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Append the identity query parameter to `base_path`.
///
/// The identity is an opaque token, so anything outside the URL unreserved
/// set is percent-encoded.
pub fn identity_path(base_path: &str, identity: &str) -> String {
    let mut path = String::with_capacity(base_path.len() + identity.len() + 8);
    path.push_str(if base_path.is_empty() { "/" } else { base_path });
    path.push(if base_path.contains('?') { '&' } else { '?' });
    path.push_str(IDENTITY_QUERY_KEY);
    path.push('=');

    path.extend(utf8_percent_encode(identity, IDENTITY_ENCODE_SET));

    path
}
