// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The error-classification table. Pure and stateless: given a code and
//! the server's error text, say what kind of thing happened. Deciding
//! what the `Query` state machine actually *does* about it — touching
//! timers, registries, the active `UserAgent` datacenter — stays in
//! `Query::handle_error`, which is the only caller of [`classify`].
const MAX_DC_ID: i32 = 100;

/// The largest-grain outcome of looking at an RPC error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorAction {
    /// `303 USER_MIGRATE_N` / `PHONE_MIGRATE_N` / `NETWORK_MIGRATE_N`,
    /// parsed to a datacenter in `1..MAX_DC_ID`.
    Migrate { dc_id: i32 },

    /// `401 SESSION_PASSWORD_NEEDED`.
    SessionPasswordNeeded,

    /// `401 AUTH_KEY_UNREGISTERED` / `AUTH_KEY_INVALID`.
    AuthKeyInvalid,

    /// `401 AUTH_KEY_PERM_EMPTY`.
    AuthKeyPermEmpty,

    /// `420`, `5xx`, or any other code not covered above, parsed as a
    /// flood-wait delay (`FLOOD_WAIT_N`, default 10s otherwise).
    FloodWait { seconds: u64 },

    /// `400`, `403`, `404`, an unparseable `303`, or any other
    /// caller-visible policy error: surface verbatim.
    Surface,
}

/// Classify a server-reported RPC error by its numeric code and text,
/// per the error-classification table.
pub fn classify(code: i32, text: &str) -> ErrorAction {
    match code {
        303 => match parse_migrate_dc(text) {
            Some(dc_id) => ErrorAction::Migrate { dc_id },
            None => ErrorAction::Surface,
        },
        400 | 403 | 404 => ErrorAction::Surface,
        401 if text == "SESSION_PASSWORD_NEEDED" => ErrorAction::SessionPasswordNeeded,
        401 if text == "AUTH_KEY_UNREGISTERED" || text == "AUTH_KEY_INVALID" => {
            ErrorAction::AuthKeyInvalid
        }
        401 if text == "AUTH_KEY_PERM_EMPTY" => ErrorAction::AuthKeyPermEmpty,
        401 => ErrorAction::Surface,
        _ => ErrorAction::FloodWait {
            seconds: parse_flood_wait(text).unwrap_or(10),
        },
    }
}

fn parse_suffix_number(text: &str, prefix: &str) -> Option<i32> {
    text.strip_prefix(prefix).and_then(|rest| rest.parse().ok())
}

fn parse_migrate_dc(text: &str) -> Option<i32> {
    for prefix in ["USER_MIGRATE_", "PHONE_MIGRATE_", "NETWORK_MIGRATE_"] {
        if let Some(dc_id) = parse_suffix_number(text, prefix) {
            if dc_id > 0 && dc_id < MAX_DC_ID {
                return Some(dc_id);
            }
        }
    }
    None
}

fn parse_flood_wait(text: &str) -> Option<u64> {
    text.strip_prefix("FLOOD_WAIT_").and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_variants_parse() {
        assert_eq!(classify(303, "USER_MIGRATE_3"), ErrorAction::Migrate { dc_id: 3 });
        assert_eq!(
            classify(303, "PHONE_MIGRATE_4"),
            ErrorAction::Migrate { dc_id: 4 }
        );
        assert_eq!(
            classify(303, "NETWORK_MIGRATE_2"),
            ErrorAction::Migrate { dc_id: 2 }
        );
    }

    #[test]
    fn out_of_range_migrate_surfaces() {
        assert_eq!(classify(303, "USER_MIGRATE_0"), ErrorAction::Surface);
        assert_eq!(classify(303, "USER_MIGRATE_100"), ErrorAction::Surface);
        assert_eq!(classify(303, "SOMETHING_ELSE"), ErrorAction::Surface);
    }

    #[test]
    fn policy_errors_surface() {
        assert_eq!(classify(400, "CHAT_INVALID"), ErrorAction::Surface);
        assert_eq!(classify(403, "CHAT_WRITE_FORBIDDEN"), ErrorAction::Surface);
        assert_eq!(classify(404, "USER_NOT_FOUND"), ErrorAction::Surface);
    }

    #[test]
    fn password_and_auth_key_errors() {
        assert_eq!(
            classify(401, "SESSION_PASSWORD_NEEDED"),
            ErrorAction::SessionPasswordNeeded
        );
        assert_eq!(classify(401, "AUTH_KEY_UNREGISTERED"), ErrorAction::AuthKeyInvalid);
        assert_eq!(classify(401, "AUTH_KEY_INVALID"), ErrorAction::AuthKeyInvalid);
        assert_eq!(
            classify(401, "AUTH_KEY_PERM_EMPTY"),
            ErrorAction::AuthKeyPermEmpty
        );
        assert_eq!(classify(401, "USER_DEACTIVATED"), ErrorAction::Surface);
    }

    #[test]
    fn flood_wait_parses_or_defaults() {
        assert_eq!(classify(420, "FLOOD_WAIT_7"), ErrorAction::FloodWait { seconds: 7 });
        assert_eq!(classify(500, "FLOOD_WAIT_31"), ErrorAction::FloodWait { seconds: 31 });
        assert_eq!(classify(500, "SOME_INTERNAL_ERROR"), ErrorAction::FloodWait { seconds: 10 });
        assert_eq!(classify(999, "WHATEVER"), ErrorAction::FloodWait { seconds: 10 });
    }
}
