// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::fmt;

/// The error type reported by the server when a request is misused
/// (spec §4.5). Parsing this out of the raw `error_code`/`error_message`
/// pair is the only thing this crate does with it; deciding what the
/// Query Subsystem does in response is `mtp-query::classify`'s job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    /// A numerical value similar to HTTP status codes.
    pub code: i32,

    /// The ASCII error name, normally in screaming snake case, with any
    /// embedded numeric value stripped out into `value`.
    pub name: String,

    /// If the error message contained an additional numeric value
    /// (e.g. the `31` in `FLOOD_WAIT_31`), it ends up here.
    pub value: Option<u32>,

    /// The constructor identifier of the request that triggered this
    /// error. Not present if the error was artificially constructed.
    pub caused_by: Option<u32>,
}

impl std::error::Error for RpcError {}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.name)?;
        if let Some(caused_by) = self.caused_by {
            write!(f, " caused by constructor 0x{caused_by:08x}")?;
        }
        if let Some(value) = self.value {
            write!(f, " (value: {value})")?;
        }
        Ok(())
    }
}

impl RpcError {
    /// Parse a raw `(error_code, error_message)` pair as received over
    /// the wire in an `rpc_error` construct.
    pub fn parse(code: i32, error_message: &str) -> Self {
        // Extract the numeric value embedded in the message, if any
        // (e.g. the "31" in "FLOOD_WAIT_31", the "2" in "INTERDC_2_CALL_ERROR").
        if let Some(value) = error_message
            .split(|c: char| !c.is_ascii_digit())
            .find(|s| !s.is_empty())
        {
            let mut to_remove = String::with_capacity(1 + value.len());
            to_remove.push('_');
            to_remove.push_str(value);
            Self {
                code,
                name: error_message.replace(&to_remove, ""),
                // Safe to unwrap, matched on digits.
                value: Some(value.parse().unwrap()),
                caused_by: None,
            }
        } else {
            Self {
                code,
                name: error_message.to_string(),
                value: None,
                caused_by: None,
            }
        }
    }

    /// Matches on the name of the RPC error (case-sensitive).
    ///
    /// Useful in `match` arm guards. A single trailing or leading
    /// asterisk (`'*'`) is allowed, and will instead check if the error
    /// name starts (or ends with) the input parameter.
    pub fn is(&self, rpc_error: &str) -> bool {
        if let Some(rpc_error) = rpc_error.strip_suffix('*') {
            self.name.starts_with(rpc_error)
        } else if let Some(rpc_error) = rpc_error.strip_prefix('*') {
            self.name.ends_with(rpc_error)
        } else {
            self.name == rpc_error
        }
    }

    pub fn with_caused_by(mut self, constructor_id: u32) -> Self {
        self.caused_by = Some(constructor_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_rpc_error_parsing() {
        assert_eq!(
            RpcError::parse(400, "CHAT_INVALID"),
            RpcError {
                code: 400,
                name: "CHAT_INVALID".into(),
                value: None,
                caused_by: None,
            }
        );

        assert_eq!(
            RpcError::parse(420, "FLOOD_WAIT_31"),
            RpcError {
                code: 420,
                name: "FLOOD_WAIT".into(),
                value: Some(31),
                caused_by: None,
            }
        );

        assert_eq!(
            RpcError::parse(500, "INTERDC_2_CALL_ERROR"),
            RpcError {
                code: 500,
                name: "INTERDC_CALL_ERROR".into(),
                value: Some(2),
                caused_by: None,
            }
        );
    }

    #[test]
    fn wildcard_match() {
        let err = RpcError::parse(400, "PHONE_CODE_INVALID");
        assert!(err.is("PHONE_CODE_*"));
        assert!(err.is("*_INVALID"));
        assert!(!err.is("SESSION_PASSWORD_NEEDED"));
    }
}
