// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The credential prompt bridge (Design Notes, `get_value`).
//!
//! The source's `get_value` reads as a blocking call but isn't one: the
//! actual prompt (asking a human for a login code, a 2FA password, a
//! bot token...) happens on the host side, maybe seconds or minutes
//! later. Modeled here as an explicit async request/response: a `Query`
//! that needs a credential doesn't block, it parks (conceptually, on a
//! retry timer of unbounded length) until the host resolves the future
//! this trait returns.
use std::future::Future;
use std::pin::Pin;

/// What kind of credential the core needs from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRequest {
    Phone,
    LoginCode,
    Registration,
    CurrentPassword,
    NewPassword,
    BotToken,
}

/// The host's answer to a [`CredentialRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialValue {
    Text(String),
    Bytes(Vec<u8>),
}

/// Implemented by the host. `UserAgent::check_password` and the rest of
/// the login flow call through this instead of touching any UI
/// directly, so the core stays host-agnostic.
pub trait CredentialBridge {
    /// Ask the host for a credential. Resolves to `None` if the host
    /// gives up (user cancelled the prompt, app shut down, etc).
    fn get_value(
        &self,
        request: CredentialRequest,
    ) -> Pin<Box<dyn Future<Output = Option<CredentialValue>>>>;
}
