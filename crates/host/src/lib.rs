// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The embedding-host surface (spec §6): per-call `Query` factories
//! (§4.9) plus the update-callback/credential-prompt façade a host
//! implements to drive the Query Subsystem and receive its results.
//!
//! This crate does not speak to a socket or parse a `.tl` schema — it
//! demonstrates the handful of calls spec §8's end-to-end scenarios
//! name, built the way a real per-call codec generator's output would
//! be used by `mtp-query`.
#![deny(unsafe_code)]

pub mod factories;
pub mod update;

pub use factories::{
    auth_log_out, auth_send_code, help_get_config, messages_send_message,
    upload_save_file_part, users_get_full_user_self, wire_password_probe, Config, DcOptionRecord,
    SentCode, SentCodeKind, SentMessage, UserFull,
};
pub use update::{watch_connection_status, IncomingMessage, TypingStatus, UpdateCallback};
