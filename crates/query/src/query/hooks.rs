// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-call behavior as data, not inheritance.
//!
//! The source gives every RPC call its own `query` subclass overriding
//! `on_answer`/`on_error`/predicates like `should_retry_after_recover_from_error`.
//! Rust has no class hierarchy to mirror that with, and doesn't need
//! one: a single concrete [`Query`](super::Query) holds a `QueryHooks`
//! record of closures, one per call site (see `query_msg_send.h`'s
//! `on_answer`/`on_error` override for the shape this is grounded on).
use mtp_wire::DecodedValue;
use std::time::Duration;

/// Default per-call timeout, suitable for ordinary RPCs; file transfers
/// override this with something longer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct QueryHooks {
    /// Invoked with the decoded response on success.
    pub on_answer: Box<dyn FnMut(DecodedValue)>,

    /// Invoked with a terminal, caller-visible error.
    pub on_error: Box<dyn FnMut(i32, String)>,

    /// Invoked every time the timeout timer fires, before the subsystem
    /// decides whether to resend or give up.
    pub on_timeout: Box<dyn FnMut()>,

    /// Whether a server-recoverable error (303/401/420/5xx) should be
    /// retried transparently instead of surfaced.
    pub should_retry_after_recover_from_error: Box<dyn Fn() -> bool>,

    /// Whether a bare timeout (no error, no ack) should trigger a resend.
    pub should_retry_on_timeout: Box<dyn Fn() -> bool>,

    /// The timeout interval to (re)arm on send and on ack.
    pub timeout_interval: Box<dyn Fn() -> Duration>,

    /// Fired when the query is appended to a connection's pending queue.
    pub will_be_pending: Box<dyn FnMut()>,

    /// Fired right after a successful send.
    pub sent: Box<dyn FnMut()>,

    /// Fired right before serializing and sending.
    pub will_send: Box<dyn FnMut()>,
}

impl Default for QueryHooks {
    fn default() -> Self {
        Self {
            on_answer: Box::new(|_| {}),
            on_error: Box::new(|_, _| {}),
            on_timeout: Box::new(|| {}),
            should_retry_after_recover_from_error: Box::new(|| true),
            should_retry_on_timeout: Box::new(|| true),
            timeout_interval: Box::new(|| DEFAULT_TIMEOUT),
            will_be_pending: Box::new(|| {}),
            sent: Box::new(|| {}),
            will_send: Box::new(|| {}),
        }
    }
}
