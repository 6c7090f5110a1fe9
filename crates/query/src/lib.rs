// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Query Subsystem.
//!
//! Turns an application-level RPC invocation into wire traffic on a
//! specific datacenter [`Connection`], enforces session/authorization
//! preconditions, classifies the server's protocol errors, and drives
//! acknowledgement, retransmission, timeouts and cancellation.
//!
//! Everything runs on a single-threaded cooperative event loop (a
//! `tokio::task::LocalSet`): `Query`, `Connection` and `UserAgent` state
//! is `Rc<RefCell<_>>`, not `Arc<Mutex<_>>`, and timers hold `Weak`
//! handles back into the query they serve so a terminated query is
//! simply not found rather than kept alive by its own alarm clock.
#![deny(unsafe_code)]

pub mod classify;
pub mod connection;
pub mod credential;
pub mod query;
pub mod timer;
pub mod user_agent;

pub use classify::{classify, ErrorAction};
pub use connection::Connection;
pub use credential::{CredentialBridge, CredentialRequest, CredentialValue};
pub use query::{ExecOption, Query, QueryHandle, QueryHooks};
pub use timer::Timer;
pub use user_agent::{UserAgentConfig, SCHEME_LAYER};

pub use user_agent::UserAgent;
