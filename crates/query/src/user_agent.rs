// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The process-wide coordinator: the set of [`Connection`]s, which
//! datacenter is active, the active/retry query registries, the
//! credential prompt bridge, and the handful of configuration values
//! every call's `invoke_with_layer(init_connection(...))` header needs.
//!
//! Deliberately an explicit value rather than a global — every
//! constructor that needs one takes `&Rc<UserAgent>` (or a `Weak` of
//! it, for anything a `Query` holds onto), so nothing here is reached
//! through process-wide mutable state.
use crate::connection::Connection;
use crate::credential::{CredentialBridge, CredentialRequest, CredentialValue};
use crate::query::QueryHandle;
use mtp_session::DcId;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// The schema layer every session declares via `invoke_with_layer`.
pub const SCHEME_LAYER: i32 = 45;

/// The fields `init_connection` sends on the very first call of a
/// session.
pub struct UserAgentConfig {
    pub app_id: i32,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub lang_code: String,
}

pub struct UserAgent {
    pub config: UserAgentConfig,
    connections: RefCell<HashMap<DcId, Rc<Connection>>>,
    active_dc: Cell<DcId>,
    /// Keyed by `msg_id`: the canonical home of every sent, not-yet-
    /// resolved query (invariant 1, §8).
    active: RefCell<HashMap<i64, QueryHandle>>,
    /// Keyed by `Rc` identity, since a query parked on a retry timer
    /// has no `msg_id` to route by until it resends.
    retry: RefCell<HashMap<usize, QueryHandle>>,
    password_locked: Cell<bool>,
    credential_bridge: Box<dyn CredentialBridge>,
    on_password_verified: RefCell<Vec<Box<dyn FnMut()>>>,
}

fn query_identity(query: &QueryHandle) -> usize {
    Rc::as_ptr(query) as *const () as usize
}

impl UserAgent {
    pub fn new(
        config: UserAgentConfig,
        credential_bridge: Box<dyn CredentialBridge>,
        bootstrap_dc: DcId,
    ) -> Rc<Self> {
        let ua = Rc::new(Self {
            config,
            connections: RefCell::new(HashMap::new()),
            active_dc: Cell::new(bootstrap_dc),
            active: RefCell::new(HashMap::new()),
            retry: RefCell::new(HashMap::new()),
            password_locked: Cell::new(false),
            credential_bridge,
            on_password_verified: RefCell::new(Vec::new()),
        });
        ua.connections
            .borrow_mut()
            .insert(bootstrap_dc, Connection::new(bootstrap_dc));
        ua
    }

    pub fn connection(&self, dc_id: DcId) -> Rc<Connection> {
        self.connections
            .borrow_mut()
            .entry(dc_id)
            .or_insert_with(|| Connection::new(dc_id))
            .clone()
    }

    pub fn active_dc(&self) -> DcId {
        self.active_dc.get()
    }

    pub fn set_active_dc(&self, dc_id: DcId) {
        log::info!("active datacenter is now {dc_id}");
        self.active_dc.set(dc_id);
    }

    pub fn active_connection(&self) -> Rc<Connection> {
        self.connection(self.active_dc())
    }

    pub fn is_active_connection(&self, connection: &Rc<Connection>) -> bool {
        connection.id == self.active_dc()
    }

    pub fn add_active(&self, msg_id: i64, query: QueryHandle) {
        self.active.borrow_mut().insert(msg_id, query);
    }

    pub fn remove_active(&self, msg_id: i64) -> Option<QueryHandle> {
        self.active.borrow_mut().remove(&msg_id)
    }

    pub fn find_active(&self, msg_id: i64) -> Option<QueryHandle> {
        self.active.borrow().get(&msg_id).cloned()
    }

    pub fn active_len(&self) -> usize {
        self.active.borrow().len()
    }

    /// Every still-active query currently bound to `connection`, by
    /// identity. `Connection::teardown` uses this to find which active
    /// registry entries are its own before handing them a transient
    /// error (spec §5).
    pub fn active_queries_for(&self, connection: &Rc<Connection>) -> Vec<QueryHandle> {
        self.active
            .borrow()
            .values()
            .filter(|query| {
                query
                    .borrow()
                    .connection()
                    .is_some_and(|bound| Rc::ptr_eq(&bound, connection))
            })
            .cloned()
            .collect()
    }

    pub fn add_retry(&self, query: QueryHandle) {
        self.retry.borrow_mut().insert(query_identity(&query), query);
    }

    pub fn remove_retry(&self, query: &QueryHandle) {
        self.retry.borrow_mut().remove(&query_identity(query));
    }

    pub fn retry_len(&self) -> usize {
        self.retry.borrow().len()
    }

    /// Route an inbound RPC result to the query it belongs to.
    pub fn dispatch_result(&self, msg_id: i64, body: &[u8]) -> Option<Result<(), mtp_wire::CodecError>> {
        self.find_active(msg_id)
            .map(|query| crate::query::Query::handle_result(&query, body))
    }

    /// Route an inbound RPC error to the query it belongs to.
    pub fn dispatch_error(&self, msg_id: i64, code: i32, text: &str) -> bool {
        match self.find_active(msg_id) {
            Some(query) => {
                crate::query::Query::handle_error(&query, code, text);
                true
            }
            None => {
                log::info!("got rpc error {code} {text} but no such request is saved");
                false
            }
        }
    }

    /// Route a server ack to the query it belongs to.
    pub fn dispatch_ack(&self, msg_id: i64) -> bool {
        match self.find_active(msg_id) {
            Some(query) => {
                crate::query::Query::ack(&query);
                true
            }
            None => false,
        }
    }

    pub fn is_password_locked(&self) -> bool {
        self.password_locked.get()
    }

    pub fn set_connection_logged_out(&self, connection: &Rc<Connection>) {
        connection.set_logged_in(false);
    }

    /// Restart the login flow on the active datacenter
    /// (`AUTH_KEY_UNREGISTERED`/`AUTH_KEY_INVALID` recovery). The actual
    /// login RPC sequence is host-driven; this only marks the state the
    /// classifier relies on.
    pub fn login(&self) {
        log::info!("restarting login on active dc {}", self.active_dc());
    }

    /// Register a callback the password-recovery flow invokes once the
    /// host's credential bridge confirms the password, so the host can
    /// fire its own probe query (`users.getFullUser(self)` in the
    /// original) without this crate needing to know the call shape.
    pub fn on_password_verified(&self, callback: impl FnMut() + 'static) {
        self.on_password_verified.borrow_mut().push(Box::new(callback));
    }

    fn notify_password_verified(&self) {
        for callback in self.on_password_verified.borrow_mut().iter_mut() {
            callback();
        }
    }

    /// `401 SESSION_PASSWORD_NEEDED` recovery. Marks the active
    /// connection logged out, prompts the host for the password exactly
    /// once even if several queries hit this concurrently (invariant 6,
    /// §8), and re-marks it logged in on success.
    ///
    /// Open question resolved (spec §9): `password_locked` is cleared
    /// on every terminal outcome of the flow, success or failure, not
    /// just success — otherwise a wrong password or a cancelled prompt
    /// would wedge every future `SESSION_PASSWORD_NEEDED` behind a lock
    /// nothing will ever release.
    pub fn handle_session_password_needed(self: &Rc<Self>) -> bool {
        self.active_connection().set_logged_in(false);

        if self.password_locked.get() {
            return true;
        }
        self.password_locked.set(true);

        let this = Rc::clone(self);
        tokio::task::spawn_local(async move {
            let value = this
                .credential_bridge
                .get_value(CredentialRequest::CurrentPassword)
                .await;

            let success = match value {
                Some(value) => this.verify_password(value),
                None => false,
            };

            // Cleared unconditionally: see the doc comment above.
            this.password_locked.set(false);

            if success {
                this.active_connection().set_logged_in(true);
                this.notify_password_verified();
            }
        });

        true
    }

    /// Whether a supplied password credential should be treated as a
    /// successful unlock. The SRP-based verification the server
    /// actually performs is a cryptographic non-goal here; an empty
    /// value is the only case this core treats as a definite failure
    /// (e.g. a cancelled prompt threading a blank string through).
    fn verify_password(&self, value: CredentialValue) -> bool {
        !matches!(value, CredentialValue::Text(ref text) if text.is_empty())
    }
}
