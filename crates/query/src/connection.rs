// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A `Connection` owns one datacenter's session: its `msg_id`/`seq_no`
//! bookkeeping, the queue of queries blocked on a precondition, and the
//! observable connection-status value queries subscribe to while
//! executing. It does not itself speak to a socket — handing bytes to
//! the network is the embedding host's job (the DH handshake and the
//! transport are explicit non-goals here); a `Connection` only builds
//! the envelope and appends it to `outbox` for the host to drain.
use mtp_proto::SessionState;
use mtp_session::{ConnectionStatus, DcId};
use mtp_wire::{Message, Serializable};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use tokio::sync::watch;

use crate::query::QueryHandle;
use crate::user_agent::{UserAgentConfig, SCHEME_LAYER};

/// `invokeWithLayer#da9b0d0d {X:Type} layer:int query:!X = X;`
const CODE_INVOKE_WITH_LAYER: u32 = 0xda9b_0d0d;

/// `initConnection#69796de9 {X:Type} api_id:int device_model:string
/// system_version:string app_version:string lang_code:string query:!X = X;`
const CODE_INIT_CONNECTION: u32 = 0x6979_6de9;

pub struct Connection {
    pub id: DcId,
    session: RefCell<Option<SessionState>>,
    status_tx: watch::Sender<ConnectionStatus>,
    status_rx: watch::Receiver<ConnectionStatus>,
    pending: RefCell<VecDeque<QueryHandle>>,
    configured: Cell<bool>,
    logged_in: Cell<bool>,
    logging_out: Cell<bool>,
    authorized: Cell<bool>,
    /// Whether `invoke_with_layer(init_connection(...))` has already gone
    /// out on this connection; it wraps exactly the first envelope, same
    /// as a sender's one-time `InvokeWithLayer(InitConnection {..})`.
    layer_negotiated: Cell<bool>,
    logout_query: RefCell<Option<QueryHandle>>,
    /// Envelopes ready for the host's transport to drain and send.
    pub outbox: RefCell<Vec<Message>>,
}

impl Connection {
    pub fn new(id: DcId) -> Rc<Self> {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        Rc::new(Self {
            id,
            session: RefCell::new(None),
            status_tx,
            status_rx,
            pending: RefCell::new(VecDeque::new()),
            configured: Cell::new(false),
            logged_in: Cell::new(false),
            logging_out: Cell::new(false),
            authorized: Cell::new(false),
            layer_negotiated: Cell::new(false),
            logout_query: RefCell::new(None),
            outbox: RefCell::new(Vec::new()),
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// A fresh receiver that follows future status transitions; this is
    /// what a `Query` subscribes to on `execute()`.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        let _ = self.status_tx.send(status);
    }

    pub fn has_session(&self) -> bool {
        self.session.borrow().is_some()
    }

    /// Create a fresh session if one doesn't already exist (part of the
    /// pending gate's "no session exists" predicate). `session_id == 0`
    /// means "no preference": mint a securely random one, the way a
    /// fresh `grammers-mtproto::Encrypted` mints its `client_id`.
    pub fn create_session_if_absent(&self, session_id: i64) {
        let mut session = self.session.borrow_mut();
        if session.is_none() {
            *session = Some(if session_id == 0 {
                SessionState::new_random()
            } else {
                SessionState::new(session_id)
            });
        }
    }

    pub fn session_id(&self) -> Option<i64> {
        self.session.borrow().as_ref().map(|s| s.session_id)
    }

    pub fn seq_no(&self) -> i32 {
        self.session.borrow().as_ref().map_or(0, |s| s.seq_no())
    }

    pub fn is_configured(&self) -> bool {
        self.configured.get()
    }

    pub fn set_configured(&self, value: bool) {
        self.configured.set(value);
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.get()
    }

    pub fn set_logged_in(&self, value: bool) {
        self.logged_in.set(value);
    }

    pub fn is_logging_out(&self) -> bool {
        self.logging_out.get()
    }

    pub fn set_logging_out(&self, value: bool) {
        self.logging_out.set(value);
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.get()
    }

    pub fn set_authorized(&self, value: bool) {
        self.authorized.set(value);
    }

    pub fn set_logout_query(&self, query: QueryHandle) {
        *self.logout_query.borrow_mut() = Some(query);
    }

    pub fn take_logout_query(&self) -> Option<QueryHandle> {
        self.logout_query.borrow_mut().take()
    }

    pub fn add_pending(&self, query: QueryHandle) {
        self.pending.borrow_mut().push_back(query);
    }

    /// Remove a query from the pending queue by identity: while pending
    /// it has no `msg_id` to key on yet.
    pub fn remove_pending(&self, query: &QueryHandle) {
        self.pending
            .borrow_mut()
            .retain(|q| !Rc::ptr_eq(q, query));
    }

    /// Drain every pending query so the caller (typically the host, on
    /// status transitions) can re-run `execute_after_pending` on each.
    pub fn drain_pending(&self) -> Vec<QueryHandle> {
        self.pending.borrow_mut().drain(..).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Instruct this (non-active) connection to copy authorization from
    /// the user agent's active datacenter. The actual copy is a
    /// credential/crypto concern outside the Query Subsystem; this is
    /// the non-blocking instruction point the original fires from
    /// `check_pending`.
    pub fn transfer_auth_to_me(&self) {
        log::debug!("dc {}: requested authorization transfer", self.id);
    }

    /// Restart the long-term authorization handshake on this connection.
    /// The handshake itself is the DH non-goal; this only flags the
    /// intent the way the classifier's migrate/auth-key-invalid branches
    /// expect to be able to.
    pub fn restart_authorization(&self) {
        log::info!("dc {}: restarting authorization", self.id);
        self.authorized.set(false);
    }

    /// Restart the short-lived PFS authorization key bound to this
    /// connection's long-term key (`AUTH_KEY_PERM_EMPTY` recovery).
    pub fn restart_temp_authorization(&self) {
        log::info!("dc {}: restarting temporary authorization", self.id);
    }

    /// Wrap `body` in `invoke_with_layer(init_connection(...))` if this
    /// connection hasn't negotiated a layer yet, consuming the one-shot
    /// flag; every later call on this connection passes `body` through
    /// unchanged (`query.cpp::out_header`).
    pub fn wrap_first_call(&self, body: Vec<u8>, config: &UserAgentConfig) -> Vec<u8> {
        if self.layer_negotiated.replace(true) {
            return body;
        }

        let mut buf = Vec::new();
        CODE_INVOKE_WITH_LAYER.serialize(&mut buf);
        SCHEME_LAYER.serialize(&mut buf);
        CODE_INIT_CONNECTION.serialize(&mut buf);
        config.app_id.serialize(&mut buf);
        config.device_model.serialize(&mut buf);
        config.system_version.serialize(&mut buf);
        config.app_version.serialize(&mut buf);
        config.lang_code.serialize(&mut buf);
        buf.extend(body);
        buf
    }

    /// Tear down this connection: mark it disconnected and hand every
    /// pending and active query it owns a transient, local-send-failure
    /// error, so the host's own `on_error` sees them and may re-issue
    /// the calls once a replacement connection exists (spec §5's
    /// "cancels all of its pending and active Queries with
    /// transient-error semantics").
    pub fn teardown(self: &Rc<Self>, ua: &crate::user_agent::UserAgent) {
        self.set_status(ConnectionStatus::Disconnected);
        for query in self.drain_pending() {
            crate::query::Query::handle_error(&query, 400, "connection torn down");
        }
        for query in ua.active_queries_for(self) {
            crate::query::Query::handle_error(&query, 400, "connection torn down");
        }
    }

    /// Assign a fresh `msg_id`/`seq_no` to `body` and append the
    /// resulting envelope to `outbox`. Returns the new `(msg_id, seq_no)`
    /// so the caller can record exactly what went out instead of
    /// re-deriving it from the session's running counter later.
    pub fn send_message(&self, body: Vec<u8>) -> (i64, i32) {
        let mut session = self.session.borrow_mut();
        let session = session.get_or_insert_with(SessionState::new_random);
        let msg_id = session.new_msg_id();
        let seq_no = session.new_seq_no(true);
        self.outbox.borrow_mut().push(Message {
            msg_id: msg_id.0,
            seq_no,
            body,
        });
        (msg_id.0, seq_no)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_connection_has_no_session() {
        let conn = Connection::new(2);
        assert!(!conn.has_session());
        conn.create_session_if_absent(1234);
        assert!(conn.has_session());
        assert_eq!(conn.session_id(), Some(1234));
    }

    #[test]
    fn send_message_assigns_increasing_msg_ids() {
        let conn = Connection::new(2);
        let (a_id, a_seq) = conn.send_message(vec![1, 2, 3]);
        let (b_id, b_seq) = conn.send_message(vec![4, 5, 6]);
        assert!(b_id > a_id);
        assert!(b_seq > a_seq);
        assert_eq!(conn.outbox.borrow().len(), 2);
    }

    fn test_config() -> UserAgentConfig {
        UserAgentConfig {
            app_id: 1,
            device_model: "test".to_string(),
            system_version: "0".to_string(),
            app_version: "0.1".to_string(),
            lang_code: "en".to_string(),
        }
    }

    #[test]
    fn first_call_is_wrapped_once() {
        let conn = Connection::new(2);
        let config = test_config();

        let body = vec![1, 2, 3, 4];
        let wrapped = conn.wrap_first_call(body.clone(), &config);
        assert!(wrapped.len() > body.len());
        assert_eq!(&wrapped[wrapped.len() - body.len()..], &body[..]);

        let unwrapped = conn.wrap_first_call(body.clone(), &config);
        assert_eq!(unwrapped, body);
    }
}
