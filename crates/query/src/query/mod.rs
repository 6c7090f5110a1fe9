// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `Query` state machine: the unit of work the rest of this crate
//! serves. A concrete RPC call is always a `Query` carrying the
//! response type's codec and a [`QueryHooks`] record, never a subclass
//! — see `hooks.rs` for why.
mod hooks;

pub use hooks::QueryHooks;

use crate::classify::{classify, ErrorAction};
use crate::connection::Connection;
use crate::timer::Timer;
use crate::user_agent::UserAgent;
use mtp_session::ConnectionStatus;
use mtp_wire::{
    CodecError, Cursor, DecodedValue, Deserializable, GzipPacked, Message, MessageContainer,
    ResponseCodec, Serializable, GZIP_PACKED_ID,
};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// A `Query` is always handled through its shared, interior-mutable
/// handle: it is referenced concurrently by at most one of
/// `Connection::pending`, `UserAgent`'s active/retry registries, and
/// whichever host-side code is still holding it from the call site.
pub type QueryHandle = Rc<RefCell<Query>>;

/// Capability flags governing which preconditions a `Query` is exempt
/// from (spec §3, §4.3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExecOption {
    Unknown,
    Force,
    Login,
    Logout,
    File,
    Normal,
}

impl ExecOption {
    pub fn is_force(self) -> bool {
        matches!(self, Self::Force)
    }

    pub fn is_login(self) -> bool {
        matches!(self, Self::Login)
    }

    pub fn is_logout(self) -> bool {
        matches!(self, Self::Logout)
    }

    pub fn is_file_transfer(self) -> bool {
        matches!(self, Self::File)
    }
}

pub struct Query {
    pub name: String,
    response_codec: Box<dyn ResponseCodec>,
    body: Vec<u8>,
    msg_id: i64,
    seq_no: i32,
    session_id: i64,
    connection: Option<Rc<Connection>>,
    exec_option: ExecOption,
    ack_received: bool,
    timer: Option<Timer>,
    retry_timer: Option<Timer>,
    connection_status: ConnectionStatus,
    /// The subscription to the bound connection's status observable;
    /// replaced whenever `execute`/migration rebinds to a different
    /// connection, dropped once the query reaches a terminal state.
    status_rx: Option<watch::Receiver<ConnectionStatus>>,
    cancelled: bool,
    user_agent: Weak<UserAgent>,
    hooks: QueryHooks,
}

impl Query {
    /// Construct a fresh, unexecuted query. `response_codec` is the
    /// schema codec for this call's response shape; `hooks` is the
    /// per-call behavior table a factory in the `host` crate supplies.
    pub fn new(
        user_agent: &Rc<UserAgent>,
        name: impl Into<String>,
        response_codec: Box<dyn ResponseCodec>,
        body: Vec<u8>,
        hooks: QueryHooks,
    ) -> QueryHandle {
        Rc::new(RefCell::new(Self {
            name: name.into(),
            response_codec,
            body,
            msg_id: 0,
            seq_no: 0,
            session_id: 0,
            connection: None,
            exec_option: ExecOption::Unknown,
            ack_received: false,
            timer: None,
            retry_timer: None,
            connection_status: ConnectionStatus::Disconnected,
            status_rx: None,
            cancelled: false,
            user_agent: Rc::downgrade(user_agent),
            hooks,
        }))
    }

    pub fn msg_id(&self) -> i64 {
        self.msg_id
    }

    pub fn seq_no(&self) -> i32 {
        self.seq_no
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn ack_received(&self) -> bool {
        self.ack_received
    }

    pub fn exec_option(&self) -> ExecOption {
        self.exec_option
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// The connection this query is currently bound to, if any. Used by
    /// `Connection::teardown` to find which entries of the active
    /// registry are its own (spec §5).
    pub fn connection(&self) -> Option<Rc<Connection>> {
        self.connection.clone()
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    pub fn has_retry_timer(&self) -> bool {
        self.retry_timer.is_some()
    }

    pub fn is_force(&self) -> bool {
        self.exec_option.is_force()
    }

    pub fn is_login(&self) -> bool {
        self.exec_option.is_login()
    }

    pub fn is_logout(&self) -> bool {
        self.exec_option.is_logout()
    }

    pub fn is_file_transfer(&self) -> bool {
        self.exec_option.is_file_transfer()
    }

    /// Bind to a connection, verify preconditions, and send or enqueue
    /// (spec §4.1).
    pub fn execute(query: &QueryHandle, connection: Rc<Connection>, option: ExecOption) {
        {
            let mut q = query.borrow_mut();
            q.exec_option = option;
            q.connection_status = connection.status();
            q.status_rx = Some(connection.subscribe_status());
            q.connection = Some(connection);
        }

        if !Self::check_logging_out(query) {
            return;
        }
        if !Self::check_pending(query, true) {
            return;
        }
        Self::send_inner(query, None);
    }

    /// Notify the query of a status change on the connection it is
    /// currently subscribed to.
    pub fn connection_status_changed(query: &QueryHandle, status: ConnectionStatus) {
        query.borrow_mut().connection_status = status;
    }

    /// Resume a pending query once its connection's preconditions may
    /// have changed. Re-runs the gate (without `transfer_auth`) and
    /// sends if it now passes.
    pub fn execute_after_pending(query: &QueryHandle) -> bool {
        if !Self::check_logging_out(query) {
            return true;
        }
        if !Self::check_pending(query, false) {
            return false;
        }
        Self::send_inner(query, None);
        true
    }

    /// Mark the query as acknowledged by the server. Idempotent; resets
    /// the timeout to a fresh interval.
    pub fn ack(query: &QueryHandle) {
        let (already_acked, interval, is_logout) = {
            let q = query.borrow();
            (
                q.ack_received,
                (q.hooks.timeout_interval)(),
                q.exec_option.is_logout(),
            )
        };
        if already_acked {
            return;
        }

        query.borrow_mut().ack_received = true;
        Self::timeout_within(query, interval);

        if is_logout {
            // Workaround for the server's logout behavior: it acks and
            // then closes the socket instead of ever replying, so
            // synthesize the `true` result the caller is waiting for.
            let body = true.to_bytes();
            let _ = Self::handle_result(query, &body);
        }
    }

    /// Decode a response body and complete the query on success.
    pub fn handle_result(query: &QueryHandle, body: &[u8]) -> Result<(), CodecError> {
        if query.borrow().cancelled {
            return Ok(());
        }

        let is_gzip = u32::from_bytes(body).ok() == Some(GZIP_PACKED_ID);
        let payload = if is_gzip {
            let mut cursor = Cursor::from_slice(body);
            let packed = GzipPacked::deserialize(&mut cursor)?;
            packed.decompress()?
        } else {
            body.to_vec()
        };

        let decode_result = {
            let q = query.borrow();
            mtp_wire::decode_response(q.response_codec.as_ref(), &payload)
        };

        let decoded = match decode_result {
            Ok(decoded) => decoded,
            Err(err) => {
                log::error!(
                    "query {:?}: corrupt response, aborting session for this call: {err}",
                    query.borrow().name
                );
                return Err(err);
            }
        };

        Self::on_answer_internal(query, decoded);

        Self::clear_timers(query);
        let msg_id = query.borrow().msg_id;
        if let Some(ua) = query.borrow().user_agent.upgrade() {
            ua.remove_active(msg_id);
        }

        Ok(())
    }

    /// Invoke `hooks.on_answer` without holding the query's `RefCell`
    /// borrow across the callback: a host `on_answer` that re-enters
    /// `Query::*` on this same handle (e.g. chaining a follow-up call)
    /// would otherwise hit a double mutable borrow and panic.
    fn on_answer_internal(query: &QueryHandle, decoded: DecodedValue) {
        query.borrow_mut().status_rx = None;
        let mut hook = std::mem::replace(
            &mut query.borrow_mut().hooks.on_answer,
            Box::new(|_| {}),
        );
        hook(decoded);
        query.borrow_mut().hooks.on_answer = hook;
    }

    /// Same reentrancy guard as [`Self::on_answer_internal`], for
    /// `hooks.on_error`.
    fn on_error_internal(query: &QueryHandle, code: i32, text: String) {
        query.borrow_mut().status_rx = None;
        let mut hook = std::mem::replace(
            &mut query.borrow_mut().hooks.on_error,
            Box::new(|_, _| {}),
        );
        hook(code, text);
        query.borrow_mut().hooks.on_error = hook;
    }

    /// Same reentrancy guard as [`Self::on_answer_internal`], for any of
    /// the zero-argument `FnMut()` hooks (`will_be_pending`, `will_send`,
    /// `sent`, `on_timeout`). `select` picks which field to swap out.
    fn invoke_fnmut_hook(query: &QueryHandle, select: impl Fn(&mut QueryHooks) -> &mut Box<dyn FnMut()>) {
        let mut hook: Box<dyn FnMut()> =
            std::mem::replace(select(&mut query.borrow_mut().hooks), Box::new(|| {}));
        hook();
        *select(&mut query.borrow_mut().hooks) = hook;
    }

    /// Classify a server-reported RPC error and react: transparently
    /// retry when the error is server-recoverable, otherwise surface it
    /// (spec §4.5).
    pub fn handle_error(query: &QueryHandle, code: i32, text: &str) {
        Self::clear_timers(query);
        let msg_id = query.borrow().msg_id;
        if msg_id != 0 {
            if let Some(ua) = query.borrow().user_agent.upgrade() {
                ua.remove_active(msg_id);
            }
        }

        let mut should_retry = false;
        let mut retry_after_seconds = 0u64;
        let mut error_handled = true;

        match classify(code, text) {
            ErrorAction::Migrate { dc_id } => {
                let ua = query.borrow().user_agent.upgrade();
                if let Some(ua) = ua {
                    log::info!("handling migration to dc {dc_id}");
                    ua.set_active_dc(dc_id);
                    let new_connection = ua.active_connection();
                    if !new_connection.is_authorized() {
                        new_connection.restart_authorization();
                    }

                    {
                        let mut q = query.borrow_mut();
                        q.ack_received = false;
                        q.session_id = 0;
                        q.status_rx = Some(new_connection.subscribe_status());
                        q.connection_status = new_connection.status();
                        q.connection = Some(new_connection);
                    }

                    let eligible = {
                        let q = query.borrow();
                        (q.hooks.should_retry_after_recover_from_error)() || q.exec_option.is_login()
                    };
                    should_retry = eligible;
                }
            }
            ErrorAction::Surface => {
                error_handled = false;
            }
            ErrorAction::SessionPasswordNeeded => {
                if let Some(ua) = query.borrow().user_agent.upgrade() {
                    should_retry = ua.handle_session_password_needed();
                }
            }
            ErrorAction::AuthKeyInvalid => {
                if let Some(ua) = query.borrow().user_agent.upgrade() {
                    if let Some(conn) = query.borrow().connection.clone() {
                        ua.set_connection_logged_out(&conn);
                    }
                    ua.login();
                    should_retry = (query.borrow().hooks.should_retry_after_recover_from_error)();
                }
            }
            ErrorAction::AuthKeyPermEmpty => {
                if let Some(conn) = query.borrow().connection.clone() {
                    conn.restart_temp_authorization();
                }
                should_retry = (query.borrow().hooks.should_retry_after_recover_from_error)();
            }
            ErrorAction::FloodWait { seconds } => {
                retry_after_seconds = seconds;
                query.borrow_mut().ack_received = false;
                should_retry = (query.borrow().hooks.should_retry_after_recover_from_error)();

                let (configured, is_force) = {
                    let q = query.borrow();
                    (
                        q.connection.as_ref().is_some_and(|c| c.is_configured()),
                        q.exec_option.is_force(),
                    )
                };
                if !configured && !is_force {
                    query.borrow_mut().session_id = 0;
                }
            }
        }

        if should_retry {
            Self::retry_within(query, retry_after_seconds);
        }

        if error_handled {
            log::info!(
                "error for query {:?}: {code} {text} (handled)",
                query.borrow().name
            );
            return;
        }

        Self::on_error_internal(query, code, text.to_string());
    }

    /// External instruction to resend under a fresh session if the
    /// current one is unusable.
    pub fn regen(query: &QueryHandle) {
        query.borrow_mut().ack_received = false;

        let same_session = {
            let q = query.borrow();
            match &q.connection {
                Some(conn) => q.session_id != 0 && conn.session_id() == Some(q.session_id),
                None => false,
            }
        };
        let (configured, is_force) = {
            let q = query.borrow();
            (
                q.connection.as_ref().is_some_and(|c| c.is_configured()),
                q.exec_option.is_force(),
            )
        };

        if !same_session || (!configured && !is_force) {
            query.borrow_mut().session_id = 0;
        }

        Self::retry_within(query, 0);
    }

    /// Transition to terminal. No further callbacks fire after this.
    pub fn cancel(query: &QueryHandle) {
        if query.borrow().cancelled {
            return;
        }
        query.borrow_mut().cancelled = true;
        Self::clear_timers(query);

        let msg_id = query.borrow().msg_id;
        if let Some(ua) = query.borrow().user_agent.upgrade() {
            if msg_id != 0 {
                ua.remove_active(msg_id);
            }
            ua.remove_retry(query);
        }
        if let Some(conn) = query.borrow().connection.clone() {
            conn.remove_pending(query);
        }
        query.borrow_mut().status_rx = None;
    }

    fn check_logging_out(query: &QueryHandle) -> bool {
        let (logging_out, is_force) = {
            let q = query.borrow();
            let conn = q.connection.as_ref().expect("connection bound before use");
            (conn.is_logging_out(), q.exec_option.is_force())
        };

        if logging_out && !is_force {
            debug_assert!(
                !query.borrow().exec_option.is_logout(),
                "a logout query should never itself observe is_logging_out"
            );
            Self::on_error_internal(query, 600, "LOGGING_OUT".to_string());
            return false;
        }
        true
    }

    /// Evaluate the four pending predicates; append to the connection's
    /// pending queue and return `false` if any is true (spec §4.3).
    fn check_pending(query: &QueryHandle, transfer_auth: bool) -> bool {
        let conn = query
            .borrow()
            .connection
            .clone()
            .expect("connection bound before use");
        let mut pending = false;

        if !conn.has_session() {
            pending = true;
            conn.create_session_if_absent(0);
        }

        if !conn.status().is_connected() {
            pending = true;
        }

        let (is_force, is_login) = {
            let q = query.borrow();
            (q.exec_option.is_force(), q.exec_option.is_login())
        };

        if !conn.is_configured() && !is_force {
            pending = true;
        }

        if !conn.is_logged_in() && !is_login && !is_force {
            pending = true;
            if transfer_auth {
                if let Some(ua) = query.borrow().user_agent.upgrade() {
                    if !ua.is_active_connection(&conn) {
                        conn.transfer_auth_to_me();
                    }
                }
            }
        }

        if pending {
            Self::invoke_fnmut_hook(query, |hooks| &mut hooks.will_be_pending);
            conn.add_pending(query.clone());
            log::debug!(
                "added query {:?} ({}) to dc {} pending list",
                query.borrow().name,
                query.borrow().msg_id,
                conn.id
            );
            return false;
        }

        true
    }

    fn send_inner(query: &QueryHandle, override_body: Option<Vec<u8>>) {
        let conn = query
            .borrow()
            .connection
            .clone()
            .expect("connection bound before use");

        query.borrow_mut().ack_received = false;
        Self::invoke_fnmut_hook(query, |hooks| &mut hooks.will_send);

        let body = override_body.unwrap_or_else(|| query.borrow().body.clone());
        let body = match query.borrow().user_agent.upgrade() {
            Some(ua) => conn.wrap_first_call(body, &ua.config),
            None => body,
        };
        log::debug!(
            "sending query {:?} of size {} to dc {}",
            query.borrow().name,
            body.len(),
            conn.id
        );

        let (msg_id, seq_no) = conn.send_message(body);

        let is_logout = query.borrow().exec_option.is_logout();
        if is_logout {
            conn.set_logout_query(query.clone());
        }

        if let Some(ua) = query.borrow().user_agent.upgrade() {
            ua.add_active(msg_id, query.clone());
        }

        let session_id = conn.session_id().unwrap_or(0);
        let interval = (query.borrow().hooks.timeout_interval)();
        {
            let mut q = query.borrow_mut();
            q.msg_id = msg_id;
            q.seq_no = seq_no;
            q.session_id = session_id;
        }

        Self::timeout_within(query, interval);
        Self::invoke_fnmut_hook(query, |hooks| &mut hooks.sent);
    }

    /// The resend algorithm (spec §4.4): same-session resends rewrap
    /// the original envelope inside a one-entry container under a fresh
    /// `msg_id`; cross-session resends go out as a plain new message.
    fn alarm(query: &QueryHandle) {
        log::debug!(
            "alarm query {} (type {:?})",
            query.borrow().msg_id,
            query.borrow().name
        );

        Self::clear_timers(query);

        let msg_id = query.borrow().msg_id;
        if let Some(ua) = query.borrow().user_agent.upgrade() {
            if msg_id != 0 {
                ua.remove_active(msg_id);
            }
        }

        if !Self::check_logging_out(query) {
            return;
        }
        if !Self::check_pending(query, false) {
            return;
        }

        let same_session = {
            let q = query.borrow();
            match &q.connection {
                Some(conn) => q.session_id != 0 && conn.session_id() == Some(q.session_id),
                None => false,
            }
        };

        if same_session {
            let (old_msg_id, old_seq_no, old_body) = {
                let q = query.borrow();
                (q.msg_id, q.seq_no, q.body.clone())
            };
            let wrapped = MessageContainer::wrap_single(Message {
                msg_id: old_msg_id,
                seq_no: old_seq_no,
                body: old_body,
            });
            Self::send_inner(query, Some(wrapped.to_bytes()));
            log::info!(
                "resent query {} (wrapped in container) to dc",
                query.borrow().msg_id
            );
        } else {
            let old_msg_id = query.borrow().msg_id;
            Self::send_inner(query, None);
            log::info!(
                "resent query {} as {} (new session)",
                old_msg_id,
                query.borrow().msg_id
            );
        }
    }

    fn timeout_alarm(query: &QueryHandle) {
        Self::clear_timers(query);
        Self::invoke_fnmut_hook(query, |hooks| &mut hooks.on_timeout);

        let should_retry = (query.borrow().hooks.should_retry_on_timeout)();
        if !should_retry {
            let msg_id = query.borrow().msg_id;
            if let Some(ua) = query.borrow().user_agent.upgrade() {
                if msg_id != 0 {
                    ua.remove_active(msg_id);
                }
            }
            if let Some(conn) = query.borrow().connection.clone() {
                conn.remove_pending(query);
            }
        } else {
            Self::alarm(query);
        }
    }

    fn timeout_within(query: &QueryHandle, duration: Duration) {
        let weak = Rc::downgrade(query);
        let timer = Timer::schedule(duration, move || {
            if let Some(q) = weak.upgrade() {
                Query::timeout_alarm(&q);
            }
        });
        query.borrow_mut().timer = Some(timer);
    }

    fn retry_within(query: &QueryHandle, seconds: u64) {
        if let Some(ua) = query.borrow().user_agent.upgrade() {
            ua.add_retry(query.clone());
        }

        let weak = Rc::downgrade(query);
        let ua_weak = query.borrow().user_agent.clone();
        let timer = Timer::schedule(Duration::from_secs(seconds), move || {
            if let Some(q) = weak.upgrade() {
                if let Some(ua) = ua_weak.upgrade() {
                    ua.remove_retry(&q);
                }
                Query::alarm(&q);
            }
        });
        query.borrow_mut().retry_timer = Some(timer);
    }

    fn clear_timers(query: &QueryHandle) {
        let mut q = query.borrow_mut();
        if let Some(mut timer) = q.timer.take() {
            timer.cancel();
        }
        if let Some(mut timer) = q.retry_timer.take() {
            timer.cancel();
        }
    }
}
