// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The spec's testable properties (§8): the six end-to-end scenarios
//! (S1-S6) plus a couple of the invariants, driven against in-process
//! fakes rather than a live socket — a query's outbound envelope is
//! read straight out of `Connection::outbox`, and a "server reply" is
//! whatever `UserAgent::dispatch_*` is fed next, the same shape
//! `grammers-mtsender/tests/lib.rs` uses for its fake transport.
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use mtp_host::{auth_log_out, auth_send_code, help_get_config, messages_send_message};
use mtp_host::{upload_save_file_part, Config, DcOptionRecord, SentCode, SentCodeKind, SentMessage};
use mtp_query::{
    Connection, CredentialBridge, CredentialRequest, CredentialValue, ExecOption, Query,
    UserAgent, UserAgentConfig,
};
use mtp_session::{ConnectionStatus, DcId};
use mtp_wire::{Cursor, Deserializable, MessageContainer, Serializable};

struct NoOpCredentialBridge;

impl CredentialBridge for NoOpCredentialBridge {
    fn get_value(
        &self,
        _request: CredentialRequest,
    ) -> Pin<Box<dyn Future<Output = Option<CredentialValue>>>> {
        Box::pin(async { None })
    }
}

/// Answers every credential request with a fixed password, counting
/// how many times the host was actually asked. Used by the invariant-6
/// test to confirm the prompt fires once no matter how many queries
/// trip the same `SESSION_PASSWORD_NEEDED` lock.
struct CountingCredentialBridge {
    calls: Rc<Cell<usize>>,
}

impl CredentialBridge for CountingCredentialBridge {
    fn get_value(
        &self,
        _request: CredentialRequest,
    ) -> Pin<Box<dyn Future<Output = Option<CredentialValue>>>> {
        self.calls.set(self.calls.get() + 1);
        Box::pin(async { Some(CredentialValue::Text("hunter2".to_string())) })
    }
}

fn test_user_agent_config() -> UserAgentConfig {
    UserAgentConfig {
        app_id: 1,
        device_model: "test".to_string(),
        system_version: "0".to_string(),
        app_version: "0.1".to_string(),
        lang_code: "en".to_string(),
    }
}

fn test_user_agent(bootstrap_dc: DcId) -> Rc<UserAgent> {
    UserAgent::new(test_user_agent_config(), Box::new(NoOpCredentialBridge), bootstrap_dc)
}

fn test_user_agent_with_bridge(
    bootstrap_dc: DcId,
    bridge: Box<dyn CredentialBridge>,
) -> Rc<UserAgent> {
    UserAgent::new(test_user_agent_config(), bridge, bootstrap_dc)
}

/// Put `conn` past every precondition in the pending gate (spec §4.3):
/// connected, configured, logged in, with a session already open.
fn mark_ready(conn: &Connection) {
    conn.set_status(ConnectionStatus::Connected);
    conn.set_configured(true);
    conn.set_logged_in(true);
    conn.create_session_if_absent(1);
}

async fn drain_local_tasks() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// S1 (happy path): `help.getConfig` sent on a connected DC; server
/// replies with five DC options.
#[tokio::test]
async fn s1_happy_path_help_get_config() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let ua = test_user_agent(2);
            let conn = ua.connection(2);
            mark_ready(&conn);

            let result = Rc::new(RefCell::new(None));
            let result_clone = Rc::clone(&result);
            let query = help_get_config(
                &ua,
                move |config| *result_clone.borrow_mut() = Some(config),
                |code, text| panic!("unexpected error {code} {text}"),
            );
            Query::execute(&query, conn.clone(), ExecOption::Normal);

            let msg_id = conn.outbox.borrow().last().unwrap().msg_id;
            let server_config = Config {
                dc_options: (1..=5)
                    .map(|id| DcOptionRecord {
                        id,
                        ip_address: format!("10.0.0.{id}"),
                        port: 443,
                    })
                    .collect(),
            };
            ua.dispatch_result(msg_id, &server_config.to_bytes())
                .expect("query is active")
                .expect("response decodes cleanly");

            let got = result.borrow().clone().expect("on_answer fired");
            assert_eq!(got.dc_options.len(), 5);
            assert_eq!(ua.active_len(), 0);
        })
        .await;
}

/// S2 (migrate): `auth.sendCode` sent to DC2; server answers
/// `303 PHONE_MIGRATE_4` exactly once; DC4 then answers with a real
/// `SentCode`. The active DC becomes 4 and the host's callback fires
/// exactly once.
#[tokio::test]
async fn s2_migrate_retries_on_the_new_dc() {
    tokio::time::pause();
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let ua = test_user_agent(2);
            let conn2 = ua.connection(2);
            mark_ready(&conn2);
            let conn4 = ua.connection(4);
            mark_ready(&conn4);

            let fire_count = Rc::new(Cell::new(0));
            let fire_count_clone = Rc::clone(&fire_count);
            let result = Rc::new(RefCell::new(None));
            let result_clone = Rc::clone(&result);
            let query = auth_send_code(
                &ua,
                "+15551234567",
                move |sent_code| {
                    fire_count_clone.set(fire_count_clone.get() + 1);
                    *result_clone.borrow_mut() = Some(sent_code);
                },
                |code, text| panic!("unexpected error {code} {text}"),
            );
            Query::execute(&query, conn2.clone(), ExecOption::Login);

            let msg_id_dc2 = conn2.outbox.borrow().last().unwrap().msg_id;
            ua.dispatch_error(msg_id_dc2, 303, "PHONE_MIGRATE_4");
            assert_eq!(ua.active_dc(), 4);

            tokio::time::advance(Duration::from_millis(50)).await;
            drain_local_tasks().await;

            let msg_id_dc4 = conn4.outbox.borrow().last().unwrap().msg_id;
            let server_sent_code = SentCode {
                kind: SentCodeKind::App,
                phone_code_hash: "abc123".to_string(),
            };
            ua.dispatch_result(msg_id_dc4, &server_sent_code.to_bytes())
                .expect("query is active on dc4")
                .expect("response decodes cleanly");

            assert_eq!(fire_count.get(), 1);
            let got = result.borrow().clone().expect("on_answer fired");
            assert_eq!(got.phone_code_hash, "abc123");
        })
        .await;
}

/// S3 (flood wait): `messages.sendMessage` receives `420
/// FLOOD_WAIT_7`; the query resends at T+7s and completes exactly once.
#[tokio::test]
async fn s3_flood_wait_retries_after_delay() {
    tokio::time::pause();
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let ua = test_user_agent(2);
            let conn = ua.connection(2);
            mark_ready(&conn);

            let fire_count = Rc::new(Cell::new(0));
            let fire_count_clone = Rc::clone(&fire_count);
            let query = messages_send_message(
                &ua,
                777,
                "hello",
                move |_sent| fire_count_clone.set(fire_count_clone.get() + 1),
                |code, text| panic!("unexpected error {code} {text}"),
            );
            Query::execute(&query, conn.clone(), ExecOption::Normal);

            let first_msg_id = conn.outbox.borrow().last().unwrap().msg_id;
            ua.dispatch_error(first_msg_id, 420, "FLOOD_WAIT_7");

            // A retry scheduled sooner than the flood-wait delay must not
            // have gone out yet.
            tokio::time::advance(Duration::from_secs(6)).await;
            drain_local_tasks().await;
            assert_eq!(conn.outbox.borrow().len(), 1);

            tokio::time::advance(Duration::from_secs(2)).await;
            drain_local_tasks().await;
            assert_eq!(conn.outbox.borrow().len(), 2);

            let resent_msg_id = conn.outbox.borrow().last().unwrap().msg_id;
            assert_ne!(resent_msg_id, first_msg_id);

            let server_result = SentMessage { id: 999, date: 123 };
            ua.dispatch_result(resent_msg_id, &server_result.to_bytes())
                .expect("resent query is active")
                .expect("response decodes cleanly");

            assert_eq!(fire_count.get(), 1);
        })
        .await;
}

/// S4 (logout ack-only): the server acks `auth.logOut` and never sends
/// a body; the query still completes with a synthesized `true` result.
#[tokio::test]
async fn s4_logout_completes_on_ack_only() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let ua = test_user_agent(2);
            let conn = ua.connection(2);
            mark_ready(&conn);

            let result = Rc::new(RefCell::new(None));
            let result_clone = Rc::clone(&result);
            let query = auth_log_out(&ua, move |success| *result_clone.borrow_mut() = Some(success));
            Query::execute(&query, conn.clone(), ExecOption::Logout);

            let msg_id = conn.outbox.borrow().last().unwrap().msg_id;
            ua.dispatch_ack(msg_id);

            assert_eq!(*result.borrow(), Some(true));
            assert_eq!(ua.active_len(), 0);
        })
        .await;
}

/// S5 (cancellation): a file-transfer query is cancelled before its
/// first ack; no `on_answer` fires and the active map does not retain
/// it, so a late server reply for its old `msg_id` has nowhere to go.
#[tokio::test]
async fn s5_cancel_before_ack_prevents_answer() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let ua = test_user_agent(2);
            let conn = ua.connection(2);
            mark_ready(&conn);

            let answered = Rc::new(Cell::new(false));
            let answered_clone = Rc::clone(&answered);
            let query = upload_save_file_part(
                &ua,
                1,
                0,
                vec![1, 2, 3],
                move |_| answered_clone.set(true),
                |_, _| {},
            );
            Query::execute(&query, conn.clone(), ExecOption::File);

            let msg_id = conn.outbox.borrow().last().unwrap().msg_id;
            assert_eq!(ua.active_len(), 1);

            Query::cancel(&query);
            assert_eq!(ua.active_len(), 0);

            let outcome = ua.dispatch_result(msg_id, &true.to_bytes());
            assert!(outcome.is_none(), "a cancelled query must not answer");
            assert!(!answered.get());
        })
        .await;
}

/// S6 (corrupt response): the server's reply to `help.getConfig` skips
/// short of the buffer end; the core reports the decode as fatal and
/// never calls `on_answer`.
#[tokio::test]
async fn s6_corrupt_response_is_fatal() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let ua = test_user_agent(2);
            let conn = ua.connection(2);
            mark_ready(&conn);

            let query = help_get_config(&ua, |_| panic!("on_answer must not fire"), |_, _| {});
            Query::execute(&query, conn.clone(), ExecOption::Normal);

            let msg_id = conn.outbox.borrow().last().unwrap().msg_id;
            let mut corrupt = Config { dc_options: vec![] }.to_bytes();
            corrupt.extend_from_slice(&[0, 0, 0, 0]); // trailing garbage word

            let outcome = ua
                .dispatch_result(msg_id, &corrupt)
                .expect("query is active");
            assert!(outcome.is_err());
        })
        .await;
}

/// Invariant 1 (§8): a query is in the active map if and only if it has
/// been sent and not yet resolved.
#[tokio::test]
async fn active_map_holds_query_only_between_send_and_resolution() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let ua = test_user_agent(2);
            let conn = ua.connection(2);
            mark_ready(&conn);

            let query = help_get_config(&ua, |_| {}, |_, _| {});
            Query::execute(&query, conn.clone(), ExecOption::Normal);
            let msg_id = conn.outbox.borrow().last().unwrap().msg_id;

            assert_eq!(ua.active_len(), 1);
            assert!(ua.find_active(msg_id).is_some());

            let config = Config { dc_options: vec![] };
            ua.dispatch_result(msg_id, &config.to_bytes())
                .unwrap()
                .unwrap();

            assert_eq!(ua.active_len(), 0);
            assert!(ua.find_active(msg_id).is_none());
        })
        .await;
}

/// Invariant 2 (§8): a same-session resend embeds the original
/// `(msg_id, seq_no)` inside a container under a fresh `msg_id`.
#[tokio::test]
async fn resend_within_same_session_wraps_the_original_message() {
    tokio::time::pause();
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let ua = test_user_agent(2);
            let conn = ua.connection(2);
            mark_ready(&conn);

            let query = help_get_config(&ua, |_| {}, |_, _| {});
            Query::execute(&query, conn.clone(), ExecOption::Normal);
            let original = conn.outbox.borrow().last().unwrap().clone();

            ua.dispatch_error(original.msg_id, 420, "FLOOD_WAIT_1");
            tokio::time::advance(Duration::from_secs(1)).await;
            drain_local_tasks().await;

            let resent = conn.outbox.borrow().last().unwrap().clone();
            assert_ne!(resent.msg_id, original.msg_id);

            let mut cursor = Cursor::from_slice(&resent.body);
            let container =
                MessageContainer::deserialize(&mut cursor).expect("resend wraps in a container");
            assert_eq!(container.messages.len(), 1);
            assert_eq!(container.messages[0].msg_id, original.msg_id);
            assert_eq!(container.messages[0].seq_no, original.seq_no);
        })
        .await;
}

/// Invariant 3 (§8): calling `ack()` twice has the same observable
/// effect as calling it once.
#[tokio::test]
async fn ack_is_idempotent() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let ua = test_user_agent(2);
            let conn = ua.connection(2);
            mark_ready(&conn);

            let fire_count = Rc::new(Cell::new(0));
            let fire_count_clone = Rc::clone(&fire_count);
            let query =
                auth_log_out(&ua, move |_| fire_count_clone.set(fire_count_clone.get() + 1));
            Query::execute(&query, conn.clone(), ExecOption::Logout);

            let msg_id = conn.outbox.borrow().last().unwrap().msg_id;
            ua.dispatch_ack(msg_id);
            // The first ack already completed and deregistered the query;
            // a direct second call is the only way left to invoke it twice.
            Query::ack(&query);

            assert_eq!(fire_count.get(), 1);
        })
        .await;
}

/// Connection teardown (spec §5): a pending and an active query on the
/// same connection both surface a transient error and are dropped from
/// every registry, so the host may re-issue them against a replacement
/// connection.
#[tokio::test]
async fn teardown_errors_out_pending_and_active_queries() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let ua = test_user_agent(2);
            let conn = ua.connection(2);
            mark_ready(&conn);

            let active_errors = Rc::new(RefCell::new(Vec::new()));
            let active_errors_clone = Rc::clone(&active_errors);
            let active_query = help_get_config(
                &ua,
                |_| panic!("must not answer after teardown"),
                move |code, text| active_errors_clone.borrow_mut().push((code, text)),
            );
            Query::execute(&active_query, conn.clone(), ExecOption::Normal);
            assert_eq!(ua.active_len(), 1);

            // Not connected yet: this one lands on the pending queue.
            let pending_conn = ua.connection(2);
            pending_conn.set_status(ConnectionStatus::Disconnected);
            let pending_errors = Rc::new(RefCell::new(Vec::new()));
            let pending_errors_clone = Rc::clone(&pending_errors);
            let pending_query = help_get_config(
                &ua,
                |_| panic!("must not answer after teardown"),
                move |code, text| pending_errors_clone.borrow_mut().push((code, text)),
            );
            Query::execute(&pending_query, conn.clone(), ExecOption::Normal);
            assert_eq!(conn.pending_len(), 1);

            conn.teardown(&ua);

            assert_eq!(ua.active_len(), 0);
            assert_eq!(conn.pending_len(), 0);
            assert_eq!(active_errors.borrow().as_slice(), &[(400, "connection torn down".to_string())]);
            assert_eq!(pending_errors.borrow().as_slice(), &[(400, "connection torn down".to_string())]);
            assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        })
        .await;
}

/// Invariant 6 (§8): two queries that both hit `401
/// SESSION_PASSWORD_NEEDED` share one credential prompt — the host's
/// bridge is asked exactly once — and both retry once the password is
/// confirmed.
#[tokio::test]
async fn password_prompt_fires_once_for_concurrent_queries() {
    tokio::time::pause();
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let calls = Rc::new(Cell::new(0));
            let ua = test_user_agent_with_bridge(
                2,
                Box::new(CountingCredentialBridge {
                    calls: Rc::clone(&calls),
                }),
            );
            let conn = ua.connection(2);
            mark_ready(&conn);

            let fire_count = Rc::new(Cell::new(0));

            let fire_count_a = Rc::clone(&fire_count);
            let query_a = help_get_config(
                &ua,
                move |_| fire_count_a.set(fire_count_a.get() + 1),
                |code, text| panic!("unexpected error {code} {text}"),
            );
            Query::execute(&query_a, conn.clone(), ExecOption::Normal);
            let msg_id_a = conn.outbox.borrow().last().unwrap().msg_id;

            let fire_count_b = Rc::clone(&fire_count);
            let query_b = help_get_config(
                &ua,
                move |_| fire_count_b.set(fire_count_b.get() + 1),
                |code, text| panic!("unexpected error {code} {text}"),
            );
            Query::execute(&query_b, conn.clone(), ExecOption::Normal);
            let msg_id_b = conn.outbox.borrow().last().unwrap().msg_id;
            assert_ne!(msg_id_a, msg_id_b);

            ua.dispatch_error(msg_id_a, 401, "SESSION_PASSWORD_NEEDED");
            ua.dispatch_error(msg_id_b, 401, "SESSION_PASSWORD_NEEDED");

            drain_local_tasks().await;
            assert_eq!(calls.get(), 1, "credential prompt must fire exactly once");
            assert!(!ua.is_password_locked());

            tokio::time::advance(Duration::from_millis(50)).await;
            drain_local_tasks().await;

            assert_eq!(conn.outbox.borrow().len(), 4, "both queries must resend");
            let resent_a = conn.outbox.borrow()[2].msg_id;
            let resent_b = conn.outbox.borrow()[3].msg_id;
            assert_ne!(resent_a, msg_id_a);
            assert_ne!(resent_b, msg_id_b);

            let config = Config { dc_options: vec![] };
            ua.dispatch_result(resent_a, &config.to_bytes())
                .expect("query a is active again")
                .expect("response decodes cleanly");
            ua.dispatch_result(resent_b, &config.to_bytes())
                .expect("query b is active again")
                .expect("response decodes cleanly");

            assert_eq!(fire_count.get(), 2, "both queries must complete after retrying");
        })
        .await;
}
