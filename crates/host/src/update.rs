// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The external-interface façade (spec §6): a typed callback trait the
//! embedding host implements to receive global notifications (new
//! messages, message id rewrites on send, connection status) and to
//! answer the credential prompt a login/password flow needs.
//!
//! Grounded on `original_source/include/tgl/tgl_update_callback.h`,
//! trimmed to the subset spec §6 names. The original puts the
//! credential prompt (`get_value`) on the same interface as the push
//! notifications; [`UpdateCallback`] does too, by requiring
//! [`CredentialBridge`] as a supertrait, so a host only has one trait
//! to implement.
use mtp_query::CredentialBridge;
use mtp_session::{ConnectionStatus, DcId};

/// A server-pushed message, trimmed to what a host needs to update its
/// own message list; the full per-field shape is owned by the schema
/// compiler, not this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: i64,
    pub peer_id: i64,
    pub text: String,
    pub date: i32,
}

/// Mirrors `tgl_typing_status`, trimmed to the variants this crate's
/// demo calls exercise.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypingStatus {
    Typing,
    RecordingAudio,
    UploadingDocument,
    Cancelled,
}

/// Implemented by the embedding host. The Query Subsystem never calls
/// these directly — the host's own update dispatcher and per-call
/// result callbacks do — but the trait lives here because it is the
/// one the rest of spec §6's "Outbound (core -> host)" list describes.
pub trait UpdateCallback: CredentialBridge {
    fn new_messages(&self, _messages: &[IncomingMessage]) {}
    fn message_id_updated(&self, _old_message_id: i64, _new_message_id: i64) {}
    fn message_sent(&self, _old_message_id: i64, _new_message_id: i64, _date: i32) {}
    fn message_deleted(&self, _message_id: i64) {}
    fn logged_in(&self, _success: bool) {}
    fn logged_out(&self, _success: bool) {}
    fn typing_status_changed(&self, _user_id: i64, _chat_id: i64, _status: TypingStatus) {}
    fn connection_status_changed(&self, _dc_id: DcId, _status: ConnectionStatus) {}
}

/// Forward every future status change on `connection` to
/// `callback.connection_status_changed`, tagged with `dc_id`. Spawned
/// as a `LocalSet` task so it runs on the same single-threaded loop as
/// everything else (see the crate docs); dropped along with the
/// `LocalSet` once the host tears the connection down.
pub fn watch_connection_status<U>(
    dc_id: DcId,
    mut status_rx: tokio::sync::watch::Receiver<ConnectionStatus>,
    callback: std::rc::Rc<U>,
) where
    U: UpdateCallback + 'static,
{
    tokio::task::spawn_local(async move {
        loop {
            if status_rx.changed().await.is_err() {
                return;
            }
            callback.connection_status_changed(dc_id, *status_rx.borrow());
        }
    });
}
