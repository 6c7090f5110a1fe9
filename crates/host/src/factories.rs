// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-call `Query` factories, the Rust equivalent of the `query_*`
//! subclasses in `original_source/src/query/` (`query_msg_send.h`,
//! `query_channel_get_participant.h`, ...). Each factory builds a
//! single concrete `Query` with its own wire body, response codec and
//! `QueryHooks`, per spec §4.9 — data, not an inheritance hierarchy.
//!
//! The payload shapes below are deliberately small demo stand-ins: the
//! spec's Non-goals place "the on-wire serialization of individual RPC
//! payloads beyond the envelope level" outside this core, owned by an
//! external schema compiler. What is exercised here is the Query
//! Subsystem behavior around these calls (preconditions, retries,
//! migration, cancellation), not a complete `.tl` schema.
use std::rc::Rc;
use std::time::Duration;

use mtp_query::{ExecOption, Query, QueryHandle, QueryHooks, UserAgent};
use mtp_wire::{CodecError, Cursor, DecodedValue, Deserializable, ResponseCodec, Serializable};

const HELP_GET_CONFIG_ID: u32 = 0xc4f9_186b;
const CONFIG_ID: u32 = 0x232d_5905;
const DC_OPTION_ID: u32 = 0x18b7_a10d;

const AUTH_SEND_CODE_ID: u32 = 0x768d_5f4d;
const AUTH_SENT_CODE_ID: u32 = 0x5e00_2502;

const AUTH_LOG_OUT_ID: u32 = 0x3c51_564a;

const MESSAGES_SEND_MESSAGE_ID: u32 = 0xfa88_427a;
const SENT_MESSAGE_ID: u32 = 0x9a91_0a9f;

const UPLOAD_SAVE_FILE_PART_ID: u32 = 0xb304_a621;

const USERS_GET_FULL_USER_ID: u32 = 0xca30_a5b1;
const USER_FULL_ID: u32 = 0x745c_ab28;

/// `bool_true#997275b5 = Bool;` / `bool_false#bc799737 = Bool;`, used
/// verbatim as the response shape for any call whose result is just a
/// boolean (`auth.logOut`, `upload.saveFilePart`).
struct BoolCodec;

impl ResponseCodec for BoolCodec {
    fn skip(&self, cursor: &mut Cursor) -> Result<(), CodecError> {
        bool::deserialize(cursor)?;
        Ok(())
    }

    fn fetch(&self, cursor: &mut Cursor) -> Result<DecodedValue, CodecError> {
        Ok(DecodedValue::new(bool::deserialize(cursor)?))
    }
}

/// A single datacenter entry inside a `Config` response (S1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DcOptionRecord {
    pub id: i32,
    pub ip_address: String,
    pub port: i32,
}

impl Serializable for DcOptionRecord {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        DC_OPTION_ID.serialize(buf);
        self.id.serialize(buf);
        self.ip_address.serialize(buf);
        self.port.serialize(buf);
    }
}

impl Deserializable for DcOptionRecord {
    fn deserialize(buf: &mut Cursor) -> Result<Self, mtp_wire::DeserializeError> {
        let constructor_id = u32::deserialize(buf)?;
        if constructor_id != DC_OPTION_ID {
            return Err(mtp_wire::DeserializeError::UnexpectedConstructor { id: constructor_id });
        }
        Ok(Self {
            id: i32::deserialize(buf)?,
            ip_address: String::deserialize(buf)?,
            port: i32::deserialize(buf)?,
        })
    }
}

/// The response to `help.getConfig` (S1): the datacenter directory a
/// fresh `UserAgent` otherwise only knows from
/// [`mtp_session::known_dc_options`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub dc_options: Vec<DcOptionRecord>,
}

impl Serializable for Config {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        CONFIG_ID.serialize(buf);
        (self.dc_options.len() as i32).serialize(buf);
        for option in &self.dc_options {
            option.serialize(buf);
        }
    }
}

struct ConfigCodec;

impl ResponseCodec for ConfigCodec {
    fn skip(&self, cursor: &mut Cursor) -> Result<(), CodecError> {
        let constructor_id = u32::deserialize(cursor)?;
        if constructor_id != CONFIG_ID {
            return Err(mtp_wire::DeserializeError::UnexpectedConstructor { id: constructor_id }.into());
        }
        let len = i32::deserialize(cursor)?;
        for _ in 0..len {
            DcOptionRecord::deserialize(cursor)?;
        }
        Ok(())
    }

    fn fetch(&self, cursor: &mut Cursor) -> Result<DecodedValue, CodecError> {
        u32::deserialize(cursor)?;
        let len = i32::deserialize(cursor)?;
        let mut dc_options = Vec::with_capacity(len.max(0) as usize);
        for _ in 0..len {
            dc_options.push(DcOptionRecord::deserialize(cursor)?);
        }
        Ok(DecodedValue::new(Config { dc_options }))
    }
}

/// Build a `help.getConfig` query. Ordinary call: no special exec
/// option, default timeout.
pub fn help_get_config(
    ua: &Rc<UserAgent>,
    mut on_result: impl FnMut(Config) + 'static,
    mut on_error: impl FnMut(i32, String) + 'static,
) -> QueryHandle {
    let mut body = Vec::new();
    HELP_GET_CONFIG_ID.serialize(&mut body);

    let hooks = QueryHooks {
        on_answer: Box::new(move |decoded| match decoded.downcast::<Config>() {
            Ok(config) => on_result(config),
            Err(_) => log::error!("help.getConfig: response codec produced the wrong type"),
        }),
        on_error: Box::new(move |code, text| on_error(code, text)),
        ..Default::default()
    };

    Query::new(ua, "help.getConfig", Box::new(ConfigCodec), body, hooks)
}

/// The three ways a login code may be delivered, mirroring
/// `auth.sentCodeType*` from the real schema.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SentCodeKind {
    App,
    Sms,
    Call,
}

impl SentCodeKind {
    fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(Self::App),
            1 => Some(Self::Sms),
            2 => Some(Self::Call),
            _ => None,
        }
    }
}

/// The response to `auth.sendCode` (S2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentCode {
    pub kind: SentCodeKind,
    pub phone_code_hash: String,
}

impl Serializable for SentCode {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        AUTH_SENT_CODE_ID.serialize(buf);
        (self.kind as i32).serialize(buf);
        self.phone_code_hash.serialize(buf);
    }
}

struct SentCodeCodec;

impl ResponseCodec for SentCodeCodec {
    fn skip(&self, cursor: &mut Cursor) -> Result<(), CodecError> {
        let constructor_id = u32::deserialize(cursor)?;
        if constructor_id != AUTH_SENT_CODE_ID {
            return Err(mtp_wire::DeserializeError::UnexpectedConstructor { id: constructor_id }.into());
        }
        i32::deserialize(cursor)?;
        String::deserialize(cursor)?;
        Ok(())
    }

    fn fetch(&self, cursor: &mut Cursor) -> Result<DecodedValue, CodecError> {
        u32::deserialize(cursor)?;
        let tag = i32::deserialize(cursor)?;
        let kind = SentCodeKind::from_tag(tag).ok_or(
            mtp_wire::DeserializeError::UnexpectedConstructor { id: tag as u32 },
        )?;
        let phone_code_hash = String::deserialize(cursor)?;
        Ok(DecodedValue::new(SentCode {
            kind,
            phone_code_hash,
        }))
    }
}

/// Build an `auth.sendCode` query. `is_login`, exempting it from the
/// pending gate's logged-in precondition (spec §4.3) — it is how a
/// fresh user agent first becomes logged in.
pub fn auth_send_code(
    ua: &Rc<UserAgent>,
    phone_number: &str,
    mut on_result: impl FnMut(SentCode) + 'static,
    mut on_error: impl FnMut(i32, String) + 'static,
) -> QueryHandle {
    let mut body = Vec::new();
    AUTH_SEND_CODE_ID.serialize(&mut body);
    phone_number.to_string().serialize(&mut body);

    let hooks = QueryHooks {
        on_answer: Box::new(move |decoded| match decoded.downcast::<SentCode>() {
            Ok(sent_code) => on_result(sent_code),
            Err(_) => log::error!("auth.sendCode: response codec produced the wrong type"),
        }),
        on_error: Box::new(move |code, text| on_error(code, text)),
        ..Default::default()
    };

    Query::new(ua, "auth.sendCode", Box::new(SentCodeCodec), body, hooks)
}

/// Build an `auth.logOut` query. `is_logout`: per spec §4.2 / S4, the
/// server acks it and closes the socket rather than replying, so
/// `Query::ack` synthesizes the `true` result this factory's codec
/// never actually has to decode off the wire.
pub fn auth_log_out(
    ua: &Rc<UserAgent>,
    mut on_result: impl FnMut(bool) + 'static,
) -> QueryHandle {
    let mut body = Vec::new();
    AUTH_LOG_OUT_ID.serialize(&mut body);

    let hooks = QueryHooks {
        on_answer: Box::new(move |decoded| match decoded.downcast::<bool>() {
            Ok(success) => on_result(success),
            Err(_) => log::error!("auth.logOut: response codec produced the wrong type"),
        }),
        ..Default::default()
    };

    Query::new(ua, "auth.logOut", Box::new(BoolCodec), body, hooks)
}

/// The response to `messages.sendMessage` (S3), trimmed from the real
/// `Updates` union down to the one field this demo cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub id: i64,
    pub date: i32,
}

impl Serializable for SentMessage {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        SENT_MESSAGE_ID.serialize(buf);
        self.id.serialize(buf);
        self.date.serialize(buf);
    }
}

struct SentMessageCodec;

impl ResponseCodec for SentMessageCodec {
    fn skip(&self, cursor: &mut Cursor) -> Result<(), CodecError> {
        let constructor_id = u32::deserialize(cursor)?;
        if constructor_id != SENT_MESSAGE_ID {
            return Err(mtp_wire::DeserializeError::UnexpectedConstructor { id: constructor_id }.into());
        }
        i64::deserialize(cursor)?;
        i32::deserialize(cursor)?;
        Ok(())
    }

    fn fetch(&self, cursor: &mut Cursor) -> Result<DecodedValue, CodecError> {
        u32::deserialize(cursor)?;
        let id = i64::deserialize(cursor)?;
        let date = i32::deserialize(cursor)?;
        Ok(DecodedValue::new(SentMessage { id, date }))
    }
}

/// Build a `messages.sendMessage` query.
pub fn messages_send_message(
    ua: &Rc<UserAgent>,
    peer_id: i64,
    text: &str,
    mut on_result: impl FnMut(SentMessage) + 'static,
    mut on_error: impl FnMut(i32, String) + 'static,
) -> QueryHandle {
    let mut body = Vec::new();
    MESSAGES_SEND_MESSAGE_ID.serialize(&mut body);
    peer_id.serialize(&mut body);
    text.to_string().serialize(&mut body);

    let hooks = QueryHooks {
        on_answer: Box::new(move |decoded| match decoded.downcast::<SentMessage>() {
            Ok(sent) => on_result(sent),
            Err(_) => log::error!("messages.sendMessage: response codec produced the wrong type"),
        }),
        on_error: Box::new(move |code, text| on_error(code, text)),
        ..Default::default()
    };

    Query::new(
        ua,
        "messages.sendMessage",
        Box::new(SentMessageCodec),
        body,
        hooks,
    )
}

/// File transfers get a longer timeout interval than ordinary RPCs
/// (spec §4.6).
const FILE_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// Build an `upload.saveFilePart` query. `is_file_transfer`: the pending
/// gate and timeout interval both treat it differently from an ordinary
/// call (spec §3, §4.6), and it is the call S5's cancellation scenario
/// exercises.
pub fn upload_save_file_part(
    ua: &Rc<UserAgent>,
    file_id: i64,
    file_part: i32,
    bytes: Vec<u8>,
    mut on_result: impl FnMut(bool) + 'static,
    mut on_error: impl FnMut(i32, String) + 'static,
) -> QueryHandle {
    let mut body = Vec::new();
    UPLOAD_SAVE_FILE_PART_ID.serialize(&mut body);
    file_id.serialize(&mut body);
    file_part.serialize(&mut body);
    bytes.serialize(&mut body);

    let hooks = QueryHooks {
        on_answer: Box::new(move |decoded| match decoded.downcast::<bool>() {
            Ok(success) => on_result(success),
            Err(_) => log::error!("upload.saveFilePart: response codec produced the wrong type"),
        }),
        on_error: Box::new(move |code, text| on_error(code, text)),
        timeout_interval: Box::new(|| FILE_TRANSFER_TIMEOUT),
        ..Default::default()
    };

    Query::new(ua, "upload.saveFilePart", Box::new(BoolCodec), body, hooks)
}

/// The response to `users.getFullUser`, trimmed to the identifier: the
/// password-recovery flow only fires this as a probe to confirm the
/// new session is actually usable (spec §4.5's `SESSION_PASSWORD_NEEDED`
/// row), it never inspects the full profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserFull {
    pub id: i64,
}

impl Serializable for UserFull {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        USER_FULL_ID.serialize(buf);
        self.id.serialize(buf);
    }
}

struct UserFullCodec;

impl ResponseCodec for UserFullCodec {
    fn skip(&self, cursor: &mut Cursor) -> Result<(), CodecError> {
        let constructor_id = u32::deserialize(cursor)?;
        if constructor_id != USER_FULL_ID {
            return Err(mtp_wire::DeserializeError::UnexpectedConstructor { id: constructor_id }.into());
        }
        i64::deserialize(cursor)?;
        Ok(())
    }

    fn fetch(&self, cursor: &mut Cursor) -> Result<DecodedValue, CodecError> {
        u32::deserialize(cursor)?;
        let id = i64::deserialize(cursor)?;
        Ok(DecodedValue::new(UserFull { id }))
    }
}

/// Build the `users.getFullUser(self)` probe query
/// (`UserAgent::handle_session_password_needed`'s post-unlock check).
/// `self_user_id` is `0` for the synthetic "myself" input used here;
/// a real schema would encode `inputUserSelf` instead of an id.
pub fn users_get_full_user_self(
    ua: &Rc<UserAgent>,
    mut on_result: impl FnMut(UserFull) + 'static,
) -> QueryHandle {
    let mut body = Vec::new();
    USERS_GET_FULL_USER_ID.serialize(&mut body);

    let hooks = QueryHooks {
        on_answer: Box::new(move |decoded| match decoded.downcast::<UserFull>() {
            Ok(user) => on_result(user),
            Err(_) => log::error!("users.getFullUser: response codec produced the wrong type"),
        }),
        ..Default::default()
    };

    Query::new(ua, "users.getFullUser", Box::new(UserFullCodec), body, hooks)
}

/// Register the `users.getFullUser(self)` probe to fire automatically
/// every time the password-recovery flow unlocks
/// (`UserAgent::on_password_verified`), the wiring spec §4.5's
/// `SESSION_PASSWORD_NEEDED` row describes but leaves to the host.
pub fn wire_password_probe(ua: &Rc<UserAgent>) {
    let weak = Rc::downgrade(ua);
    ua.on_password_verified(move || {
        let Some(ua) = weak.upgrade() else { return };
        let query = users_get_full_user_self(&ua, |user| {
            log::info!("post-password probe confirmed user {}", user.id);
        });
        Query::execute(&query, ua.active_connection(), ExecOption::Force);
    });
}
