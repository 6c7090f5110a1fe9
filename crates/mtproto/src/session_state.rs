// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::MsgId;
use getrandom::getrandom;
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-session `msg_id`/`seq_no` bookkeeping, carried over from
/// `grammers-mtproto`'s `MTProto`/`Encrypted` state: message ids encode
/// a timestamp in the high bits so Telegram-like servers can reject
/// stale ones, and sequence numbers only advance for content-related
/// messages (spec §5 ordering guarantee).
pub struct SessionState {
    /// Seconds to add to our own clock to match the server's.
    time_offset: i32,
    /// The last `msg_id` handed out, so a clock that hasn't ticked yet
    /// doesn't produce a non-increasing one.
    last_msg_id: i64,
    /// Doubled on every content-related message, per MTProto's odd/even
    /// convention (`seq_no = 2n+1` for content-related, `2n` otherwise).
    sequence: i32,
    /// Current server salt, corrected by `bad_server_salt` notifications.
    salt: i64,
    /// Session identifier; changes whenever a fresh session is started.
    pub session_id: i64,
}

impl SessionState {
    pub fn new(session_id: i64) -> Self {
        Self {
            time_offset: 0,
            last_msg_id: 0,
            sequence: 0,
            salt: 0,
            session_id,
        }
    }

    /// Start a fresh session under a securely random identifier, the
    /// same way `grammers-mtproto`'s `Encrypted::build` mints its
    /// `client_id`: a `msg_id == 0` sentinel in the pending gate means
    /// "no preference", not "use session zero".
    pub fn new_random() -> Self {
        let mut buffer = [0u8; 8];
        getrandom(&mut buffer).expect("failed to generate a secure session id");
        Self::new(i64::from_le_bytes(buffer))
    }

    pub fn salt(&self) -> i64 {
        self.salt
    }

    pub fn set_salt(&mut self, salt: i64) {
        self.salt = salt;
    }

    pub fn seq_no(&self) -> i32 {
        self.sequence
    }

    /// Correct the time offset based on a `msg_id` known to be valid
    /// (e.g. one that came back in a `bad_msg_notification`).
    pub fn correct_time_offset(&mut self, msg_id: i64) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch")
            .as_secs() as i32;
        let correct = (msg_id >> 32) as i32;
        self.time_offset = correct - now;
    }

    /// Widen the acceptance window after a `seq_no`-too-low rejection
    /// (`bad_msg_notification` error 32).
    pub fn bump_sequence(&mut self, delta: i32) {
        self.sequence += delta;
    }

    /// Generate a new, strictly increasing `msg_id`.
    pub fn new_msg_id(&mut self) -> MsgId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch");

        let seconds = (now.as_secs() as i32 + self.time_offset) as u64;
        let nanoseconds = now.subsec_nanos() as u64;
        let mut new_msg_id = ((seconds << 32) | (nanoseconds << 2)) as i64;

        if self.last_msg_id >= new_msg_id {
            new_msg_id = self.last_msg_id + 4;
        }

        self.last_msg_id = new_msg_id;
        MsgId(new_msg_id)
    }

    /// Generate the next sequence number. Only content-related queries
    /// (actual RPC invocations, not containers/acks) bump the counter.
    pub fn new_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let result = self.sequence * 2 + 1;
            self.sequence += 1;
            result
        } else {
            self.sequence * 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_ids_strictly_increase() {
        let mut state = SessionState::new(1);
        let a = state.new_msg_id();
        let b = state.new_msg_id();
        assert!(b.0 > a.0);
    }

    #[test]
    fn content_related_seq_no_is_odd_and_advances() {
        let mut state = SessionState::new(1);
        assert_eq!(state.new_seq_no(true), 1);
        assert_eq!(state.new_seq_no(true), 3);
        assert_eq!(state.new_seq_no(false), 4);
    }

    #[test]
    fn random_sessions_are_distinct() {
        let a = SessionState::new_random();
        let b = SessionState::new_random();
        assert_ne!(a.session_id, 0);
        assert_ne!(b.session_id, 0);
        assert_ne!(a.session_id, b.session_id);
    }
}
