// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A cancellable one-shot timer, the Rust stand-in for the source
//! library's `tgl_timer_factory`. Each [`Timer`] is backed by a
//! `tokio::task::spawn_local` task on the caller's `LocalSet`, so the
//! whole event loop — Query, Connection, UserAgent and every timer it
//! starts — stays on one thread, matching the cooperative single-loop
//! model (see the module docs).
//!
//! Callbacks are expected to close over a `Weak` handle to whatever
//! they act on (typically a `Query`), not a strong one: that is what
//! breaks the `Query <-> UserAgent <-> Connection <-> Timer` reference
//! cycle the original inheritance-based design was prone to. A fired
//! timer whose `Weak` no longer upgrades simply does nothing.
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct Timer {
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    /// Start a timer that invokes `callback` once, after `delay`.
    ///
    /// Must be called from within a `LocalSet` context (a plain
    /// `#[tokio::main]` runtime does not allow `spawn_local`).
    pub fn schedule<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Cancel the timer. A no-op if it already fired or was cancelled.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}
