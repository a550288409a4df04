//! Console transport.
//!
//! A stdin/stdout stand-in for a real chat surface: threads become
//! numbered channels, thread output is prefixed with the channel number,
//! and plain terminal lines are routed to the most recently opened live
//! thread.

use async_trait::async_trait;
use kotoba_core::message::{ChannelId, User};
use kotoba_core::transport::{ThreadTransport, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Channel id for top-level (non-thread) console output.
pub const LOBBY: ChannelId = ChannelId(0);

/// Console implementation of the thread transport.
///
/// Channel ids are fabricated from an incrementing counter, starting at 1
/// so [`LOBBY`] never collides with a thread.
pub struct ConsoleTransport {
    next_channel: AtomicU64,
    open: Mutex<Vec<ChannelId>>,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            next_channel: AtomicU64::new(1),
            open: Mutex::new(Vec::new()),
        }
    }

    /// The most recently opened thread that is still live.
    pub fn latest_open(&self) -> Option<ChannelId> {
        self.open_list().last().copied()
    }

    pub fn is_open(&self, channel: ChannelId) -> bool {
        self.open_list().contains(&channel)
    }

    fn open_list(&self) -> MutexGuard<'_, Vec<ChannelId>> {
        // A panic while holding the lock cannot leave the list half
        // mutated, so recover instead of propagating the poison.
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThreadTransport for ConsoleTransport {
    async fn open_thread(&self, user: &User, title: &str) -> Result<ChannelId, TransportError> {
        let channel = ChannelId(self.next_channel.fetch_add(1, Ordering::SeqCst));
        self.open_list().push(channel);
        println!("─── #{channel} 「{title}」已開啟（{}） ───", user.name);
        Ok(channel)
    }

    async fn send(&self, channel: ChannelId, text: &str) -> Result<(), TransportError> {
        if channel == LOBBY {
            println!("{text}");
            return Ok(());
        }
        if !self.is_open(channel) {
            return Err(TransportError::ChannelNotFound(channel));
        }
        println!("[#{channel}] {text}");
        Ok(())
    }

    async fn close_thread(&self, channel: ChannelId) -> Result<(), TransportError> {
        let mut open = self.open_list();
        let Some(pos) = open.iter().position(|c| *c == channel) else {
            return Err(TransportError::ChannelNotFound(channel));
        };
        open.remove(pos);
        println!("─── #{channel} 已關閉 ───");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kotoba_core::message::UserId;

    fn user() -> User {
        User::new(UserId(1), "tester")
    }

    #[tokio::test]
    async fn threads_get_sequential_channels_above_lobby() {
        let console = ConsoleTransport::new();
        let first = console.open_thread(&user(), "one").await.unwrap();
        let second = console.open_thread(&user(), "two").await.unwrap();
        assert_eq!(first, ChannelId(1));
        assert_eq!(second, ChannelId(2));
        assert_ne!(first, LOBBY);
    }

    #[tokio::test]
    async fn latest_open_tracks_closures() {
        let console = ConsoleTransport::new();
        assert_eq!(console.latest_open(), None);

        let first = console.open_thread(&user(), "one").await.unwrap();
        let second = console.open_thread(&user(), "two").await.unwrap();
        assert_eq!(console.latest_open(), Some(second));

        console.close_thread(second).await.unwrap();
        assert_eq!(console.latest_open(), Some(first));
    }

    #[tokio::test]
    async fn lobby_send_always_works() {
        let console = ConsoleTransport::new();
        console.send(LOBBY, "hello").await.unwrap();
    }

    #[tokio::test]
    async fn send_to_unknown_thread_fails() {
        let console = ConsoleTransport::new();
        let err = console.send(ChannelId(9), "hello").await.unwrap_err();
        assert!(matches!(err, TransportError::ChannelNotFound(ChannelId(9))));
    }

    #[tokio::test]
    async fn closed_thread_rejects_sends() {
        let console = ConsoleTransport::new();
        let channel = console.open_thread(&user(), "one").await.unwrap();
        console.send(channel, "in thread").await.unwrap();

        console.close_thread(channel).await.unwrap();
        assert!(console.send(channel, "too late").await.is_err());
        assert!(console.close_thread(channel).await.is_err());
    }
}
