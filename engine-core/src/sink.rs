//! Message sink & broadcast discipline.
//!
//! The sink is the opaque outgoing half of the ingress/egress boundary: the
//! message-rendering backend itself (how text actually reaches a chat
//! platform) is out of scope, the engine only ever talks to the three
//! primitives below. A composed reply is acquired as a [`ScopedSender`] that
//! buffers text and flushes exactly once when the scope ends; an explicit
//! [`ScopedSender::release`] discards the buffer instead, for the case where
//! a composed reply turns out to say nothing.

use engine_protocol::{GroupId, UserId};
use std::fmt::Write as _;
use std::sync::Arc;

/// The three egress primitives a hosting process supplies. Implementations
/// are assumed concurrency-safe; the engine holds no sink-wide lock.
pub trait MessageSink: Send + Sync {
    fn tell_user(&self, user: UserId, text: &str);
    fn post_to_group(&self, group: GroupId, text: &str);
    /// Renders an at-mention for `user` inside `group`, formatted the way the
    /// ingress platform expects.
    fn at_mention(&self, group: GroupId, user: UserId) -> String;
}

enum FlushTarget {
    Group(Arc<dyn MessageSink>, GroupId),
    Users(Arc<dyn MessageSink>, Vec<UserId>),
}

/// A buffered reply in progress. Accumulate text with [`std::fmt::Write`]
/// (`write!(sender, "...")`) or [`ScopedSender::push_str`]; the buffer flushes
/// exactly once, on drop, unless [`ScopedSender::release`] is called first.
pub struct ScopedSender {
    buffer: String,
    target: FlushTarget,
    released: bool,
}

impl ScopedSender {
    pub fn push_str(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Discards the buffer without sending. Used when a composed reply turns
    /// out to say nothing.
    pub fn release(mut self) {
        self.released = true;
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        match &self.target {
            FlushTarget::Group(sink, group) => sink.post_to_group(*group, &self.buffer),
            FlushTarget::Users(sink, users) => {
                for user in users {
                    sink.tell_user(*user, &self.buffer);
                }
            }
        }
    }
}

impl std::fmt::Write for ScopedSender {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.buffer.push_str(s);
        Ok(())
    }
}

impl Drop for ScopedSender {
    fn drop(&mut self) {
        if !self.released {
            self.flush();
        }
    }
}

/// A match's broadcast discipline: *group-scoped* (one public post reaches
/// everyone) when the match has a group id, *batched per-participant* (one
/// tell per non-LEFT participant) otherwise. Which mode applies is fixed at
/// construction from whether the match is private; the live participant list
/// is re-read from `active_participants` every time a sender is acquired, so
/// a batched broadcast always reaches whoever is active *now*.
pub struct BroadcastSender {
    sink: Arc<dyn MessageSink>,
    group: Option<GroupId>,
    active_participants: Box<dyn Fn() -> Vec<UserId> + Send + Sync>,
}

impl BroadcastSender {
    pub fn group_scoped(
        sink: Arc<dyn MessageSink>,
        group: GroupId,
        active_participants: impl Fn() -> Vec<UserId> + Send + Sync + 'static,
    ) -> Self {
        BroadcastSender {
            sink,
            group: Some(group),
            active_participants: Box::new(active_participants),
        }
    }

    pub fn batched(
        sink: Arc<dyn MessageSink>,
        active_participants: impl Fn() -> Vec<UserId> + Send + Sync + 'static,
    ) -> Self {
        BroadcastSender {
            sink,
            group: None,
            active_participants: Box::new(active_participants),
        }
    }

    fn target(&self) -> FlushTarget {
        match self.group {
            Some(group) => FlushTarget::Group(self.sink.clone(), group),
            None => FlushTarget::Users(self.sink.clone(), (self.active_participants)()),
        }
    }

    /// Acquires a fresh scoped sender for one composed reply.
    pub fn scoped(&self) -> ScopedSender {
        ScopedSender {
            buffer: String::new(),
            target: self.target(),
            released: false,
        }
    }

    /// As [`Self::scoped`], but for group matches prefixes the body with an
    /// at-mention of every currently-active participant. Private (batched)
    /// matches have no use for mentions — every tell already goes straight
    /// to its recipient — so this degrades to a plain [`Self::scoped`] there.
    pub fn scoped_at_all(&self) -> ScopedSender {
        let mut sender = self.scoped();
        if let Some(group) = self.group {
            for user in (self.active_participants)() {
                let _ = write!(sender, "{} ", self.sink.at_mention(group, user));
            }
        }
        sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        tells: Mutex<Vec<(UserId, String)>>,
        posts: Mutex<Vec<(GroupId, String)>>,
    }

    impl MessageSink for RecordingSink {
        fn tell_user(&self, user: UserId, text: &str) {
            self.tells.lock().unwrap().push((user, text.to_string()));
        }
        fn post_to_group(&self, group: GroupId, text: &str) {
            self.posts.lock().unwrap().push((group, text.to_string()));
        }
        fn at_mention(&self, _group: GroupId, user: UserId) -> String {
            format!("@{}", user.0)
        }
    }

    #[test]
    fn group_scoped_flushes_exactly_once_on_drop() {
        let sink = Arc::new(RecordingSink::default());
        let broadcast = BroadcastSender::group_scoped(sink.clone(), GroupId(1), || vec![]);
        {
            let mut sender = broadcast.scoped();
            sender.push_str("hello");
        }
        assert_eq!(sink.posts.lock().unwrap().len(), 1);
        assert_eq!(sink.posts.lock().unwrap()[0].1, "hello");
    }

    #[test]
    fn release_discards_the_buffer() {
        let sink = Arc::new(RecordingSink::default());
        let broadcast = BroadcastSender::group_scoped(sink.clone(), GroupId(1), || vec![]);
        let mut sender = broadcast.scoped();
        sender.push_str("never sent");
        sender.release();
        assert!(sink.posts.lock().unwrap().is_empty());
    }

    #[test]
    fn batched_tells_every_active_participant() {
        let sink = Arc::new(RecordingSink::default());
        let broadcast = BroadcastSender::batched(sink.clone(), || vec![UserId(1), UserId(2)]);
        {
            let mut sender = broadcast.scoped();
            sender.push_str("hi");
        }
        let tells = sink.tells.lock().unwrap();
        assert_eq!(tells.len(), 2);
    }

    #[test]
    fn at_all_prefixes_mentions_only_for_group_matches() {
        let sink = Arc::new(RecordingSink::default());
        let broadcast = BroadcastSender::group_scoped(sink.clone(), GroupId(7), || {
            vec![UserId(1), UserId(2)]
        });
        {
            let mut sender = broadcast.scoped_at_all();
            sender.push_str("starting");
        }
        let posts = sink.posts.lock().unwrap();
        assert_eq!(posts[0].1, "@1 @2 starting");

        let sink2 = Arc::new(RecordingSink::default());
        let batched = BroadcastSender::batched(sink2.clone(), || vec![UserId(3)]);
        {
            let mut sender = batched.scoped_at_all();
            sender.push_str("starting");
        }
        assert_eq!(sink2.tells.lock().unwrap()[0].1, "starting");
    }
}
