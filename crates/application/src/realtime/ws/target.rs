//! 投递目标谓词

use std::collections::HashSet;
use std::ops::Not;
use std::sync::Arc;

use domain::{ChannelId, UserId};

use super::session::Session;

/// 判断一个会话是否接收某条消息，可以用 `and`/`or`/`!` 组合
#[derive(Clone)]
pub struct Target(Arc<dyn Fn(&Session) -> bool + Send + Sync>);

impl Target {
    pub fn new(predicate: impl Fn(&Session) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    pub fn all() -> Self {
        Self::new(|_| true)
    }

    pub fn none() -> Self {
        Self::new(|_| false)
    }

    pub fn user(user_id: UserId) -> Self {
        Self::new(move |s| s.user_id() == user_id)
    }

    pub fn users(user_ids: impl IntoIterator<Item = UserId>) -> Self {
        let set: HashSet<UserId> = user_ids.into_iter().collect();
        Self::new(move |s| set.contains(&s.user_id()))
    }

    pub fn user_sets(sets: Vec<HashSet<UserId>>) -> Self {
        Self::new(move |s| sets.iter().any(|set| set.contains(&s.user_id())))
    }

    /// 当前正在浏览该频道的会话
    pub fn channel_viewers(channel_id: ChannelId) -> Self {
        Self::new(move |s| matches!(s.view_state(), Some((c, _)) if c == channel_id))
    }

    pub fn channels_viewers(channel_ids: impl IntoIterator<Item = ChannelId>) -> Self {
        let set: HashSet<ChannelId> = channel_ids.into_iter().collect();
        Self::new(move |s| matches!(s.view_state(), Some((c, _)) if set.contains(&c)))
    }

    pub fn timeline_streaming_enabled() -> Self {
        Self::new(|s| s.timeline_streaming())
    }

    pub fn and(self, other: Target) -> Self {
        Self::new(move |s| self.matches(s) && other.matches(s))
    }

    pub fn or(self, other: Target) -> Self {
        Self::new(move |s| self.matches(s) || other.matches(s))
    }

    pub fn matches(&self, session: &Session) -> bool {
        (self.0)(session)
    }
}

impl Not for Target {
    type Output = Target;

    fn not(self) -> Self::Output {
        Target::new(move |s| !self.matches(s))
    }
}
