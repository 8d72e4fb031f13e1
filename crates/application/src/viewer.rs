//! 频道浏览者管理
//!
//! 每个 WebSocket 会话最多对应一个浏览记录。三个索引（频道、用户、会话 key）
//! 由同一把写锁保护；总线事件在持锁期间发布，保证发布的快照与已提交状态一致。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use domain::{
    ChannelId, ChannelViewers, HubEvent, StateWithChannel, StateWithTime, Timestamp, UserId,
    ViewState,
};
use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::hub::Hub;

#[derive(Debug, Clone)]
struct Viewer {
    conn_key: String,
    user_id: UserId,
    channel_id: ChannelId,
    state: ViewState,
    updated_at: Timestamp,
}

#[derive(Default)]
struct ViewerIndex {
    channels: HashMap<ChannelId, HashSet<String>>,
    users: HashMap<UserId, HashSet<String>>,
    viewers: HashMap<String, Viewer>,
}

impl ViewerIndex {
    fn channel_viewers(&self, channel_id: ChannelId) -> ChannelViewers {
        let mut result = ChannelViewers::new();
        let Some(keys) = self.channels.get(&channel_id) else {
            return result;
        };
        for viewer in keys.iter().filter_map(|k| self.viewers.get(k)) {
            let higher = result
                .get(&viewer.user_id)
                .map(|s| s.state < viewer.state)
                .unwrap_or(true);
            if higher {
                result.insert(
                    viewer.user_id,
                    StateWithTime {
                        state: viewer.state,
                        time: viewer.updated_at,
                    },
                );
            }
        }
        result
    }

    fn user_view_states(&self, user_id: UserId) -> HashMap<String, StateWithChannel> {
        self.users
            .get(&user_id)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| self.viewers.get(k))
                    .map(|v| {
                        (
                            v.conn_key.clone(),
                            StateWithChannel {
                                state: v.state,
                                channel_id: v.channel_id,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub struct ViewerManager {
    index: RwLock<ViewerIndex>,
    hub: Arc<Hub>,
    clock: Arc<dyn Clock>,
}

impl ViewerManager {
    pub fn new(hub: Arc<Hub>, clock: Arc<dyn Clock>) -> Self {
        Self {
            index: RwLock::new(ViewerIndex::default()),
            hub,
            clock,
        }
    }

    /// 设置会话的浏览状态
    pub fn set_viewer(
        &self,
        key: &str,
        conn_key: &str,
        user_id: UserId,
        channel_id: ChannelId,
        state: ViewState,
    ) {
        let now = self.clock.now();
        let mut index = self.index.write();

        match index.viewers.get(key).cloned() {
            Some(existing) if existing.channel_id == channel_id => {
                if existing.state == state {
                    return;
                }
                if let Some(viewer) = index.viewers.get_mut(key) {
                    viewer.state = state;
                }
            }
            Some(existing) => {
                if let Some(keys) = index.channels.get_mut(&existing.channel_id) {
                    keys.remove(key);
                }
                let old_viewers = index.channel_viewers(existing.channel_id);
                self.hub.publish(HubEvent::ChannelViewersChanged {
                    channel_id: existing.channel_id,
                    viewers: old_viewers,
                });

                if let Some(viewer) = index.viewers.get_mut(key) {
                    viewer.channel_id = channel_id;
                    viewer.state = state;
                    viewer.updated_at = now;
                }
                index
                    .channels
                    .entry(channel_id)
                    .or_default()
                    .insert(key.to_string());
            }
            None => {
                index.viewers.insert(
                    key.to_string(),
                    Viewer {
                        conn_key: conn_key.to_string(),
                        user_id,
                        channel_id,
                        state,
                        updated_at: now,
                    },
                );
                index
                    .channels
                    .entry(channel_id)
                    .or_default()
                    .insert(key.to_string());
                index.users.entry(user_id).or_default().insert(key.to_string());
            }
        }

        self.hub.publish(HubEvent::UserViewStateChanged {
            user_id,
            view_states: index.user_view_states(user_id),
        });
        self.hub.publish(HubEvent::ChannelViewersChanged {
            channel_id,
            viewers: index.channel_viewers(channel_id),
        });
    }

    /// 移除会话的浏览状态，不存在时什么也不做
    pub fn remove_viewer(&self, key: &str) {
        let mut index = self.index.write();
        let Some(viewer) = index.viewers.remove(key) else {
            return;
        };
        if let Some(keys) = index.channels.get_mut(&viewer.channel_id) {
            keys.remove(key);
        }
        if let Some(keys) = index.users.get_mut(&viewer.user_id) {
            keys.remove(key);
        }

        self.hub.publish(HubEvent::UserViewStateChanged {
            user_id: viewer.user_id,
            view_states: index.user_view_states(viewer.user_id),
        });
        self.hub.publish(HubEvent::ChannelViewersChanged {
            channel_id: viewer.channel_id,
            viewers: index.channel_viewers(viewer.channel_id),
        });
    }

    /// user -> (该用户所有会话中最高的状态, 更新时间)
    pub fn get_channel_viewers(&self, channel_id: ChannelId) -> ChannelViewers {
        self.index.read().channel_viewers(channel_id)
    }

    pub fn viewer_count(&self) -> usize {
        self.index.read().viewers.len()
    }

    /// 清理空的频道、用户桶
    pub fn gc(&self) -> usize {
        let mut index = self.index.write();
        let before = index.channels.len() + index.users.len();
        index.channels.retain(|_, keys| !keys.is_empty());
        index.users.retain(|_, keys| !keys.is_empty());
        before - (index.channels.len() + index.users.len())
    }

    pub fn spawn_gc(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let removed = manager.gc();
                if removed > 0 {
                    tracing::debug!(removed, "清理空的浏览者索引");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use domain::Topic;

    fn manager() -> (Arc<ViewerManager>, Arc<Hub>) {
        let hub = Arc::new(Hub::new());
        let manager = Arc::new(ViewerManager::new(hub.clone(), Arc::new(SystemClock)));
        (manager, hub)
    }

    #[test]
    fn higher_state_wins_across_sessions() {
        let (viewers, _hub) = manager();
        let user = UserId::generate();
        let channel = ChannelId::generate();

        viewers.set_viewer("s1", "s1", user, channel, ViewState::Monitoring);
        viewers.set_viewer("s2", "s2", user, channel, ViewState::Editing);
        assert_eq!(viewers.get_channel_viewers(channel)[&user].state, ViewState::Editing);

        viewers.remove_viewer("s2");
        assert_eq!(
            viewers.get_channel_viewers(channel)[&user].state,
            ViewState::Monitoring
        );

        viewers.remove_viewer("s1");
        assert!(viewers.get_channel_viewers(channel).is_empty());
        viewers.remove_viewer("s1");
    }

    #[test]
    fn moving_channel_notifies_old_then_new() {
        let (viewers, hub) = manager();
        let mut sub = hub.subscribe(16, &[Topic::ChannelViewersChanged]);
        let user = UserId::generate();
        let (a, b) = (ChannelId::generate(), ChannelId::generate());

        viewers.set_viewer("s1", "s1", user, a, ViewState::Monitoring);
        viewers.set_viewer("s1", "s1", user, b, ViewState::Monitoring);

        let mut order = Vec::new();
        while let Some(HubEvent::ChannelViewersChanged { channel_id, viewers }) = sub.try_recv() {
            order.push((channel_id, viewers.len()));
        }
        assert_eq!(order, vec![(a, 1), (a, 0), (b, 1)]);
    }

    #[test]
    fn unchanged_state_publishes_nothing() {
        let (viewers, hub) = manager();
        let user = UserId::generate();
        let channel = ChannelId::generate();
        viewers.set_viewer("s1", "s1", user, channel, ViewState::Editing);

        let mut sub = hub.subscribe(16, &[]);
        viewers.set_viewer("s1", "s1", user, channel, ViewState::Editing);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn view_states_are_keyed_by_connection() {
        let (viewers, hub) = manager();
        let mut sub = hub.subscribe(16, &[Topic::UserViewStateChanged]);
        let user = UserId::generate();
        let channel = ChannelId::generate();
        viewers.set_viewer("s1", "conn-1", user, channel, ViewState::StaleViewing);

        match sub.try_recv() {
            Some(HubEvent::UserViewStateChanged { view_states, .. }) => {
                assert_eq!(view_states["conn-1"].state, ViewState::StaleViewing);
                assert_eq!(view_states["conn-1"].channel_id, channel);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn time_tracks_channel_entry_not_state_changes() {
        let hub = Arc::new(Hub::new());
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let viewers = ViewerManager::new(hub, clock.clone());
        let user = UserId::generate();
        let (a, b) = (ChannelId::generate(), ChannelId::generate());

        viewers.set_viewer("s1", "s1", user, a, ViewState::Monitoring);
        let entered = viewers.get_channel_viewers(a)[&user].time;

        clock.advance(chrono::Duration::seconds(5));
        viewers.set_viewer("s1", "s1", user, a, ViewState::Editing);
        assert_eq!(viewers.get_channel_viewers(a)[&user].time, entered);

        viewers.set_viewer("s1", "s1", user, b, ViewState::Editing);
        assert_eq!(
            viewers.get_channel_viewers(b)[&user].time,
            entered + chrono::Duration::seconds(5)
        );
    }

    #[test]
    fn gc_drops_empty_buckets() {
        let (viewers, _hub) = manager();
        let user = UserId::generate();
        viewers.set_viewer("s1", "s1", user, ChannelId::generate(), ViewState::None);
        viewers.remove_viewer("s1");
        assert_eq!(viewers.gc(), 2);
        assert_eq!(viewers.viewer_count(), 0);
    }
}
