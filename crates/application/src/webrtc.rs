//! WebRTC 通话状态管理
//!
//! 每个用户最多处于一个通话频道，状态归属于设置它的连接（conn key），
//! 只有该连接可以修改或清除。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::{ChannelId, DomainError, DomainResult, HubEvent, UserId, UserWebRtcState};
use parking_lot::RwLock;

use crate::hub::Hub;

struct OwnedState {
    conn_key: String,
    channel_id: ChannelId,
    sessions: HashMap<String, String>,
}

#[derive(Default)]
struct WebRtcIndex {
    users: HashMap<UserId, OwnedState>,
    channels: HashMap<ChannelId, HashSet<UserId>>,
}

impl WebRtcIndex {
    fn detach(&mut self, user_id: UserId, channel_id: ChannelId) {
        if let Some(users) = self.channels.get_mut(&channel_id) {
            users.remove(&user_id);
            if users.is_empty() {
                self.channels.remove(&channel_id);
            }
        }
    }
}

pub struct WebRtcManager {
    index: RwLock<WebRtcIndex>,
    hub: Arc<Hub>,
}

impl WebRtcManager {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            index: RwLock::new(WebRtcIndex::default()),
            hub,
        }
    }

    /// 设置用户的通话会话，`sessions` 为空时等同于 [`Self::reset_state`]
    pub fn set_state(
        &self,
        conn_key: &str,
        user_id: UserId,
        channel_id: ChannelId,
        sessions: HashMap<String, String>,
    ) -> DomainResult<()> {
        if sessions.is_empty() {
            return self.reset_state(conn_key, user_id);
        }

        let mut index = self.index.write();
        if let Some(current) = index.users.get(&user_id) {
            if current.conn_key != conn_key {
                return Err(DomainError::Occupied);
            }
            let previous_channel = current.channel_id;
            if previous_channel != channel_id {
                index.detach(user_id, previous_channel);
            }
        }

        index.users.insert(
            user_id,
            OwnedState {
                conn_key: conn_key.to_string(),
                channel_id,
                sessions: sessions.clone(),
            },
        );
        index.channels.entry(channel_id).or_default().insert(user_id);

        self.hub.publish(HubEvent::UserWebRtcStateChanged {
            user_id,
            channel_id,
            sessions,
        });
        Ok(())
    }

    /// 清除用户的通话状态；状态属于其他连接时返回 [`DomainError::Occupied`] 且不做修改
    pub fn reset_state(&self, conn_key: &str, user_id: UserId) -> DomainResult<()> {
        let mut index = self.index.write();
        let Some(current) = index.users.get(&user_id) else {
            return Ok(());
        };
        if current.conn_key != conn_key {
            return Err(DomainError::Occupied);
        }
        let channel_id = current.channel_id;
        index.users.remove(&user_id);
        index.detach(user_id, channel_id);

        self.hub.publish(HubEvent::UserWebRtcStateChanged {
            user_id,
            channel_id,
            sessions: HashMap::new(),
        });
        Ok(())
    }

    pub fn get_user_state(&self, user_id: UserId) -> Option<UserWebRtcState> {
        self.index
            .read()
            .users
            .get(&user_id)
            .map(|s| UserWebRtcState {
                user_id,
                channel_id: s.channel_id,
                sessions: s.sessions.clone(),
            })
    }

    /// 全部通话中频道的快照
    pub fn channel_states(&self) -> HashMap<ChannelId, Vec<UserWebRtcState>> {
        let index = self.index.read();
        index
            .channels
            .iter()
            .map(|(channel_id, users)| {
                let states = users
                    .iter()
                    .filter_map(|user_id| {
                        index.users.get(user_id).map(|s| UserWebRtcState {
                            user_id: *user_id,
                            channel_id: *channel_id,
                            sessions: s.sessions.clone(),
                        })
                    })
                    .collect();
                (*channel_id, states)
            })
            .collect()
    }

    /// (通话中的用户数, 通话中的频道数)
    pub fn gauges(&self) -> (usize, usize) {
        let index = self.index.read();
        (index.users.len(), index.channels.len())
    }
}
