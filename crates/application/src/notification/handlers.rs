//! 各事件的处理逻辑

use std::collections::{HashMap, HashSet};

use domain::{
    viewers_to_entries, Channel, ChannelId, DomainError, HubEvent, Message, MessageId,
    ParsedMessage, RepositoryError, User, UserId, ViewState,
};
use serde_json::{json, Value};

use super::NotificationService;
use crate::error::ApplicationError;
use crate::push::Payload;
use crate::realtime::{SseEvent, Target};

type HandlerResult = Result<(), ApplicationError>;

/// 新消息的投递对象
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Recipients {
    /// 推送与 WebSocket 通知
    pub notified: HashSet<UserId>,
    /// 写入未读
    pub marked: HashSet<UserId>,
    /// 未读需要强调显示
    pub noticeable: HashSet<UserId>,
    /// 自己的消息被引用
    pub cited: HashSet<UserId>,
    /// 私聊频道成员
    pub members: Vec<UserId>,
}

impl Recipients {
    fn mention(&mut self, user_id: UserId) {
        self.notified.insert(user_id);
        self.marked.insert(user_id);
        self.noticeable.insert(user_id);
    }

    /// 正在浏览频道的用户不需要未读和推送；发帖人不会有自己消息的未读
    pub(crate) fn deduct(&mut self, viewing: &HashSet<UserId>, poster: UserId) {
        self.marked.retain(|u| !viewing.contains(u) && *u != poster);
        self.notified.retain(|u| !viewing.contains(u) && *u != poster);
    }

    fn unread_targets(&self) -> HashMap<UserId, bool> {
        self.marked
            .iter()
            .map(|u| (*u, self.noticeable.contains(u)))
            .collect()
    }
}

impl NotificationService {
    pub async fn handle(&self, event: HubEvent) -> HandlerResult {
        match event {
            HubEvent::MessageCreated { message, parsed } => {
                self.on_message_created(message, parsed).await
            }
            HubEvent::MessageUpdated { message, .. } => {
                self.channel_viewer_multicast(
                    message.channel_id,
                    "MESSAGE_UPDATED",
                    json!({ "id": message.id }),
                    true,
                );
                Ok(())
            }
            HubEvent::MessageDeleted { message, .. } => {
                self.channel_viewer_multicast(
                    message.channel_id,
                    "MESSAGE_DELETED",
                    json!({ "id": message.id }),
                    true,
                );
                Ok(())
            }
            HubEvent::MessagePinned {
                message_id,
                channel_id,
            } => {
                self.channel_viewer_multicast(
                    channel_id,
                    "MESSAGE_PINNED",
                    json!({ "message_id": message_id, "channel_id": channel_id }),
                    false,
                );
                Ok(())
            }
            HubEvent::MessageUnpinned {
                message_id,
                channel_id,
            } => {
                self.channel_viewer_multicast(
                    channel_id,
                    "MESSAGE_UNPINNED",
                    json!({ "message_id": message_id, "channel_id": channel_id }),
                    false,
                );
                Ok(())
            }
            HubEvent::MessageStamped {
                message_id,
                user_id,
                stamp_id,
                count,
                created_at,
            } => {
                let body = json!({
                    "message_id": message_id,
                    "user_id": user_id,
                    "stamp_id": stamp_id,
                    "count": count,
                    "created_at": created_at,
                });
                self.message_viewer_multicast(message_id, "MESSAGE_STAMPED", body)
                    .await
            }
            HubEvent::MessageUnstamped {
                message_id,
                user_id,
                stamp_id,
            } => {
                let body = json!({
                    "message_id": message_id,
                    "user_id": user_id,
                    "stamp_id": stamp_id,
                });
                self.message_viewer_multicast(message_id, "MESSAGE_UNSTAMPED", body)
                    .await
            }
            HubEvent::MessageStampsUpdated { message_id, stamps } => {
                let body = json!({ "message_id": message_id, "stamps": stamps });
                self.message_viewer_multicast(message_id, "MESSAGE_STAMPS_UPDATED", body)
                    .await
            }
            HubEvent::MessageCited { message, cited_ids } => {
                self.on_message_cited(message, cited_ids).await
            }
            HubEvent::ChannelCreated {
                channel_id,
                private,
            } => self.on_channel_event("CHANNEL_CREATED", channel_id, private).await,
            HubEvent::ChannelUpdated {
                channel_id,
                private,
            } => self.on_channel_event("CHANNEL_UPDATED", channel_id, private).await,
            HubEvent::ChannelDeleted {
                channel_id,
                private,
            } => self.on_channel_event("CHANNEL_DELETED", channel_id, private).await,
            HubEvent::ChannelStared {
                user_id,
                channel_id,
            } => {
                self.multicast(&[user_id], "CHANNEL_STARED", json!({ "id": channel_id }));
                Ok(())
            }
            HubEvent::ChannelUnstared {
                user_id,
                channel_id,
            } => {
                self.multicast(&[user_id], "CHANNEL_UNSTARED", json!({ "id": channel_id }));
                Ok(())
            }
            HubEvent::ChannelRead {
                user_id,
                channel_id,
                ..
            } => {
                self.multicast(&[user_id], "MESSAGE_READ", json!({ "id": channel_id }));
                Ok(())
            }
            HubEvent::ChannelViewersChanged {
                channel_id,
                viewers,
            } => {
                let body = json!({ "id": channel_id, "viewers": viewers_to_entries(&viewers) });
                self.channel_viewer_multicast(channel_id, "CHANNEL_VIEWERS_CHANGED", body, false);
                Ok(())
            }
            HubEvent::ChannelSubscribersChanged {
                channel_id,
                subscriber_ids,
            } => {
                self.multicast(
                    &subscriber_ids,
                    "CHANNEL_SUBSCRIBERS_CHANGED",
                    json!({ "id": channel_id }),
                );
                Ok(())
            }
            HubEvent::UserCreated { user_id } => {
                self.broadcast("USER_JOINED", json!({ "id": user_id }));
                Ok(())
            }
            HubEvent::UserUpdated { user_id } => {
                self.broadcast("USER_UPDATED", json!({ "id": user_id }));
                Ok(())
            }
            HubEvent::UserIconUpdated { user_id, .. } => {
                self.broadcast("USER_ICON_UPDATED", json!({ "id": user_id }));
                Ok(())
            }
            HubEvent::UserOnline { user_id } => {
                self.broadcast("USER_ONLINE", json!({ "id": user_id }));
                Ok(())
            }
            HubEvent::UserOffline { user_id, datetime } => {
                self.broadcast("USER_OFFLINE", json!({ "id": user_id, "datetime": datetime }));
                Ok(())
            }
            HubEvent::UserViewStateChanged {
                user_id,
                view_states,
            } => {
                let mut states: Vec<Value> = view_states
                    .iter()
                    .map(|(key, s)| {
                        json!({ "key": key, "channel_id": s.channel_id, "state": s.state })
                    })
                    .collect();
                states.sort_by(|a, b| a["key"].as_str().cmp(&b["key"].as_str()));
                self.multicast(
                    &[user_id],
                    "USER_VIEWSTATE_CHANGED",
                    json!({ "view_states": states }),
                );
                Ok(())
            }
            HubEvent::UserTagsUpdated { user_id, tag_id } => {
                self.broadcast("USER_TAGS_UPDATED", json!({ "id": user_id, "tag_id": tag_id }));
                Ok(())
            }
            HubEvent::UserGroupCreated { group_id } => {
                self.broadcast("USER_GROUP_CREATED", json!({ "id": group_id }));
                Ok(())
            }
            HubEvent::UserGroupUpdated { group_id } => {
                self.broadcast("USER_GROUP_UPDATED", json!({ "id": group_id }));
                Ok(())
            }
            HubEvent::UserGroupDeleted { group_id } => {
                self.broadcast("USER_GROUP_DELETED", json!({ "id": group_id }));
                Ok(())
            }
            HubEvent::UserGroupMemberAdded { group_id, user_id } => {
                self.broadcast(
                    "USER_GROUP_MEMBER_ADDED",
                    json!({ "id": group_id, "user_id": user_id }),
                );
                Ok(())
            }
            HubEvent::UserGroupMemberRemoved { group_id, user_id } => {
                self.broadcast(
                    "USER_GROUP_MEMBER_REMOVED",
                    json!({ "id": group_id, "user_id": user_id }),
                );
                Ok(())
            }
            HubEvent::UserGroupAdminAdded { group_id, user_id } => {
                self.broadcast(
                    "USER_GROUP_ADMIN_ADDED",
                    json!({ "id": group_id, "user_id": user_id }),
                );
                Ok(())
            }
            HubEvent::UserGroupAdminRemoved { group_id, user_id } => {
                self.broadcast(
                    "USER_GROUP_ADMIN_REMOVED",
                    json!({ "id": group_id, "user_id": user_id }),
                );
                Ok(())
            }
            HubEvent::StampCreated { stamp_id } => {
                self.broadcast("STAMP_CREATED", json!({ "id": stamp_id }));
                Ok(())
            }
            HubEvent::StampUpdated { stamp_id } => {
                self.broadcast("STAMP_MODIFIED", json!({ "id": stamp_id }));
                Ok(())
            }
            HubEvent::StampDeleted { stamp_id } => {
                self.broadcast("STAMP_DELETED", json!({ "id": stamp_id }));
                Ok(())
            }
            HubEvent::StampPaletteCreated {
                user_id,
                stamp_palette_id,
            } => {
                self.multicast(&[user_id], "STAMP_PALETTE_CREATED", json!({ "id": stamp_palette_id }));
                Ok(())
            }
            HubEvent::StampPaletteUpdated {
                user_id,
                stamp_palette_id,
            } => {
                self.multicast(&[user_id], "STAMP_PALETTE_UPDATED", json!({ "id": stamp_palette_id }));
                Ok(())
            }
            HubEvent::StampPaletteDeleted {
                user_id,
                stamp_palette_id,
            } => {
                self.multicast(&[user_id], "STAMP_PALETTE_DELETED", json!({ "id": stamp_palette_id }));
                Ok(())
            }
            HubEvent::ClipFolderCreated {
                user_id,
                clip_folder_id,
            } => {
                self.multicast(&[user_id], "CLIP_FOLDER_CREATED", json!({ "id": clip_folder_id }));
                Ok(())
            }
            HubEvent::ClipFolderUpdated {
                user_id,
                clip_folder_id,
            } => {
                self.multicast(&[user_id], "CLIP_FOLDER_UPDATED", json!({ "id": clip_folder_id }));
                Ok(())
            }
            HubEvent::ClipFolderDeleted {
                user_id,
                clip_folder_id,
            } => {
                self.multicast(&[user_id], "CLIP_FOLDER_DELETED", json!({ "id": clip_folder_id }));
                Ok(())
            }
            HubEvent::ClipFolderMessageAdded {
                user_id,
                clip_folder_id,
                message_id,
            } => {
                self.multicast(
                    &[user_id],
                    "CLIP_FOLDER_MESSAGE_ADDED",
                    json!({ "folder_id": clip_folder_id, "message_id": message_id }),
                );
                Ok(())
            }
            HubEvent::ClipFolderMessageDeleted {
                user_id,
                clip_folder_id,
                message_id,
            } => {
                self.multicast(
                    &[user_id],
                    "CLIP_FOLDER_MESSAGE_DELETED",
                    json!({ "folder_id": clip_folder_id, "message_id": message_id }),
                );
                Ok(())
            }
            HubEvent::UserWebRtcStateChanged {
                user_id,
                channel_id,
                sessions,
            } => {
                let mut sessions: Vec<Value> = sessions
                    .iter()
                    .map(|(session_id, state)| json!({ "state": state, "sessionId": session_id }))
                    .collect();
                sessions.sort_by(|a, b| a["sessionId"].as_str().cmp(&b["sessionId"].as_str()));
                self.broadcast(
                    "USER_WEBRTC_STATE_CHANGED",
                    json!({ "user_id": user_id, "channel_id": channel_id, "sessions": sessions }),
                );
                Ok(())
            }
            HubEvent::MessageUnread { .. }
            | HubEvent::WsConnected { .. }
            | HubEvent::WsDisconnected { .. }
            | HubEvent::BotWsConnected { .. }
            | HubEvent::BotWsDisconnected { .. }
            | HubEvent::SseConnected { .. }
            | HubEvent::SseDisconnected { .. } => Ok(()),
        }
    }

    async fn on_message_created(&self, message: Message, parsed: ParsedMessage) -> HandlerResult {
        let channel = self.channels.get_channel(message.channel_id).await?;
        let poster = self.users.get_user(message.user_id).await?;

        let mut recipients = self.collect_recipients(&channel, &parsed).await?;
        let channel_viewers = self.viewers.get_channel_viewers(channel.id);
        let viewing: HashSet<UserId> = channel_viewers
            .iter()
            .filter(|(_, s)| s.state > ViewState::None)
            .map(|(u, _)| *u)
            .collect();
        recipients.deduct(&viewing, message.user_id);

        let unread_targets = recipients.unread_targets();
        if !unread_targets.is_empty() {
            match self
                .unreads
                .set_message_unreads(message.clone(), unread_targets.clone())
                .await
            {
                Ok(()) => {
                    for (user_id, noticeable) in unread_targets {
                        self.hub.publish(HubEvent::MessageUnread {
                            message_id: message.id,
                            channel_id: channel.id,
                            user_id,
                            noticeable,
                        });
                    }
                }
                Err(err) => {
                    tracing::error!(message_id = %message.id, error = %err, "写入未读失败");
                }
            }
        }

        let plain = json!({ "id": message.id, "is_citing": false });
        if channel.is_public {
            let connected: HashSet<UserId> = channel_viewers.keys().copied().collect();
            let target = Target::user_sets(vec![recipients.marked.clone(), connected.clone()])
                .or(Target::timeline_streaming_enabled())
                .and(!Target::users(recipients.cited.iter().copied()));
            self.ws.write_message("MESSAGE_CREATED", &plain, &target);

            let event = SseEvent::new("MESSAGE_CREATED", plain);
            for user_id in recipients
                .marked
                .union(&connected)
                .filter(|u| !recipients.cited.contains(u))
            {
                self.sse.multicast(*user_id, &event);
            }

            if !recipients.cited.is_empty() {
                let cited: Vec<UserId> = recipients.cited.iter().copied().collect();
                self.multicast(
                    &cited,
                    "MESSAGE_CREATED",
                    json!({ "id": message.id, "is_citing": true }),
                );
            }
        } else {
            self.multicast(&recipients.members, "MESSAGE_CREATED", plain);
        }

        if let Some(push) = &self.push {
            let targets: Vec<UserId> = recipients.notified.iter().copied().collect();
            if !targets.is_empty() {
                let payload = self
                    .build_payload(&channel, &poster, &parsed, push.body_max_runes())
                    .await;
                if let Err(err) = push.send(targets, &payload, true).await {
                    tracing::error!(message_id = %message.id, error = %err, "推送入队失败");
                }
            }
        }
        Ok(())
    }

    async fn collect_recipients(
        &self,
        channel: &Channel,
        parsed: &ParsedMessage,
    ) -> Result<Recipients, ApplicationError> {
        let mut r = Recipients::default();

        if channel.is_forced {
            for user_id in self.users.get_active_non_bot_user_ids().await? {
                r.mention(user_id);
            }
            return Ok(r);
        }

        if !channel.is_public {
            r.members = self.channels.get_private_channel_members(channel.id).await?;
            r.notified.extend(r.members.iter().copied());
            r.marked.extend(r.members.iter().copied());
            return Ok(r);
        }

        for subscription in self.channels.get_channel_subscriptions(channel.id).await? {
            if subscription.level.notifies() {
                r.notified.insert(subscription.user_id);
            }
            if subscription.level.marks() {
                r.marked.insert(subscription.user_id);
            }
        }

        for user_id in &parsed.mentions {
            match self.users.get_user(*user_id).await {
                Ok(user) if user.is_active() && !user.bot => r.mention(user.id),
                Ok(_) => {}
                Err(RepositoryError::NotFound) => {
                    tracing::debug!(user_id = %user_id, "提及的用户不存在");
                }
                Err(err) => return Err(err.into()),
            }
        }

        for group_id in &parsed.group_mentions {
            for user_id in self.users.get_group_member_ids(*group_id).await? {
                r.mention(user_id);
            }
        }

        for cited_id in &parsed.citations {
            let cited = match self.messages.get(*cited_id).await {
                Ok(message) => message,
                Err(DomainError::NotFound) => continue,
                Err(err) => return Err(err.into()),
            };
            let author = cited.user_id;
            r.marked.insert(author);
            r.noticeable.insert(author);
            r.cited.insert(author);
            match self.users.get_user(author).await {
                Ok(user) if user.notify_citation => {
                    r.notified.insert(author);
                }
                Ok(_) | Err(RepositoryError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(r)
    }

    async fn build_payload(
        &self,
        channel: &Channel,
        poster: &User,
        parsed: &ParsedMessage,
        max_runes: usize,
    ) -> Payload {
        let mut payload = Payload::new_message();
        payload.icon = format!(
            "{}/api/v3/public/icon/{}",
            self.origin,
            poster.name.replace('#', "%23")
        );
        payload.tag = format!("c:{}", channel.id);

        let display_name = poster.response_display_name();
        if channel.is_public {
            let path = self.channels.get_channel_path_from_id(channel.id);
            payload.title = format!("#{path}");
            payload.path = format!("/channels/{path}");
            payload.set_body_with_ellipsis(&push_body(display_name, parsed, true), max_runes);
        } else {
            payload.title = format!("@{display_name}");
            payload.path = format!("/users/{}", poster.name);
            payload.set_body_with_ellipsis(&push_body(display_name, parsed, false), max_runes);
        }

        for file_id in &parsed.attachments {
            match self.files.get_file_meta(*file_id).await {
                Ok(meta) if meta.has_thumbnail => {
                    payload.image = Some(format!(
                        "{}/api/v3/files/{}/thumbnail",
                        self.origin, file_id
                    ));
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(file_id = %file_id, error = %err, "读取附件信息失败");
                }
            }
        }
        payload
    }

    async fn on_message_cited(&self, message: Message, cited_ids: Vec<MessageId>) -> HandlerResult {
        let mut authors = Vec::new();
        for cited_id in cited_ids {
            match self.messages.get(cited_id).await {
                Ok(cited) if !authors.contains(&cited.user_id) => authors.push(cited.user_id),
                Ok(_) | Err(DomainError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.multicast(
            &authors,
            "MESSAGE_CITED",
            json!({ "message_id": message.id, "channel_id": message.channel_id }),
        );
        Ok(())
    }

    /// 公开频道广播；私聊频道逐个成员发送，并附带对方的用户 id
    async fn on_channel_event(
        &self,
        kind: &str,
        channel_id: ChannelId,
        private: bool,
    ) -> HandlerResult {
        if !private {
            self.broadcast(kind, json!({ "id": channel_id }));
            return Ok(());
        }

        let members = self.channels.get_private_channel_members(channel_id).await?;
        for member in &members {
            let other = members
                .iter()
                .find(|m| *m != member)
                .copied()
                .unwrap_or(*member);
            self.multicast(
                &[*member],
                kind,
                json!({ "id": channel_id, "dm_user_id": other }),
            );
        }
        Ok(())
    }

    fn channel_viewer_multicast(
        &self,
        channel_id: ChannelId,
        kind: &str,
        body: Value,
        with_timeline: bool,
    ) {
        let mut target = Target::channel_viewers(channel_id);
        if with_timeline && self.channels.is_public_channel(channel_id) {
            target = target.or(Target::timeline_streaming_enabled());
        }
        self.ws.write_message(kind, &body, &target);

        let event = SseEvent::new(kind, body);
        for user_id in self.viewers.get_channel_viewers(channel_id).keys() {
            self.sse.multicast(*user_id, &event);
        }
    }

    async fn message_viewer_multicast(
        &self,
        message_id: MessageId,
        kind: &str,
        body: Value,
    ) -> HandlerResult {
        let message = self.messages.get(message_id).await?;
        self.channel_viewer_multicast(message.channel_id, kind, body, false);
        Ok(())
    }
}

/// 推送正文压成一行；公开频道前面加发送者的展示名
fn push_body(display_name: &str, parsed: &ParsedMessage, public: bool) -> String {
    if public {
        format!("{display_name}: {}", parsed.one_line())
    } else {
        parsed.one_line()
    }
}
