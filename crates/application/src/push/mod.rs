//! 移动端推送
//!
//! [`PushClient`] 把通知展开到每个设备令牌并批量交给 [`PushProvider`]。

pub mod client;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use domain::{DevicePlatform, DeviceToken};
use serde::{Deserialize, Serialize};

pub use client::PushClient;

use crate::error::ApplicationError;

/// 上游返回的“令牌未注册”错误码
pub const UNREGISTERED: &str = "UNREGISTERED";

/// 单次批量请求的最大消息数
pub const MAX_BATCH_SIZE: usize = 500;

/// 推送内容
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub kind: String,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub path: String,
    pub tag: String,
    pub image: Option<String>,
}

impl Payload {
    pub fn new_message() -> Self {
        Self {
            kind: "new_message".to_string(),
            ..Default::default()
        }
    }

    /// 超过 `max_runes` 个字符时截断并追加 `...`
    pub fn set_body_with_ellipsis(&mut self, body: &str, max_runes: usize) {
        self.body = if body.chars().count() > max_runes {
            let mut truncated: String = body.chars().take(max_runes).collect();
            truncated.push_str("...");
            truncated
        } else {
            body.to_string()
        };
    }

    fn data(&self, unread_count: Option<u64>) -> HashMap<String, String> {
        let mut data = HashMap::from([
            ("type".to_string(), self.kind.clone()),
            ("title".to_string(), self.title.clone()),
            ("body".to_string(), self.body.clone()),
            ("path".to_string(), self.path.clone()),
            ("tag".to_string(), self.tag.clone()),
            ("icon".to_string(), self.icon.clone()),
        ]);
        if let Some(image) = &self.image {
            data.insert("image".to_string(), image.clone());
        }
        if let Some(count) = unread_count {
            data.insert("unread_count".to_string(), count.to_string());
        }
        data
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndroidConfig {
    pub priority: String,
    /// 例如 "172800s"
    pub ttl: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebpushConfig {
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnsConfig {
    pub headers: HashMap<String, String>,
    pub payload: ApnsPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnsPayload {
    pub aps: Aps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Aps {
    pub alert: ApsAlert,
    pub sound: String,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApsAlert {
    pub title: String,
    pub body: String,
}

/// 发给单个设备的推送消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub token: String,
    #[serde(skip)]
    pub platform: DevicePlatform,
    pub data: HashMap<String, String>,
    pub android: AndroidConfig,
    pub webpush: WebpushConfig,
    pub apns: ApnsConfig,
}

impl PushMessage {
    pub fn build(
        device: &DeviceToken,
        payload: &Payload,
        unread_count: Option<u64>,
        ttl: Duration,
    ) -> Self {
        let ttl_secs = ttl.as_secs();
        let expiration = Utc::now().timestamp() + ttl_secs as i64;
        Self {
            token: device.token.clone(),
            platform: device.platform,
            data: payload.data(unread_count),
            android: AndroidConfig {
                priority: "high".to_string(),
                ttl: format!("{ttl_secs}s"),
            },
            webpush: WebpushConfig {
                headers: HashMap::from([("TTL".to_string(), ttl_secs.to_string())]),
            },
            apns: ApnsConfig {
                headers: HashMap::from([(
                    "apns-expiration".to_string(),
                    expiration.to_string(),
                )]),
                payload: ApnsPayload {
                    aps: Aps {
                        alert: ApsAlert {
                            title: payload.title.clone(),
                            body: payload.body.clone(),
                        },
                        sound: "default".to_string(),
                        thread_id: payload.tag.clone(),
                        badge: unread_count,
                    },
                },
            },
        }
    }
}

/// 单条消息的发送结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl SendResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_code: None,
        }
    }

    pub fn failed(code: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code.into()),
        }
    }

    pub fn is_unregistered(&self) -> bool {
        !self.success && self.error_code.as_deref() == Some(UNREGISTERED)
    }
}

/// 推送服务商，一次请求最多 [`MAX_BATCH_SIZE`] 条；返回值与输入一一对应
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send_batch(
        &self,
        messages: Vec<PushMessage>,
    ) -> Result<Vec<SendResponse>, ApplicationError>;
}
