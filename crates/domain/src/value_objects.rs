use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn nil() -> Self {
                Self(Uuid::nil())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| DomainError::invalid_argument(stringify!($name), "invalid uuid"))
            }
        }
    };
}

define_id!(
    /// 用户唯一标识。nil 表示系统用户。
    UserId
);
define_id!(
    /// 频道唯一标识。nil 表示公开频道树的根。
    ChannelId
);
define_id!(
    /// 消息唯一标识。
    MessageId
);
define_id!(
    /// 表情（スタンプ）唯一标识。
    StampId
);
define_id!(
    /// 用户组唯一标识。
    GroupId
);
define_id!(
    /// 文件唯一标识。
    FileId
);
define_id!(StampPaletteId);
define_id!(ClipFolderId);
define_id!(TagId);

impl ChannelId {
    /// 私聊频道共用的虚拟父节点
    pub const DM_ROOT: ChannelId = ChannelId(Uuid::from_u128(0xaaaaaaaa_aaaa_4aaa_aaaa_aaaaaaaaaaaa));

    pub fn is_dm_root(&self) -> bool {
        *self == Self::DM_ROOT
    }
}

/// 频道名最大长度
pub const CHANNEL_NAME_MAX_LEN: usize = 20;

/// 经过验证的频道名。
///
/// 1-20 个字符，仅允许 ASCII 字母数字与 `-`、`_`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() || value.chars().count() > CHANNEL_NAME_MAX_LEN {
            return Err(DomainError::InvalidChannelName);
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DomainError::InvalidChannelName);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 兄弟节点之间比较用的归一化名称
    pub fn folded(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.0
    }
}
