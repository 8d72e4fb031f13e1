//! 群聊实时推送核心领域模型
//!
//! 包含频道、消息、用户等实体，浏览状态等值类型，事件总线事件以及错误分类。

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;

#[doc(hidden)]
pub use serde_json as __serde_json;
