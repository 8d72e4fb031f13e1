//! 领域事件定义
//!
//! 事件总线上流转的事件是封闭的枚举：每个主题对应一个变体，字段集合即契约。

pub mod hub_event;

pub use hub_event::{HubEvent, Topic};
