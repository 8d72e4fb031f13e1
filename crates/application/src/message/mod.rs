//! 消息管理：缓存、解析与写操作

pub mod cache;
pub mod manager;
pub mod parser;

pub use cache::MessageCache;
pub use manager::MessageManager;
pub use parser::MessageParser;
