//! 频道树与频道管理器

pub mod manager;
pub mod tree;

pub use manager::ChannelManager;
pub use tree::ChannelTree;
