//! 面向浏览器客户端的 WebSocket 推送

pub mod command;
pub mod session;
pub mod streamer;
pub mod target;

pub use command::{Command, CommandError};
pub use session::{Outbound, Session};
pub use streamer::{error_frame, frame, Streamer, CLOSE_SERVICE_RESTART, CLOSE_UNSUPPORTED};
pub use target::Target;
