//! 基础设施层实现。
//!
//! 提供内存仓储、PostgreSQL 仓储和 HTTP 推送服务商，实现应用层定义的接口。

pub mod http_push;
pub mod memory;
pub mod pg;

pub use http_push::HttpPushProvider;
pub use memory::MemoryRepository;
pub use pg::{create_pg_pool, PgDeviceRepository, PgUnreadRepository, MIGRATOR};
