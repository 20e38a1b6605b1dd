//! 实时消息核心领域模型
//!
//! 包含用户身份、私聊会话、群组、消息、回应与社区进度等实体，
//! 以及相关的业务规则与Repository接口。

pub mod entities;
pub mod errors;
pub mod repositories;
pub mod services;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use repositories::*;
pub use services::*;
