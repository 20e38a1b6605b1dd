//! 领域实体定义

pub mod community;
pub mod conversation;
pub mod group;
pub mod message;
pub mod reaction;
pub mod user;

pub use community::*;
pub use conversation::*;
pub use group::*;
pub use message::*;
pub use reaction::*;
pub use user::*;
