//! Search and index management endpoints / 搜索与索引管理接口

pub mod admin;
pub mod query;
pub mod types;
