//! Book catalog search engine / 图书目录搜索引擎
//!
//! Builds immutable, versioned index generations from CSV or JSON Lines
//! catalog dumps and serves paginated, ranked queries over the current one.

pub mod api;
pub mod config;
pub mod search;
pub mod state;
