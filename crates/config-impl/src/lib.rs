//! # Configuration Implementation
//!
//! 属性解析的具体实现，提供分层属性存储、各类属性来源与占位符求值。
//!
//! ## 主要组件
//!
//! - [`PropertyStore`] - 按优先级排序的属性存储
//! - [`PropertyOverlay`] - 注入序列级别的写时复制覆盖层
//! - [`MapPropertySource`] - 内存属性来源
//! - [`EnvironmentPropertySource`] - 环境变量属性来源
//! - [`FilePropertySource`] - TOML / JSON 文件属性来源

mod placeholder;
pub mod providers;
pub mod store;

pub use placeholder::compile_matcher;
pub use providers::*;
pub use store::*;
