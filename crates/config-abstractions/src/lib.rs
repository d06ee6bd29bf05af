//! # Configuration Abstractions
//!
//! 属性解析抽象层，定义属性来源与占位符解析的核心接口。
//!
//! ## 核心接口
//!
//! - [`PropertySource`] - 属性来源接口
//! - [`PropertyResolver`] - 属性解析器接口

pub mod provider;
pub mod resolver;

pub use provider::*;
pub use resolver::*;
