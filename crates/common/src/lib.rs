//! # Injection Common
//!
//! 这个 crate 提供了 Weft 依赖注入引擎各层共享的基础类型。
//!
//! ## 核心内容
//!
//! - [`errors`] - 引擎的完整错误分类
//! - [`markers`] - 声明式标记模型（可注入、可解析、插件、聚合）
//! - [`metadata`] - 类型信息
//! - [`lifecycle`] - Bean 生命周期阶段与注入序列作用域
//!
//! ## 设计原则
//!
//! - 标记模型是纯数据，没有行为
//! - 所有错误都向直接调用方暴露，不做自动重试

pub mod errors;
pub mod lifecycle;
pub mod markers;
pub mod metadata;

pub use errors::*;
pub use lifecycle::*;
pub use markers::*;
pub use metadata::*;
