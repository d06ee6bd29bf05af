//! # Dependency Injection Abstractions
//!
//! 依赖注入抽象层，定义 Bean 描述符、分配、蓝图与注入器的核心接口。
//!
//! ## 核心接口
//!
//! - [`Bean`] - 可由注入引擎构造的类型
//! - [`BeanDescriptor`] - 静态类型化的依赖描述符
//! - [`BeanAllocation`] - 获取实例的方式
//! - [`Blueprint`] - 一组预先验证的分配定义
//! - [`Injector`] - 注入器接口
//! - [`TypeCatalog`] - 插件可见的类型目录

pub mod allocation;
pub mod blueprint;
pub mod catalog;
pub mod dependencies;
pub mod descriptor;
pub mod injector;
pub mod instance;
pub mod mapping;
pub mod processor;

pub use allocation::*;
pub use blueprint::*;
pub use catalog::*;
pub use dependencies::*;
pub use descriptor::*;
pub use injector::*;
pub use instance::*;
pub use mapping::*;
pub use processor::*;
