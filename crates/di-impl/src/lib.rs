//! # Dependency Injection Implementation
//!
//! 注入与生命周期引擎。
//!
//! ## 主要组件
//!
//! - [`RootInjector`] - 根注入器，开启注入序列并持有全局单例
//! - [`InjectorSettings`] - 注入器配置
//! - [`MappingContext`] - 限定符映射上下文
//! - [`SingletonPool`] - 单例池
//! - [`MarkerRegistry`] - 标记处理器注册表
//!
//! ## 示例
//!
//! ```no_run
//! use di_abstractions::{Bean, BeanDescriptor};
//! use di_impl::RootInjector;
//!
//! #[derive(Default)]
//! struct Clock;
//!
//! impl Bean for Clock {
//!     fn descriptor() -> BeanDescriptor {
//!         BeanDescriptor::builder::<Clock>().construct_default().build()
//!     }
//! }
//!
//! let injector = RootInjector::new()?;
//! let clock = injector.instantiate::<Clock>()?;
//! injector.destroy(&clock)?;
//! injector.shutdown()?;
//! # Ok::<(), injection_common::InjectorError>(())
//! ```

mod aggregation;
mod descriptor_cache;
mod engine;
mod sequence;
mod state;

pub mod injector;
pub mod mapping;
pub mod pool;
pub mod settings;

pub use descriptor_cache::MarkerRegistry;
pub use injector::*;
pub use mapping::*;
pub use pool::*;
pub use settings::*;
