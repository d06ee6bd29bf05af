//! # Plugin Cache
//!
//! 按内容寻址、支持版本的插件缓存。
//!
//! 插件是目录中的 tar 归档 `<name>[_v<N>].tar`，在 `META-INF/services/<接口名>` 中
//! 每行声明一个实现类型。归档通过加载单元在 [`TypeCatalog`](di_abstractions::TypeCatalog)
//! 中解析类型名称：先查宿主，再查归档声明的类型包。
//!
//! ## 主要组件
//!
//! - [`PluginId`] - 解析后的插件标识
//! - [`PluginArchive`] - 归档内容
//! - [`LoadingUnit`] - 隔离的加载单元
//! - [`Plugin`] - 已加载的插件
//! - [`PluginCache`] - 插件缓存

pub mod archive;
pub mod cache;
pub mod id;
pub mod loader;
pub mod plugin;

pub use archive::*;
pub use cache::*;
pub use id::*;
pub use loader::*;
pub use plugin::*;
