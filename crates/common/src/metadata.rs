//! 元数据定义
//!
//! 提供 Bean 类型的元数据信息

use std::any::TypeId;
use std::fmt;

/// 类型信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    /// 类型ID
    pub id: TypeId,
    /// 完整类型名称
    pub full_name: &'static str,
}

impl TypeInfo {
    /// 从类型获取类型信息，支持 `dyn Trait`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            full_name: std::any::type_name::<T>(),
        }
    }

    /// 获取简短的类型名称（不包含模块路径）
    pub fn short_name(&self) -> &'static str {
        let base = self.full_name.split('<').next().unwrap_or(self.full_name);
        base.rsplit("::").next().unwrap_or(base)
    }

    /// 是否为指定类型
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.full_name)
    }
}
