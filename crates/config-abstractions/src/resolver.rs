//! 属性解析器抽象接口

use injection_common::{ConversionError, InjectorError, PropertyMarker, ResolvingError};
use std::str::FromStr;

/// 属性解析器 trait
///
/// 负责解析 `${key}`、`${key:default}` 形式的占位符表达式，默认值可以任意嵌套。
pub trait PropertyResolver: Send + Sync {
    /// 解析表达式
    ///
    /// - `matcher` 为最终选中的值必须完整匹配的正则表达式
    /// - `forced` 为真时，键缺失且没有默认值会直接失败；否则原样返回 `${key}`
    fn resolve(
        &self,
        expression: &str,
        matcher: Option<&str>,
        forced: bool,
    ) -> Result<String, ResolvingError>;

    /// 按属性标记解析
    fn resolve_marker(&self, marker: &PropertyMarker) -> Result<String, ResolvingError> {
        self.resolve(&marker.expression(), marker.matcher.as_deref(), marker.forced)
    }

    /// 检查属性键是否存在
    fn contains_key(&self, key: &str) -> bool;
}

impl dyn PropertyResolver + '_ {
    /// 强制解析并转换为标量类型
    pub fn resolve_as<T>(&self, expression: &str, matcher: Option<&str>) -> Result<T, InjectorError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.resolve(expression, matcher, true)?;
        Ok(convert(&value)?)
    }
}

/// 将字符串值转换为标量类型（bool、char、数值等）
pub fn convert<T>(value: &str) -> Result<T, ConversionError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConversionError {
        value: value.to_string(),
        target: std::any::type_name::<T>().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_scalars() {
        assert_eq!(convert::<u16>("8080").unwrap(), 8080);
        assert!(convert::<bool>("true").unwrap());
        assert_eq!(convert::<char>("x").unwrap(), 'x');
        assert_eq!(convert::<f64>(" 1.5 ").unwrap(), 1.5);
    }

    #[test]
    fn test_convert_malformed() {
        let error = convert::<i32>("abc").unwrap_err();
        assert_eq!(error.value, "abc");
        assert_eq!(error.target, "i32");
        assert!(convert::<char>("xy").is_err());
        assert!(convert::<bool>("yes").is_err());
    }
}
