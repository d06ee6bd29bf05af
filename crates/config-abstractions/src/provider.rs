//! 属性来源抽象接口

/// 属性来源 trait
///
/// 定义从不同数据源读取扁平化属性（`a.b.c` 形式的键）的统一接口
pub trait PropertySource: Send + Sync {
    /// 获取属性值
    fn get(&self, key: &str) -> Option<String>;

    /// 检查属性键是否存在
    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// 获取所有属性键
    fn keys(&self) -> Vec<String>;

    /// 获取来源名称
    fn name(&self) -> &str;

    /// 获取来源优先级，数值越高优先级越高
    fn priority(&self) -> i32 {
        0
    }
}
