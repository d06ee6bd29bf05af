//! 属性来源实现

use config_abstractions::PropertySource;
use injection_common::ValidationError;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 内存属性来源
#[derive(Debug, Clone)]
pub struct MapPropertySource {
    name: String,
    values: HashMap<String, String>,
    priority: i32,
}

impl MapPropertySource {
    /// 创建新的内存属性来源
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: HashMap::new(),
            priority: 50,
        }
    }

    /// 从键值对创建
    pub fn from_pairs<I, K, V>(name: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut source = Self::new(name);
        for (key, value) in pairs {
            source.values.insert(key.into(), value.into());
        }
        source
    }

    /// 设置属性
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for MapPropertySource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// 环境变量属性来源
///
/// `APP_SERVER_PORT` 在前缀为 `APP` 时映射为 `server.port`。
#[derive(Debug, Clone)]
pub struct EnvironmentPropertySource {
    prefix: String,
    separator: String,
    priority: i32,
    env_vars: HashMap<String, String>,
}

impl EnvironmentPropertySource {
    /// 创建新的环境变量属性来源
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut source = Self {
            prefix: prefix.into(),
            separator: "_".to_string(),
            priority: 200, // 环境变量最高优先级
            env_vars: HashMap::new(),
        };
        source.load_from(std::env::vars());
        source
    }

    /// 从给定变量集合创建
    pub fn from_vars<I>(prefix: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut source = Self {
            prefix: prefix.into(),
            separator: "_".to_string(),
            priority: 200,
            env_vars: HashMap::new(),
        };
        source.load_from(vars);
        source
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn load_from<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env_vars.clear();
        for (key, value) in vars {
            if key.starts_with(&self.prefix) {
                let property_key = self.env_key_to_property_key(&key);
                if !property_key.is_empty() {
                    self.env_vars.insert(property_key, value);
                }
            }
        }
        debug!("加载了 {} 个环境变量，前缀: {}", self.env_vars.len(), self.prefix);
    }

    /// 将环境变量键转换为属性键
    fn env_key_to_property_key(&self, env_key: &str) -> String {
        let key = env_key
            .strip_prefix(&self.prefix)
            .unwrap_or(env_key)
            .trim_start_matches(self.separator.as_str());

        key.replace(&self.separator, ".").to_lowercase()
    }
}

impl PropertySource for EnvironmentPropertySource {
    fn get(&self, key: &str) -> Option<String> {
        self.env_vars.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.env_vars.keys().cloned().collect()
    }

    fn name(&self) -> &str {
        "EnvironmentPropertySource"
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// 文件属性来源，支持 TOML 与 JSON
///
/// 嵌套表被展开为 `a.b.c` 形式的键，数组展开为逗号分隔的值。
#[derive(Debug, Clone)]
pub struct FilePropertySource {
    file_path: PathBuf,
    values: HashMap<String, String>,
    priority: i32,
}

impl FilePropertySource {
    /// 按扩展名加载属性文件
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ValidationError> {
        let file_path = path.as_ref().to_path_buf();
        debug!("加载属性文件: {}", file_path.display());

        let content = std::fs::read_to_string(&file_path).map_err(|e| {
            ValidationError::invalid_marker(file_path.display().to_string(), e.to_string())
        })?;

        match file_path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&file_path, &content),
            Some("json") => Self::from_json_str(&file_path, &content),
            other => Err(ValidationError::invalid_marker(
                file_path.display().to_string(),
                format!("不支持的属性文件类型: {:?}", other),
            )),
        }
    }

    /// 解析 TOML 内容
    pub fn from_toml_str(path: &Path, content: &str) -> Result<Self, ValidationError> {
        let value: toml::Value = toml::from_str(content).map_err(|e| {
            ValidationError::invalid_marker(path.display().to_string(), e.to_string())
        })?;
        Ok(Self::from_json_value(path, toml_to_json(&value), 100))
    }

    /// 解析 JSON 内容
    pub fn from_json_str(path: &Path, content: &str) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_str(content).map_err(|e| {
            ValidationError::invalid_marker(path.display().to_string(), e.to_string())
        })?;
        Ok(Self::from_json_value(path, value, 90))
    }

    fn from_json_value(path: &Path, value: Value, priority: i32) -> Self {
        let mut values = HashMap::new();
        flatten(&value, String::new(), &mut values);
        Self {
            file_path: path.to_path_buf(),
            values,
            priority,
        }
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 文件路径
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl PropertySource for FilePropertySource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn name(&self) -> &str {
        self.file_path.to_str().unwrap_or("FilePropertySource")
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// 将 TOML 值转换为 JSON 值
fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::Number(serde_json::Number::from(*i)),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Array(arr) => Value::Array(arr.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
    }
}

/// 递归展开为扁平键
fn flatten(value: &Value, prefix: String, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(obj) => {
            for (key, nested) in obj {
                let full_key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(nested, full_key, out);
            }
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(scalar_to_string)
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix, joined);
        }
        scalar => {
            out.insert(prefix, scalar_to_string(scalar));
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
