//! 占位符表达式求值
//!
//! 从左到右扫描 `${...}`，先由内向外替换键中的嵌套占位符，只有在键缺失时才对默认值求值。

use injection_common::ResolvingError;
use regex::Regex;

const OPEN: &str = "${";
const CLOSE: char = '}';
const DEFAULT_SEPARATOR: char = ':';

/// 求值器
pub(crate) struct Evaluator<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
    forced: bool,
    visiting: Vec<String>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(lookup: &'a dyn Fn(&str) -> Option<String>, forced: bool) -> Self {
        Self {
            lookup,
            forced,
            visiting: Vec::new(),
        }
    }

    /// 对整段文本求值，占位符之外的文本原样保留
    pub(crate) fn evaluate(&mut self, text: &str) -> Result<String, ResolvingError> {
        let mut output = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find(OPEN) {
            output.push_str(&rest[..start]);
            let body_start = start + OPEN.len();
            let close = find_closing(rest, body_start).ok_or_else(|| ResolvingError::Malformed {
                expression: text.to_string(),
                message: "缺少匹配的 '}'".to_string(),
            })?;

            let body = &rest[body_start..close];
            output.push_str(&self.placeholder(body)?);
            rest = &rest[close + CLOSE.len_utf8()..];
        }

        output.push_str(rest);
        Ok(output)
    }

    fn placeholder(&mut self, body: &str) -> Result<String, ResolvingError> {
        let (key_expression, default_expression) = split_default(body);
        let key = self.evaluate(key_expression)?;

        if key.is_empty() {
            return Err(ResolvingError::Malformed {
                expression: format!("{}{}{}", OPEN, body, CLOSE),
                message: "属性键为空".to_string(),
            });
        }

        // 键中仍有未解析的占位符时，视为键缺失
        let value = if key.contains(OPEN) {
            None
        } else {
            (self.lookup)(&key)
        };

        if let Some(value) = value {
            if self.visiting.iter().any(|k| k == &key) {
                return Err(ResolvingError::RecursiveReference { key });
            }
            self.visiting.push(key);
            let resolved = self.evaluate(&value);
            self.visiting.pop();
            return resolved;
        }

        match default_expression {
            Some(default) => self.evaluate(default),
            None if self.forced => Err(ResolvingError::Unresolvable { key }),
            None => Ok(format!("{}{}{}", OPEN, key_expression, CLOSE)),
        }
    }
}

/// 从 `from` 开始查找与已打开占位符匹配的 `}`
fn find_closing(text: &str, from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut index = from;
    let bytes = text.as_bytes();

    while index < bytes.len() {
        if bytes[index..].starts_with(OPEN.as_bytes()) {
            depth += 1;
            index += OPEN.len();
            continue;
        }
        if bytes[index] == CLOSE as u8 {
            depth -= 1;
            if depth == 0 {
                return Some(index);
            }
        }
        index += 1;
    }

    None
}

/// 在嵌套深度为 0 的第一个 `:` 处拆分键与默认值
fn split_default(body: &str) -> (&str, Option<&str>) {
    let mut depth = 0usize;
    let bytes = body.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index..].starts_with(OPEN.as_bytes()) {
            depth += 1;
            index += OPEN.len();
            continue;
        }
        match bytes[index] {
            byte if byte == CLOSE as u8 => depth = depth.saturating_sub(1),
            byte if byte == DEFAULT_SEPARATOR as u8 && depth == 0 => {
                return (&body[..index], Some(&body[index + 1..]))
            }
            _ => {}
        }
        index += 1;
    }

    (body, None)
}

/// 解析表达式并校验匹配器
pub(crate) fn resolve_expression(
    lookup: &dyn Fn(&str) -> Option<String>,
    expression: &str,
    matcher: Option<&str>,
    forced: bool,
) -> Result<String, ResolvingError> {
    let value = Evaluator::new(lookup, forced).evaluate(expression)?;

    if let Some(pattern) = matcher {
        let regex = compile_matcher(pattern)?;
        if !regex.is_match(&value) {
            return Err(ResolvingError::MatcherMismatch {
                key: expression.to_string(),
                value,
                pattern: pattern.to_string(),
            });
        }
    }

    Ok(value)
}

/// 编译完整匹配的正则表达式
pub fn compile_matcher(pattern: &str) -> Result<Regex, ResolvingError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| ResolvingError::InvalidMatcher {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_split_default_ignores_nested_colons() {
        assert_eq!(split_default("a:${b:c}"), ("a", Some("${b:c}")));
        assert_eq!(split_default("${x:y}:z"), ("${x:y}", Some("z")));
        assert_eq!(split_default("plain"), ("plain", None));
    }

    #[test]
    fn test_find_closing_nested() {
        let text = "${a:${b:c}}tail";
        assert_eq!(find_closing(text, 2), Some(10));
    }

    #[test]
    fn test_literal_text_is_kept() {
        let lookup = lookup_from(&[("host", "localhost")]);
        let value = resolve_expression(&lookup, "http://${host}:${port:80}/", None, false).unwrap();
        assert_eq!(value, "http://localhost:80/");
    }

    #[test]
    fn test_nested_key() {
        let lookup = lookup_from(&[("env", "prod"), ("db.prod", "10.0.0.1")]);
        let value = resolve_expression(&lookup, "${db.${env}}", None, true).unwrap();
        assert_eq!(value, "10.0.0.1");
    }

    #[test]
    fn test_recursive_reference() {
        let lookup = lookup_from(&[("a", "${b}"), ("b", "${a}")]);
        let error = resolve_expression(&lookup, "${a}", None, false).unwrap_err();
        assert!(matches!(error, ResolvingError::RecursiveReference { .. }));
    }

    #[test]
    fn test_unclosed_placeholder() {
        let lookup = lookup_from(&[]);
        let error = resolve_expression(&lookup, "${a:${b}", None, false).unwrap_err();
        assert!(matches!(error, ResolvingError::Malformed { .. }));
    }

    #[test]
    fn test_invalid_matcher() {
        let lookup = lookup_from(&[("a", "1")]);
        let error = resolve_expression(&lookup, "${a}", Some("("), false).unwrap_err();
        assert!(matches!(error, ResolvingError::InvalidMatcher { .. }));
    }
}
