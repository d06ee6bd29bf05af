//! 插件归档读取

use injection_common::{PluginError, PluginResult};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;

/// 服务声明目录
pub const SERVICES_DIR: &str = "META-INF/services/";

/// 插件清单路径
pub const MANIFEST_PATH: &str = "META-INF/plugin.toml";

/// 插件清单
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginManifest {
    /// 归档引用的类型包，缺省为插件基础名称
    pub bundle: Option<String>,
    /// 描述
    #[serde(default)]
    pub description: String,
}

/// 插件归档内容
#[derive(Debug, Clone, Default)]
pub struct PluginArchive {
    pub manifest: Option<PluginManifest>,
    /// 服务接口名称 → 实现类型名称列表
    pub services: BTreeMap<String, Vec<String>>,
}

impl PluginArchive {
    /// 解析归档字节
    pub fn parse(path: &Path, bytes: &[u8]) -> PluginResult<Self> {
        let malformed = |message: String| PluginError::MalformedArchive {
            path: path.to_path_buf(),
            message,
        };

        let mut archive = tar::Archive::new(Cursor::new(bytes));
        let entries = archive.entries().map_err(|e| malformed(e.to_string()))?;

        let mut result = PluginArchive::default();
        for entry in entries {
            let mut entry = entry.map_err(|e| malformed(e.to_string()))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }

            let entry_path = entry
                .path()
                .map_err(|e| malformed(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");

            // 只读取元数据，其余条目原样跳过
            let interface = entry_path
                .strip_prefix(SERVICES_DIR)
                .filter(|name| !name.is_empty() && !name.contains('/'));
            if entry_path != MANIFEST_PATH && interface.is_none() {
                continue;
            }

            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|e| malformed(format!("{}: {}", entry_path, e)))?;

            let Some(interface) = interface else {
                let manifest: PluginManifest =
                    toml::from_str(&content).map_err(|e| malformed(e.to_string()))?;
                result.manifest = Some(manifest);
                continue;
            };
            validate_type_name(interface, interface)?;

            let mut implementations = Vec::new();
            for line in content.lines() {
                let line = line.split('#').next().unwrap_or("").trim();
                if line.is_empty() {
                    continue;
                }
                validate_type_name(&format!("{} -> {}", interface, line), line)?;
                implementations.push(line.to_string());
            }
            result
                .services
                .entry(interface.to_string())
                .or_default()
                .extend(implementations);
        }

        Ok(result)
    }

    /// 归档引用的类型包
    pub fn bundle(&self) -> Option<&str> {
        self.manifest.as_ref().and_then(|m| m.bundle.as_deref())
    }
}

/// 校验类型名称：以 `.` 或 `::` 分隔的标识符
fn validate_type_name(declaration: &str, name: &str) -> PluginResult<()> {
    let valid_segment = |segment: &str| {
        let mut chars = segment.chars();
        matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
    };

    let valid = !name.is_empty()
        && name
            .split("::")
            .flat_map(|part| part.split('.'))
            .all(valid_segment);

    if valid {
        Ok(())
    } else {
        Err(PluginError::InvalidServiceDeclaration {
            declaration: declaration.to_string(),
            message: format!("'{}' 不是合法的类型名称", name),
        })
    }
}

/// 计算归档内容的校验和
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(files: &[(&str, &str)]) -> Vec<u8> {
        let files: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(path, content)| (*path, content.as_bytes()))
            .collect();
        build_bytes(&files)
    }

    fn build_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_parse_services_and_manifest() {
        let bytes = build(&[
            (MANIFEST_PATH, "bundle = \"gzip\"\n"),
            (
                "META-INF/services/codec.Codec",
                "# 实现\ncodec.Gzip\n\ncodec.Deflate # 备用\n",
            ),
            ("README.md", "ignored"),
        ]);

        let archive = PluginArchive::parse(Path::new("codec.tar"), &bytes).unwrap();
        assert_eq!(archive.bundle(), Some("gzip"));
        assert_eq!(
            archive.services["codec.Codec"],
            vec!["codec.Gzip".to_string(), "codec.Deflate".to_string()]
        );
    }

    #[test]
    fn test_binary_payload_skipped() {
        let bytes = build_bytes(&[
            (MANIFEST_PATH, &b"bundle = \"gzip\"\n"[..]),
            ("lib/payload.bin", &[0xffu8, 0xfe, 0x00, 0x80][..]),
            ("META-INF/services/codec.Codec", &b"codec.Gzip\n"[..]),
            ("META-INF/services/nested/blob", &[0xc3u8, 0x28][..]),
        ]);

        let archive = PluginArchive::parse(Path::new("codec.tar"), &bytes).unwrap();
        assert_eq!(archive.bundle(), Some("gzip"));
        assert_eq!(archive.services.len(), 1);
        assert_eq!(archive.services["codec.Codec"], vec!["codec.Gzip".to_string()]);
    }

    #[test]
    fn test_binary_service_declaration_rejected() {
        let bytes = build_bytes(&[("META-INF/services/codec.Codec", &[0xffu8, 0xfe][..])]);
        let error = PluginArchive::parse(Path::new("codec.tar"), &bytes).unwrap_err();
        assert!(matches!(error, PluginError::MalformedArchive { .. }));
    }

    #[test]
    fn test_invalid_type_name() {
        let bytes = build(&[("META-INF/services/codec.Codec", "codec.1Gzip\n")]);
        let error = PluginArchive::parse(Path::new("codec.tar"), &bytes).unwrap_err();
        assert!(matches!(error, PluginError::InvalidServiceDeclaration { .. }));

        let bytes = build(&[("META-INF/services/codec..Codec", "codec.Gzip\n")]);
        assert!(PluginArchive::parse(Path::new("codec.tar"), &bytes).is_err());
    }

    #[test]
    fn test_not_an_archive() {
        let error = PluginArchive::parse(Path::new("codec.tar"), &[1u8; 700]).unwrap_err();
        assert!(matches!(error, PluginError::MalformedArchive { .. }));
    }

    #[test]
    fn test_checksum_changes_with_content() {
        assert_eq!(checksum(b"a"), checksum(b"a"));
        assert_ne!(checksum(b"a"), checksum(b"b"));
        assert_eq!(checksum(b"").len(), 64);
    }
}
