//! 签名目录加载（TOML）与索引
//!
//! 目录文件结构：
//! ```toml
//! [catalog]
//! version = "118"
//!
//! [[format]]
//! puid = "fmt/18"
//! name = "Acrobat PDF 1.4 - Portable Document Format"
//! version = "1.4"
//! mime = "application/pdf"
//! extensions = ["pdf"]
//!
//! [[format.signature]]
//! name = "PDF 1.4"
//!
//! [[format.signature.sequence]]
//! anchor = "bof"
//! pattern = "255044462D312E34"
//! ```
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::container::ContainerKind;
use crate::error::{IdentifyError, Result};
use crate::options::IdentifyOptions;
use crate::pattern::{Anchor, ByteSequence, ByteSignature};

const BUILTIN_FORMATS: &str = include_str!("../conf/formats.toml");
const BUILTIN_VERSIONS: &str = include_str!("../conf/versions.toml");
/// 配置目录中的版本描述文件名
pub const VERSIONS_FILE: &str = "versions.toml";

// ---- 文件结构（反序列化） ----

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    catalog: CatalogHeader,
    #[serde(default, rename = "format")]
    formats: Vec<FormatEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogHeader {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FormatEntry {
    puid: String,
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    mime: Option<String>,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    supersedes: Vec<String>,
    #[serde(default)]
    container: Option<ContainerKind>,
    #[serde(default, rename = "signature")]
    signatures: Vec<SignatureEntry>,
    #[serde(default, rename = "container_signature")]
    container_signatures: Vec<ContainerSignatureEntry>,
}

#[derive(Debug, Deserialize)]
struct SignatureEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "sequence")]
    sequences: Vec<SequenceEntry>,
}

#[derive(Debug, Deserialize)]
struct SequenceEntry {
    #[serde(default = "default_anchor")]
    anchor: Anchor,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    max_offset: Option<usize>,
    pattern: String,
}

fn default_anchor() -> Anchor {
    Anchor::Bof
}

#[derive(Debug, Deserialize)]
struct ContainerSignatureEntry {
    #[serde(default)]
    name: Option<String>,
    container: ContainerKind,
    #[serde(default, rename = "file")]
    files: Vec<ContainerFileEntry>,
}

#[derive(Debug, Deserialize)]
struct ContainerFileEntry {
    path: String,
    #[serde(default)]
    sequence: Option<SequenceEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionsFile {
    #[serde(default)]
    pronom_version: Option<String>,
    pronom_signature: String,
}

// ---- 归一化后的目录类型 ----

/// 一个注册格式（加载后不可变，由 Catalog 独占）
#[derive(Debug, Clone)]
pub struct FormatSignature {
    pub puid: String,
    pub name: String,
    pub version: Option<String>,
    pub mime: Option<String>,
    pub extensions: Vec<String>,
    pub signatures: Vec<ByteSignature>,
    /// 本格式优先于这些格式（has_priority_over）
    pub supersedes: Vec<String>,
    /// 本格式本身是该类容器
    pub container: Option<ContainerKind>,
    /// 通过容器内容识别本格式的规则
    pub container_signatures: Vec<ContainerSignature>,
}

impl FormatSignature {
    pub fn supersedes(&self, other: &str) -> bool {
        self.supersedes.iter().any(|p| p == other)
    }

    /// `<puid> : <name> (Version=<v>) (*.ext, *.ext)`
    pub fn display_line(&self) -> String {
        let mut line = format!("{} : {}", self.puid, self.name);
        if let Some(v) = self.version.as_deref().filter(|v| !v.is_empty()) {
            line.push_str(&format!(" (Version={v})"));
        }
        if !self.extensions.is_empty() {
            let exts: Vec<String> = self.extensions.iter().map(|e| format!("*.{e}")).collect();
            line.push_str(&format!(" ({})", exts.join(", ")));
        }
        line
    }
}

/// 容器签名：容器内必须存在的条目（可选再匹配条目内容）
#[derive(Debug, Clone)]
pub struct ContainerSignature {
    pub name: Option<String>,
    pub container: ContainerKind,
    pub files: Vec<ContainerFile>,
}

#[derive(Debug, Clone)]
pub struct ContainerFile {
    pub path: String,
    pub sequence: Option<ByteSequence>,
}

/// 签名目录（只读，可跨线程共享）
#[derive(Debug, Clone)]
pub struct Catalog {
    formats: Vec<FormatSignature>,
    index: HashMap<String, usize>,
    version: String,
    signature_file: PathBuf,
}

impl Catalog {
    /// 从单个 TOML 签名文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let (header, formats) = read_catalog_file(path)?;
        Self::assemble(formats, header.version.unwrap_or_default(), path.to_path_buf(), path)
    }

    /// 依次加载多个签名文件：首个为主文件，后续按 PUID 原位覆盖或追加
    pub fn load_all(paths: &[PathBuf]) -> Result<Self> {
        let (first, rest) = paths
            .split_first()
            .ok_or_else(|| IdentifyError::catalog(PathBuf::new(), "no catalog files given"))?;
        let mut catalog = Self::load(first)?;
        for p in rest {
            catalog.merge_file(p)?;
        }
        Ok(catalog)
    }

    /// 从配置目录加载：读取 versions.toml，再加载其指定的签名文件
    pub fn from_conf_dir(dir: &Path) -> Result<Self> {
        let versions_path = dir.join(VERSIONS_FILE);
        let txt = std::fs::read_to_string(&versions_path).map_err(|e| IdentifyError::catalog(&versions_path, e))?;
        let versions: VersionsFile = toml::from_str(&txt).map_err(|e| IdentifyError::catalog(&versions_path, e))?;
        let sig_path = dir.join(&versions.pronom_signature);
        let (header, formats) = read_catalog_file(&sig_path)?;
        let version = versions.pronom_version.or(header.version).unwrap_or_default();
        Self::assemble(formats, version, sig_path.clone(), &sig_path)
    }

    /// 内置目录（随库编译）
    pub fn builtin() -> Result<Self> {
        let origin = Path::new("builtin");
        let versions: VersionsFile =
            toml::from_str(BUILTIN_VERSIONS).map_err(|e| IdentifyError::catalog(origin.join(VERSIONS_FILE), e))?;
        let (header, formats) = parse_catalog_str(BUILTIN_FORMATS, &origin.join(&versions.pronom_signature))?;
        let version = versions.pronom_version.or(header.version).unwrap_or_default();
        Self::assemble(formats, version, PathBuf::from(&versions.pronom_signature), origin)
    }

    /// 从 TOML 文本构造（嵌入方与测试使用）
    pub fn from_toml_str(txt: &str) -> Result<Self> {
        let origin = Path::new("inline");
        let (header, formats) = parse_catalog_str(txt, origin)?;
        Self::assemble(formats, header.version.unwrap_or_default(), origin.to_path_buf(), origin)
    }

    /// 按选项打开目录：配置目录或内置目录为基础，再叠加 catalog_paths
    pub fn open(options: &IdentifyOptions) -> Result<Self> {
        let mut catalog = match &options.conf_dir {
            Some(dir) => Self::from_conf_dir(dir)?,
            None => Self::builtin()?,
        };
        for p in &options.catalog_paths {
            catalog.merge_file(p)?;
        }
        Ok(catalog)
    }

    fn assemble(formats: Vec<FormatSignature>, version: String, signature_file: PathBuf, origin: &Path) -> Result<Self> {
        let mut index = HashMap::with_capacity(formats.len());
        for (i, f) in formats.iter().enumerate() {
            if index.insert(f.puid.clone(), i).is_some() {
                return Err(IdentifyError::catalog(origin, format!("duplicate puid {}", f.puid)));
            }
        }
        Ok(Self { formats, index, version, signature_file })
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let (header, formats) = read_catalog_file(path)?;
        let mut seen: HashSet<String> = HashSet::new();
        for f in formats {
            if !seen.insert(f.puid.clone()) {
                return Err(IdentifyError::catalog(path, format!("duplicate puid {}", f.puid)));
            }
            match self.index.get(&f.puid) {
                Some(&i) => self.formats[i] = f,
                None => {
                    self.index.insert(f.puid.clone(), self.formats.len());
                    self.formats.push(f);
                }
            }
        }
        if self.version.is_empty() {
            self.version = header.version.unwrap_or_default();
        }
        Ok(())
    }

    pub fn formats(&self) -> &[FormatSignature] {
        &self.formats
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn get(&self, puid: &str) -> Option<&FormatSignature> {
        self.index.get(puid).map(|&i| &self.formats[i])
    }

    /// 全部格式，或仅子集中的格式；保持目录声明顺序
    pub fn lookup(&self, subset: Option<&HashSet<String>>) -> Vec<&FormatSignature> {
        self.formats
            .iter()
            .filter(|f| subset.map_or(true, |s| s.contains(&f.puid)))
            .collect()
    }

    /// 目录版本（缺失时为空串）
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn signature_file_name(&self) -> String {
        self.signature_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn signature_file_path(&self) -> &Path {
        &self.signature_file
    }

    /// PUID → 展示串（目录顺序）；`filter` 非空时仅返回列出的 PUID
    pub fn known_formats(&self, filter: &[String]) -> Vec<(String, String)> {
        self.formats
            .iter()
            .filter(|f| filter.is_empty() || filter.contains(&f.puid))
            .map(|f| (f.puid.clone(), f.display_line()))
            .collect()
    }
}

fn read_catalog_file(path: &Path) -> Result<(CatalogHeader, Vec<FormatSignature>)> {
    let txt = std::fs::read_to_string(path).map_err(|e| IdentifyError::catalog(path, e))?;
    parse_catalog_str(&txt, path)
}

fn puid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[a-z]+-)?[a-z]+/[0-9]+$").expect("valid puid regex"))
}

/// 解析并归一化目录文本；任何模式错误都使整个加载失败
fn parse_catalog_str(txt: &str, origin: &Path) -> Result<(CatalogHeader, Vec<FormatSignature>)> {
    let parsed: CatalogFile = toml::from_str(txt).map_err(|e| IdentifyError::catalog(origin, e))?;
    let mut out = Vec::with_capacity(parsed.formats.len());

    for e in parsed.formats {
        if !puid_regex().is_match(&e.puid) {
            return Err(IdentifyError::catalog(origin, format!("invalid puid {:?}", e.puid)));
        }
        let mut signatures = Vec::with_capacity(e.signatures.len());
        for (si, s) in e.signatures.into_iter().enumerate() {
            let mut sequences = Vec::with_capacity(s.sequences.len());
            for (qi, q) in s.sequences.into_iter().enumerate() {
                let seq = build_sequence(q)
                    .map_err(|err| IdentifyError::catalog(origin, format!("{} signature {si} sequence {qi}: {err}", e.puid)))?;
                sequences.push(seq);
            }
            signatures.push(ByteSignature { name: s.name, sequences });
        }

        let mut container_signatures = Vec::with_capacity(e.container_signatures.len());
        for (ci, c) in e.container_signatures.into_iter().enumerate() {
            let mut files = Vec::with_capacity(c.files.len());
            for f in c.files {
                let sequence = match f.sequence {
                    Some(q) => Some(build_sequence(q).map_err(|err| {
                        IdentifyError::catalog(origin, format!("{} container signature {ci} file {}: {err}", e.puid, f.path))
                    })?),
                    None => None,
                };
                files.push(ContainerFile { path: f.path, sequence });
            }
            container_signatures.push(ContainerSignature { name: c.name, container: c.container, files });
        }

        out.push(FormatSignature {
            puid: e.puid,
            name: e.name,
            version: e.version.filter(|v| !v.is_empty()),
            mime: e.mime.filter(|m| !m.is_empty()),
            extensions: e.extensions.into_iter().map(|x| x.trim_start_matches('.').to_ascii_lowercase()).collect(),
            signatures,
            supersedes: e.supersedes,
            container: e.container,
            container_signatures,
        });
    }

    Ok((parsed.catalog, out))
}

fn build_sequence(q: SequenceEntry) -> std::result::Result<ByteSequence, crate::pattern::PatternError> {
    ByteSequence::new(q.anchor, q.offset, q.max_offset, &q.pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [catalog]
        version = "test-1"

        [[format]]
        puid = "fmt/900"
        name = "Alpha"
        version = "2"
        extensions = ["alp", ".ALX"]

        [[format.signature]]
        name = "alpha magic"
        [[format.signature.sequence]]
        pattern = "'ALPHA'"

        [[format]]
        puid = "x-fmt/901"
        name = "Beta"
    "#;

    #[test]
    fn loads_formats_in_declaration_order() {
        let c = Catalog::from_toml_str(SAMPLE).unwrap();
        assert_eq!(c.version(), "test-1");
        let puids: Vec<&str> = c.lookup(None).iter().map(|f| f.puid.as_str()).collect();
        assert_eq!(puids, ["fmt/900", "x-fmt/901"]);
        let alpha = c.get("fmt/900").unwrap();
        assert_eq!(alpha.extensions, ["alp", "alx"]);
        assert_eq!(alpha.signatures[0].sequences[0].anchor, Anchor::Bof);
    }

    #[test]
    fn lookup_restricts_to_subset() {
        let c = Catalog::from_toml_str(SAMPLE).unwrap();
        let subset: HashSet<String> = ["x-fmt/901".to_string()].into();
        let found = c.lookup(Some(&subset));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Beta");
    }

    #[test]
    fn display_line_omits_absent_clauses() {
        let c = Catalog::from_toml_str(SAMPLE).unwrap();
        let listing = c.known_formats(&[]);
        assert_eq!(listing[0].1, "fmt/900 : Alpha (Version=2) (*.alp, *.alx)");
        assert_eq!(listing[1].1, "x-fmt/901 : Beta");
        let only = c.known_formats(&["x-fmt/901".to_string()]);
        assert_eq!(only.len(), 1);
    }

    #[test]
    fn quoted_alternation_loads_and_matches() {
        let doc = r#"
            [[format]]
            puid = "fmt/471"
            name = "HTML 5"
            [[format.signature]]
            [[format.signature.sequence]]
            max_offset = 16
            pattern = "'<!' ('doctype'|'DOCTYPE') 20 ('html'|'HTML')"
        "#;
        let c = Catalog::from_toml_str(doc).unwrap();
        let sig = &c.get("fmt/471").unwrap().signatures[0];
        let w = crate::window::Windows::from_bytes(b"\n  <!DOCTYPE html>", 64, 64);
        assert_eq!(sig.find(&w), Some(14));
        let w = crate::window::Windows::from_bytes(b"<!doctype xhtml>", 64, 64);
        assert_eq!(sig.find(&w), None);
    }

    #[test]
    fn rejects_duplicate_and_malformed_entries() {
        let dup = r#"
            [[format]]
            puid = "fmt/1"
            name = "a"
            [[format]]
            puid = "fmt/1"
            name = "b"
        "#;
        assert!(matches!(Catalog::from_toml_str(dup), Err(IdentifyError::CatalogLoad { .. })));

        let bad_pattern = r#"
            [[format]]
            puid = "fmt/1"
            name = "a"
            [[format.signature]]
            [[format.signature.sequence]]
            pattern = "GG"
        "#;
        assert!(matches!(Catalog::from_toml_str(bad_pattern), Err(IdentifyError::CatalogLoad { .. })));

        let bad_puid = r#"
            [[format]]
            puid = "not a puid"
            name = "a"
        "#;
        assert!(matches!(Catalog::from_toml_str(bad_puid), Err(IdentifyError::CatalogLoad { .. })));
        assert!(matches!(Catalog::from_toml_str("[[format]"), Err(IdentifyError::CatalogLoad { .. })));
    }

    #[test]
    fn missing_file_is_catalog_error() {
        let err = Catalog::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, IdentifyError::CatalogLoad { .. }));
    }

    #[test]
    fn builtin_catalog_loads() {
        let c = Catalog::builtin().unwrap();
        assert!(!c.version().is_empty());
        assert_eq!(c.signature_file_name(), "formats.toml");
        assert_eq!(c.get("fmt/18").unwrap().version.as_deref(), Some("1.4"));
        assert!(c.get("x-fmt/263").unwrap().container.is_some());
    }

    #[test]
    fn later_files_override_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.toml");
        let b = dir.path().join("b.toml");
        std::fs::write(&a, SAMPLE).unwrap();
        std::fs::write(
            &b,
            r#"
            [[format]]
            puid = "fmt/900"
            name = "Alpha v3"
            [[format]]
            puid = "fmt/902"
            name = "Gamma"
            "#,
        )
        .unwrap();
        let c = Catalog::load_all(&[a.clone(), b]).unwrap();
        let names: Vec<&str> = c.formats().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Alpha v3", "Beta", "Gamma"]);
        assert_eq!(c.signature_file_path(), a.as_path());
    }

    #[test]
    fn conf_dir_reads_versions_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sigs-v9.toml"), SAMPLE).unwrap();
        std::fs::write(
            dir.path().join(VERSIONS_FILE),
            "pronom_version = \"99\"\npronom_signature = \"sigs-v9.toml\"\n",
        )
        .unwrap();
        let c = Catalog::from_conf_dir(dir.path()).unwrap();
        assert_eq!(c.version(), "99");
        assert_eq!(c.signature_file_name(), "sigs-v9.toml");
        assert_eq!(c.len(), 2);
    }
}
