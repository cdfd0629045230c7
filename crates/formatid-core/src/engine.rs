//! 识别引擎：窗口读取 → 预筛 → 精确匹配 → 优先级裁决 → 容器签名 → 递归展开
//!
//! `Identifier` 构造后只读，可在多个线程间共享（`&Identifier` 即可）。
//! 每个顶层目标拥有自己的截止条件（取消 + 超时），容器条目继承之。
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cancel::{CancellationToken, Deadline};
use crate::catalog::{Catalog, FormatSignature};
use crate::container::{self, ContainerKind, EntryContent, EntryLimits, Source};
use crate::error::{ErrorKind, IdentifyError, Result, TargetError};
use crate::findings::{resolve_priority, SignatureHit};
use crate::options::IdentifyOptions;
use crate::pattern::Anchor;
use crate::prefilter::{build_prefilter_plan, PrefilterPlan};
use crate::types::{FormatMatch, IdentificationResult, MatchType};
use crate::window::{self, Windows};

/// 引擎版本（随 crate 版本）
pub fn engine_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 识别器：目录快照 + 选项 + 预计算的候选集与预筛计划
pub struct Identifier {
    catalog: Arc<Catalog>,
    options: IdentifyOptions,
    /// 候选槽位：(格式下标, 签名下标)，按目录顺序
    slots: Vec<(usize, usize)>,
    plan: PrefilterPlan,
    /// 是否有候选序列锚定在文件尾
    needs_suffix: bool,
    /// 扩展名 → 候选格式下标（目录顺序）
    extensions: HashMap<String, Vec<usize>>,
    /// 容器类型 → 拥有该类容器签名的候选格式下标
    container_rules: HashMap<ContainerKind, Vec<usize>>,
}

/// 单个目标的判定：结果 + 需要展开时的容器类型
struct Decision {
    result: IdentificationResult,
    container: Option<ContainerKind>,
}

impl Identifier {
    pub fn new(catalog: Arc<Catalog>, options: IdentifyOptions) -> Result<Self> {
        if options.buffer_size == 0 {
            return Err(IdentifyError::InvalidOptions("buffer_size must be greater than 0".into()));
        }
        if options.container_buffer_size == 0 {
            return Err(IdentifyError::InvalidOptions("container_buffer_size must be greater than 0".into()));
        }
        for puid in options.include_formats.iter().chain(&options.exclude_formats) {
            if catalog.get(puid).is_none() {
                warn!(%puid, "format filter names a puid that is not in the catalog");
            }
        }

        let formats = catalog.formats();
        let candidate = |f: &FormatSignature| {
            (options.include_formats.is_empty() || options.include_formats.contains(&f.puid))
                && !options.exclude_formats.contains(&f.puid)
        };

        let mut slots = Vec::new();
        let mut extensions: HashMap<String, Vec<usize>> = HashMap::new();
        let mut container_rules: HashMap<ContainerKind, Vec<usize>> = HashMap::new();
        for (fi, f) in formats.iter().enumerate() {
            if !candidate(f) {
                continue;
            }
            slots.extend((0..f.signatures.len()).map(|si| (fi, si)));
            for ext in &f.extensions {
                extensions.entry(ext.clone()).or_default().push(fi);
            }
            let kinds: HashSet<ContainerKind> = f.container_signatures.iter().map(|c| c.container).collect();
            for kind in kinds {
                container_rules.entry(kind).or_default().push(fi);
            }
        }

        let signatures: Vec<_> = slots.iter().map(|&(fi, si)| &formats[fi].signatures[si]).collect();
        let plan = build_prefilter_plan(&signatures);
        let needs_suffix = signatures
            .iter()
            .any(|s| s.sequences.iter().any(|q| q.anchor == Anchor::Eof));

        debug!(
            candidates = slots.len(),
            needs_suffix,
            "identifier ready"
        );
        Ok(Self { catalog, options, slots, plan, needs_suffix, extensions, container_rules })
    }

    /// 按选项打开目录并构造识别器
    pub fn open(options: IdentifyOptions) -> Result<Self> {
        let catalog = Catalog::open(&options)?;
        Self::new(Arc::new(catalog), options)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn options(&self) -> &IdentifyOptions {
        &self.options
    }

    /// 识别单个文件，不展开容器
    pub fn identify_file(&self, path: &Path) -> IdentificationResult {
        let name = path.to_string_lossy();
        let deadline = self.deadline(None);
        let source = Source::File(path.to_path_buf());
        match self.decide_source(&name, &source, &deadline) {
            Ok(d) => d.result,
            Err(e) => failed(&name, e),
        }
    }

    /// 识别文件；按 `expand_containers` 决定是否展开容器
    pub fn identify(&self, path: &Path) -> Vec<IdentificationResult> {
        self.identify_path(path, self.options.expand_containers, None)
    }

    /// 识别文件并总是展开容器
    pub fn identify_archive(&self, path: &Path) -> Vec<IdentificationResult> {
        self.identify_path(path, true, None)
    }

    /// 识别流式输入（如 stdin）；不可回溯，因此不展开、不做容器签名检查
    pub fn identify_reader<R: Read>(&self, name: &str, mut reader: R) -> IdentificationResult {
        let deadline = self.deadline(None);
        let read = window::read_stream(&mut reader, name, self.options.buffer_size, self.suffix_size(), &deadline);
        match read.and_then(|w| self.decide(name, &w, None, &deadline)) {
            Ok(d) => d.result,
            Err(e) => failed(name, e),
        }
    }

    /// 识别内存数据，不展开容器
    pub fn identify_bytes(&self, name: &str, data: &[u8]) -> IdentificationResult {
        let deadline = self.deadline(None);
        let source = Source::Memory(Arc::from(data));
        match self.decide_source(name, &source, &deadline) {
            Ok(d) => d.result,
            Err(e) => failed(name, e),
        }
    }

    pub(crate) fn identify_path(
        &self,
        path: &Path,
        expand: bool,
        cancel: Option<&CancellationToken>,
    ) -> Vec<IdentificationResult> {
        let name = path.to_string_lossy();
        let deadline = self.deadline(cancel);
        let mut out = Vec::new();
        self.identify_source(&name, &Source::File(path.to_path_buf()), expand, 0, &deadline, &mut out);
        out
    }

    fn deadline(&self, cancel: Option<&CancellationToken>) -> Deadline {
        Deadline::new(self.options.timeout(), cancel.cloned())
    }

    fn suffix_size(&self) -> usize {
        if self.needs_suffix {
            self.options.buffer_size
        } else {
            0
        }
    }

    /// 识别一个来源，结果追加到 `out`；展开时容器本身的结果按 `report_containers` 决定是否保留
    fn identify_source(
        &self,
        name: &str,
        source: &Source,
        expand: bool,
        depth: usize,
        deadline: &Deadline,
        out: &mut Vec<IdentificationResult>,
    ) {
        let decision = match self.decide_source(name, source, deadline) {
            Ok(d) => d,
            Err(e) => {
                out.push(failed(name, e));
                return;
            }
        };
        let kind = match decision.container {
            Some(kind) if expand => kind,
            _ => {
                out.push(decision.result);
                return;
            }
        };
        if depth >= self.options.max_nesting_depth {
            warn!(path = name, depth, "container nesting limit reached, not expanding");
            out.push(decision.result);
            return;
        }

        let mut entries = Vec::new();
        match self.expand(name, kind, source, depth + 1, deadline, &mut entries) {
            Ok(()) => {
                debug!(path = name, entries = entries.len(), "container expanded");
                if self.options.report_containers {
                    out.push(decision.result);
                }
                out.append(&mut entries);
            }
            Err(e) => {
                warn!(path = name, error = %e, "container skipped");
                out.push(failed(name, e));
            }
        }
    }

    fn expand(
        &self,
        name: &str,
        kind: ContainerKind,
        source: &Source,
        depth: usize,
        deadline: &Deadline,
        out: &mut Vec<IdentificationResult>,
    ) -> Result<()> {
        let limits = EntryLimits {
            max_in_memory: self.options.max_in_memory_entry,
            prefix: self.options.buffer_size,
            suffix: self.suffix_size(),
        };
        let mut names = UniqueNames::default();
        container::for_each_entry(kind, source, name, &limits, deadline, &mut |entry, content| {
            let qualified = container::qualify(name, &names.claim(entry));
            match content {
                Ok(EntryContent::Buffered(data)) => {
                    self.identify_source(&qualified, &Source::Memory(data), true, depth, deadline, out);
                }
                Ok(EntryContent::Windowed(w)) => match self.decide(&qualified, &w, None, deadline) {
                    Ok(d) => out.push(d.result),
                    Err(e) => out.push(failed(&qualified, e)),
                },
                Err(e) => out.push(failed(&qualified, e)),
            }
            deadline.check()
        })
    }

    fn decide_source(&self, name: &str, source: &Source, deadline: &Deadline) -> Result<Decision> {
        let w = match source {
            Source::File(p) => {
                let mut f = File::open(p).map_err(|e| IdentifyError::unreadable(name, e))?;
                window::read_seekable(&mut f, name, self.options.buffer_size, self.suffix_size(), deadline)?
            }
            Source::Memory(data) => Windows::from_bytes(data, self.options.buffer_size, self.suffix_size()),
        };
        self.decide(name, &w, Some(source), deadline)
    }

    fn decide(&self, name: &str, w: &Windows, source: Option<&Source>, deadline: &Deadline) -> Result<Decision> {
        let formats = self.catalog.formats();
        let ranked = resolve_priority(self.match_windows(w, deadline)?, &self.catalog);

        if ranked.is_empty() {
            let result = match self.match_extension(name).filter(|_| !w.is_empty()) {
                Some((format, alternatives)) => IdentificationResult::matched(name, format, alternatives),
                None => IdentificationResult::unmatched(name),
            };
            debug!(path = name, matched = result.is_matched(), "no signature matched");
            return Ok(Decision { result, container: None });
        }

        let mut matches: Vec<FormatMatch> = ranked
            .iter()
            .map(|h| self.format_match(h.format_idx, self.signature_name(h), MatchType::Signature))
            .collect();
        let mut container = formats[ranked[0].format_idx].container;

        if let (Some(kind), Some(source)) = (container, source) {
            if self.options.container_signatures {
                let found = self.match_container_signatures(name, kind, source, deadline)?;
                if let Some(first) = found.first() {
                    container = formats[first.format_idx].container;
                    let mut front: Vec<FormatMatch> = found
                        .iter()
                        .map(|h| {
                            let sig = formats[h.format_idx].container_signatures[h.signature_idx].name.clone();
                            self.format_match(h.format_idx, sig, MatchType::Container)
                        })
                        .collect();
                    matches.retain(|m| front.iter().all(|c| c.puid != m.puid));
                    front.append(&mut matches);
                    matches = front;
                }
            }
        }

        let mut matches = matches.into_iter();
        let Some(format) = matches.next() else {
            return Ok(Decision { result: IdentificationResult::unmatched(name), container: None });
        };
        debug!(path = name, puid = %format.puid, "identified");
        Ok(Decision { result: IdentificationResult::matched(name, format, matches.collect()), container })
    }

    /// 预筛 + 逐个候选签名精确匹配
    fn match_windows(&self, w: &Windows, deadline: &Deadline) -> Result<Vec<SignatureHit>> {
        if w.is_empty() {
            return Ok(Vec::new());
        }
        let formats = self.catalog.formats();
        let seen = self.plan.seen_anchors(w);
        let mut hits = Vec::new();
        for (slot, &(format_idx, signature_idx)) in self.slots.iter().enumerate() {
            if !self.plan.admits(slot, &seen) {
                continue;
            }
            deadline.check()?;
            if let Some(span) = formats[format_idx].signatures[signature_idx].find_checked(w, deadline)? {
                hits.push(SignatureHit { format_idx, signature_idx, span });
            }
        }
        Ok(hits)
    }

    /// 检查容器签名；容器打不开时不视为错误（交由展开阶段报告）
    fn match_container_signatures(
        &self,
        name: &str,
        kind: ContainerKind,
        source: &Source,
        deadline: &Deadline,
    ) -> Result<Vec<SignatureHit>> {
        let Some(rules) = self.container_rules.get(&kind) else { return Ok(Vec::new()) };
        let names: HashSet<String> = match container::entry_names(kind, source, name, deadline) {
            Ok(n) => n.into_iter().collect(),
            Err(IdentifyError::ContainerOpen { reason, .. }) => {
                debug!(path = name, %reason, "container signatures skipped");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let formats = self.catalog.formats();
        let mut hits = Vec::new();
        for &fi in rules {
            for (ci, sig) in formats[fi].container_signatures.iter().enumerate() {
                if sig.container != kind || sig.files.is_empty() {
                    continue;
                }
                let mut ok = true;
                for file in &sig.files {
                    deadline.check()?;
                    if !names.contains(&file.path) {
                        ok = false;
                        break;
                    }
                    let Some(seq) = &file.sequence else { continue };
                    let buffer = self.options.container_buffer_size;
                    let found = match container::entry_windows(kind, source, name, &file.path, buffer, deadline) {
                        Ok(Some(w)) => seq.find_checked(&w, 0, deadline)?.is_some(),
                        Ok(None) => false,
                        Err(IdentifyError::ContainerOpen { .. } | IdentifyError::TargetUnreadable { .. }) => false,
                        Err(e) => return Err(e),
                    };
                    if !found {
                        ok = false;
                        break;
                    }
                }
                if ok {
                    hits.push(SignatureHit { format_idx: fi, signature_idx: ci, span: sig.files.len() as u64 });
                }
            }
        }
        Ok(resolve_priority(hits, &self.catalog))
    }

    /// 扩展名兜底：仅在启用且无签名命中时使用
    fn match_extension(&self, name: &str) -> Option<(FormatMatch, Vec<FormatMatch>)> {
        if !self.options.match_extensions {
            return None;
        }
        let base = name.rsplit("::").next().unwrap_or(name);
        let base = base.rsplit(['/', '\\']).next().unwrap_or(base);
        let (_, ext) = base.rsplit_once('.')?;
        let mut found = self
            .extensions
            .get(&ext.to_ascii_lowercase())?
            .iter()
            .map(|&fi| self.format_match(fi, None, MatchType::Extension));
        let first = found.next()?;
        Some((first, found.collect()))
    }

    fn signature_name(&self, hit: &SignatureHit) -> Option<String> {
        self.catalog.formats()[hit.format_idx].signatures[hit.signature_idx].name.clone()
    }

    fn format_match(&self, format_idx: usize, signature_name: Option<String>, match_type: MatchType) -> FormatMatch {
        let f = &self.catalog.formats()[format_idx];
        FormatMatch {
            puid: f.puid.clone(),
            format_name: f.name.clone(),
            version: f.version.clone(),
            signature_name,
            mime_type: f.mime.clone(),
            match_type,
        }
    }
}

/// 单目标错误 → 错误结果
pub(crate) fn failed(target: &str, err: IdentifyError) -> IdentificationResult {
    let error = err
        .to_target_error()
        .unwrap_or_else(|| TargetError { kind: ErrorKind::TargetUnreadable, message: err.to_string() });
    IdentificationResult::error(target, error)
}

/// 容器内条目重名时追加 `~N`，保证限定名唯一
#[derive(Default)]
struct UniqueNames {
    used: HashSet<String>,
}

impl UniqueNames {
    fn claim(&mut self, name: String) -> String {
        if self.used.insert(name.clone()) {
            return name;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{name}~{n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;
    use std::io::{Cursor, Write};

    const CATALOG: &str = r#"
        [catalog]
        version = "t1"

        [[format]]
        puid = "fmt/1"
        name = "Generic Text"
        extensions = ["txt"]
        [[format.signature]]
        name = "text"
        [[format.signature.sequence]]
        anchor = "bof"
        pattern = "'hello'"

        [[format]]
        puid = "fmt/2"
        name = "Greeting"
        supersedes = ["fmt/1"]
        [[format.signature]]
        name = "greeting"
        [[format.signature.sequence]]
        pattern = "'he'"

        [[format]]
        puid = "fmt/3"
        name = "Trailer"
        mime = "application/x-trailer"
        [[format.signature]]
        [[format.signature.sequence]]
        anchor = "eof"
        pattern = "'END'"

        [[format]]
        puid = "x-fmt/263"
        name = "ZIP Format"
        container = "zip"
        [[format.signature]]
        name = "zip local header"
        [[format.signature.sequence]]
        pattern = "504B0304"

        [[format]]
        puid = "x-fmt/265"
        name = "Tape Archive Format"
        container = "tar"
        [[format.signature]]
        [[format.signature.sequence]]
        offset = 257
        pattern = "'ustar'"

        [[format]]
        puid = "fmt/412"
        name = "Word Document"
        [[format.container_signature]]
        name = "word container"
        container = "zip"
        [[format.container_signature.file]]
        path = "word/document.xml"
    "#;

    fn identifier(tweak: impl FnOnce(&mut IdentifyOptions)) -> Identifier {
        let mut opts = IdentifyOptions { buffer_size: 64, ..IdentifyOptions::default() };
        tweak(&mut opts);
        Identifier::new(Arc::new(Catalog::from_toml_str(CATALOG).unwrap()), opts).unwrap()
    }

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            let opts = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            w.start_file(*name, opts).unwrap();
            w.write_all(data).unwrap();
        }
        w.finish().unwrap().into_inner()
    }

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn rejects_zero_buffer() {
        let catalog = Arc::new(Catalog::from_toml_str(CATALOG).unwrap());
        let opts = IdentifyOptions { buffer_size: 0, ..IdentifyOptions::default() };
        assert!(matches!(Identifier::new(catalog, opts), Err(IdentifyError::InvalidOptions(_))));
    }

    #[test]
    fn empty_target_is_unmatched() {
        let id = identifier(|o| o.match_extensions = true);
        assert!(id.identify_bytes("empty.txt", b"").is_unmatched());
    }

    #[test]
    fn supersession_overrides_longer_span() {
        let r = identifier(|_| {}).identify_bytes("a", b"hello world");
        assert_eq!(r.puid(), Some("fmt/2"));
        match r.outcome {
            Outcome::Matched { format, alternatives } => {
                assert_eq!(format.signature_name.as_deref(), Some("greeting"));
                assert_eq!(alternatives.len(), 1);
                assert_eq!(alternatives[0].puid, "fmt/1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn include_and_exclude_restrict_candidates() {
        let only_text = identifier(|o| o.include_formats = ["fmt/1".to_string()].into());
        assert_eq!(only_text.identify_bytes("a", b"hello").puid(), Some("fmt/1"));

        let no_greeting = identifier(|o| o.exclude_formats = ["fmt/2".to_string()].into());
        assert_eq!(no_greeting.identify_bytes("a", b"hello").puid(), Some("fmt/1"));

        let nothing = identifier(|o| o.include_formats = ["fmt/3".to_string()].into());
        assert!(nothing.identify_bytes("a", b"hello").is_unmatched());
    }

    #[test]
    fn eof_signature_reads_suffix_window() {
        let id = identifier(|_| {});
        let mut data = vec![b'x'; 1000];
        data.extend_from_slice(b"END");
        let r = id.identify_bytes("big", &data);
        assert_eq!(r.puid(), Some("fmt/3"));
        assert_eq!(r.format().unwrap().mime_type.as_deref(), Some("application/x-trailer"));

        let streamed = id.identify_reader("stdin", Cursor::new(data));
        assert_eq!(streamed.puid(), Some("fmt/3"));
    }

    #[test]
    fn extension_fallback_only_when_enabled() {
        assert!(identifier(|_| {}).identify_bytes("notes.TXT", b"zzz").is_unmatched());
        let r = identifier(|o| o.match_extensions = true).identify_bytes("dir/notes.TXT", b"zzz");
        assert_eq!(r.puid(), Some("fmt/1"));
        assert_eq!(r.format().unwrap().match_type, MatchType::Extension);
    }

    #[test]
    fn container_signature_replaces_zip() {
        let data = zip_bytes(&[("word/document.xml", b"<w/>"), ("[Content_Types].xml", b"<t/>")]);
        let r = identifier(|_| {}).identify_bytes("a.docx", &data);
        let f = r.format().unwrap();
        assert_eq!(f.puid, "fmt/412");
        assert_eq!(f.match_type, MatchType::Container);
        assert_eq!(f.signature_name.as_deref(), Some("word container"));

        let plain = identifier(|o| o.container_signatures = false).identify_bytes("a.docx", &data);
        assert_eq!(plain.puid(), Some("x-fmt/263"));
    }

    #[test]
    fn archive_expands_to_entry_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        std::fs::write(&path, zip_bytes(&[("a.txt", b"hello"), ("sub/b.bin", b"??"), ("c.end", b"THE END")])).unwrap();
        let id = identifier(|_| {});

        let results = id.identify_archive(&path);
        let targets: Vec<String> = results.iter().map(|r| r.target.clone()).collect();
        let prefix = path.to_string_lossy();
        assert_eq!(
            targets,
            [format!("{prefix}::a.txt"), format!("{prefix}::sub/b.bin"), format!("{prefix}::c.end")]
        );
        assert_eq!(results[0].puid(), Some("fmt/2"));
        assert!(results[1].is_unmatched());
        assert_eq!(results[2].puid(), Some("fmt/3"));

        // 不展开时仅一条结果
        assert_eq!(id.identify(&path).len(), 1);
        assert_eq!(id.identify_file(&path).puid(), Some("x-fmt/263"));

        let reporting = identifier(|o| o.report_containers = true);
        let all = reporting.identify_archive(&path);
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].target, prefix);
    }

    #[test]
    fn duplicate_entry_names_are_suffixed() {
        let data = tar_bytes(&[("same.txt", b"hello"), ("same.txt", b"hello again")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dups.tar");
        std::fs::write(&path, data).unwrap();
        // tar 魔数位于偏移 257，窗口需覆盖到那里
        let results = identifier(|o| o.buffer_size = 1024).identify_archive(&path);
        let targets: Vec<&str> = results.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets.len(), 2);
        assert!(targets[0].ends_with("::same.txt"));
        assert!(targets[1].ends_with("::same.txt~1"));
    }

    #[test]
    fn nested_archives_recurse_until_limit() {
        let inner = zip_bytes(&[("deep.txt", b"hello")]);
        let outer = zip_bytes(&[("inner.zip", &inner)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outer.zip");
        std::fs::write(&path, outer).unwrap();

        let results = identifier(|_| {}).identify_archive(&path);
        assert_eq!(results.len(), 1);
        assert!(results[0].target.ends_with("outer.zip::inner.zip::deep.txt"));

        let capped = identifier(|o| o.max_nesting_depth = 1).identify_archive(&path);
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].puid(), Some("x-fmt/263"));
        assert!(capped[0].target.ends_with("outer.zip::inner.zip"));
    }

    #[test]
    fn corrupt_container_reports_one_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        std::fs::write(&path, b"PK\x03\x04 this is not really a zip").unwrap();
        let results = identifier(|_| {}).identify_archive(&path);
        assert_eq!(results.len(), 1);
        match &results[0].outcome {
            Outcome::Error(e) => assert_eq!(e.kind, ErrorKind::ContainerOpen),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_and_cancelled_targets_are_errors() {
        let id = identifier(|_| {});
        let missing = id.identify_file(Path::new("/no/such/file.bin"));
        assert!(matches!(&missing.outcome, Outcome::Error(e) if e.kind == ErrorKind::TargetUnreadable));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let results = id.identify_path(&path, false, Some(&token));
        assert!(matches!(&results[0].outcome, Outcome::Error(e) if e.kind == ErrorKind::Cancelled));
    }

    #[test]
    fn unique_names_skip_taken_suffixes() {
        let mut names = UniqueNames::default();
        assert_eq!(names.claim("a~1".into()), "a~1");
        assert_eq!(names.claim("a".into()), "a");
        assert_eq!(names.claim("a".into()), "a~2");
    }
}
