//! 扫描主流程与并行调度
//!
//! - `Scan`：惰性迭代器，按遍历顺序逐个产出结果；对同一组目标再次调用即重新扫描。
//! - `scan_and_write`：线程数 > 1 时由生产者线程遍历目标，Rayon 线程池并行识别，
//!   调用线程上的 Writer 按输入序号重排（或按完成顺序）流式写出。
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancellationToken;
use crate::engine::{failed, Identifier};
use crate::error::{ErrorKind, IdentifyError, TargetError};
use crate::options::{ResultOrder, ScanOptions, ScanStats};
use crate::output::{write_result, OutputFormat};
use crate::types::IdentificationResult;

/// 遍历产出的单个任务
pub(crate) enum Job {
    File(PathBuf),
    /// 遍历阶段即失败的目标（不存在、无权限等）
    Failed(IdentificationResult),
}

/// 目标遍历：文件直接产出，目录按文件名深度优先展开
pub(crate) struct Targets {
    roots: std::vec::IntoIter<PathBuf>,
    walker: Option<walkdir::IntoIter>,
    recursive: bool,
    /// 已进入的目录（规范化路径），符号链接重复到达时跳过
    visited: HashSet<PathBuf>,
}

impl Targets {
    pub(crate) fn new(roots: Vec<PathBuf>, recursive: bool) -> Self {
        Self { roots: roots.into_iter(), walker: None, recursive, visited: HashSet::new() }
    }

    fn open_root(&mut self, root: PathBuf) -> Option<Job> {
        let md = match fs::metadata(&root) {
            Ok(md) => md,
            Err(e) => {
                let name = root.to_string_lossy().into_owned();
                return Some(Job::Failed(failed(&name, IdentifyError::unreadable(name.clone(), e))));
            }
        };
        if !md.is_dir() {
            return Some(Job::File(root));
        }
        if let Ok(canonical) = fs::canonicalize(&root) {
            self.visited.insert(canonical);
        }
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        self.walker = Some(
            WalkDir::new(&root)
                .min_depth(1)
                .max_depth(max_depth)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter(),
        );
        None
    }
}

impl Iterator for Targets {
    type Item = Job;

    fn next(&mut self) -> Option<Job> {
        loop {
            let Some(walker) = self.walker.as_mut() else {
                let root = self.roots.next()?;
                if let Some(job) = self.open_root(root) {
                    return Some(job);
                }
                continue;
            };
            match walker.next() {
                None => self.walker = None,
                Some(Ok(entry)) => {
                    let ft = entry.file_type();
                    if ft.is_dir() {
                        let repeated = fs::canonicalize(entry.path())
                            .map(|c| !self.visited.insert(c))
                            .unwrap_or(false);
                        if repeated {
                            debug!(path = %entry.path().display(), "directory already visited, skipping");
                            walker.skip_current_dir();
                        }
                    } else if ft.is_file() {
                        return Some(Job::File(entry.into_path()));
                    } else {
                        debug!(path = %entry.path().display(), "not a regular file, skipping");
                    }
                }
                Some(Err(e)) => {
                    if e.loop_ancestor().is_some() {
                        warn!(error = %e, "symlink cycle, skipping");
                        continue;
                    }
                    let path = e.path().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
                    warn!(path = %path, error = %e, "walk error");
                    let error = TargetError { kind: ErrorKind::TargetUnreadable, message: e.to_string() };
                    return Some(Job::Failed(IdentificationResult::error(path, error)));
                }
            }
        }
    }
}

fn run_job(identifier: &Identifier, job: Job, expand: bool, cancel: Option<&CancellationToken>) -> Vec<IdentificationResult> {
    match job {
        Job::File(path) => identifier.identify_path(&path, expand, cancel),
        Job::Failed(result) => vec![result],
    }
}

/// 惰性结果迭代器
pub struct Scan<'a> {
    identifier: &'a Identifier,
    targets: Targets,
    expand: bool,
    cancel: Option<CancellationToken>,
    queue: VecDeque<IdentificationResult>,
}

impl Iterator for Scan<'_> {
    type Item = IdentificationResult;

    fn next(&mut self) -> Option<IdentificationResult> {
        loop {
            if let Some(r) = self.queue.pop_front() {
                return Some(r);
            }
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return None;
            }
            let job = self.targets.next()?;
            self.queue.extend(run_job(self.identifier, job, self.expand, self.cancel.as_ref()));
        }
    }
}

impl Identifier {
    /// 扫描一组目标（文件或目录），按遍历顺序惰性产出结果
    pub fn scan<I, P>(&self, targets: I, options: ScanOptions) -> Scan<'_>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = targets.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        Scan {
            identifier: self,
            targets: Targets::new(roots, options.recursive),
            expand: options.expand_archives.unwrap_or(self.options().expand_containers),
            cancel: options.cancel,
            queue: VecDeque::new(),
        }
    }

    /// 扫描目录：`recursive = false` 时只处理直接子文件
    pub fn identify_folder(&self, path: &Path, recursive: bool, expand_archives: bool) -> Scan<'_> {
        let options = ScanOptions { recursive, expand_archives: Some(expand_archives), ..ScanOptions::default() };
        self.scan([path], options)
    }
}

fn tally(stats: &mut ScanStats, r: &IdentificationResult) {
    if r.is_matched() {
        stats.matched += 1;
    } else if r.is_unmatched() {
        stats.unmatched += 1;
    } else {
        stats.errors += 1;
    }
    stats.outputs_written += 1;
}

fn emit(out: &mut dyn Write, results: &[IdentificationResult], format: OutputFormat, stats: &mut ScanStats) -> Result<()> {
    stats.targets_scanned += 1;
    for r in results {
        write_result(out, r, format).with_context(|| format!("write result for {}", r.target))?;
        tally(stats, r);
    }
    Ok(())
}

/// 扫描目标并将结果按行流式写入 `out`
/// 顺序保证：`ResultOrder::Input` 下输出顺序与串行遍历完全一致
pub fn scan_and_write(
    identifier: &Identifier,
    targets: &[PathBuf],
    out: &mut dyn Write,
    options: &ScanOptions,
    format: OutputFormat,
) -> Result<ScanStats> {
    let threads = options.threads.unwrap_or_else(num_cpus::get).max(1);
    let quiet = identifier.options().quiet;
    if quiet {
        debug!(targets = targets.len(), threads, recursive = options.recursive, "scan started");
    } else {
        info!(targets = targets.len(), threads, recursive = options.recursive, "scan started");
    }

    let mut stats = ScanStats::default();
    if threads > 1 {
        scan_and_write_parallel(identifier, targets, out, options, format, threads, &mut stats)?;
    } else {
        let expand = options.expand_archives.unwrap_or(identifier.options().expand_containers);
        let cancel = options.cancel.as_ref();
        for job in Targets::new(targets.to_vec(), options.recursive) {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                break;
            }
            let results = run_job(identifier, job, expand, cancel);
            emit(out, &results, format, &mut stats)?;
        }
    }
    out.flush().context("flush output")?;

    if quiet {
        debug!(targets_scanned = stats.targets_scanned, errors = stats.errors, "scan finished");
    } else {
        info!(
            targets_scanned = stats.targets_scanned,
            matched = stats.matched,
            unmatched = stats.unmatched,
            errors = stats.errors,
            "scan finished"
        );
    }
    Ok(stats)
}

/// 并行调度：
/// - 生产者线程遍历目标，经有界通道交给 Rayon 线程池
/// - 单线程 Writer 按序号重排并流式写出，保证稳定顺序
fn scan_and_write_parallel(
    identifier: &Identifier,
    targets: &[PathBuf],
    out: &mut dyn Write,
    options: &ScanOptions,
    format: OutputFormat,
    threads: usize,
    stats: &mut ScanStats,
) -> Result<()> {
    use crossbeam_channel as channel;
    use rayon::prelude::*;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("build rayon pool")?;
    let expand = options.expand_archives.unwrap_or(identifier.options().expand_containers);
    let cancel = options.cancel.clone();
    // Writer 出错时通知生产者与工作线程停止
    let stop = CancellationToken::new();
    let walker = Targets::new(targets.to_vec(), options.recursive);

    std::thread::scope(|s| -> Result<()> {
        type Msg = (usize /*idx*/, Vec<IdentificationResult>);
        let (job_tx, job_rx) = channel::bounded::<(usize, Job)>(threads * 4);
        let (res_tx, res_rx) = channel::bounded::<Msg>(256);

        let producer_stop = stop.clone();
        let producer_cancel = cancel.clone();
        s.spawn(move || {
            for (idx, job) in walker.enumerate() {
                if producer_stop.is_cancelled() || producer_cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                    break;
                }
                if job_tx.send((idx, job)).is_err() {
                    break;
                }
            }
            // job_tx 在此丢弃，工作线程随之结束
        });

        let worker_stop = stop.clone();
        let worker_cancel = cancel.clone();
        s.spawn(move || {
            pool.install(|| {
                job_rx.into_iter().par_bridge().for_each(|(idx, job)| {
                    if worker_stop.is_cancelled() {
                        return;
                    }
                    let results = run_job(identifier, job, expand, worker_cancel.as_ref());
                    let _ = res_tx.send((idx, results));
                });
            });
        });

        let written = (|| -> Result<()> {
            match options.order {
                ResultOrder::Completion => {
                    for (_, results) in res_rx.iter() {
                        emit(out, &results, format, stats)?;
                    }
                }
                ResultOrder::Input => {
                    let mut next_idx: usize = 0;
                    let mut buffer: BTreeMap<usize, Vec<IdentificationResult>> = BTreeMap::new();
                    for (idx, results) in res_rx.iter() {
                        buffer.insert(idx, results);
                        while let Some(results) = buffer.remove(&next_idx) {
                            emit(out, &results, format, stats)?;
                            next_idx += 1;
                        }
                    }
                    // 取消时序号可能出现空洞：剩余部分按序号写出
                    for (_, results) in std::mem::take(&mut buffer) {
                        emit(out, &results, format, stats)?;
                    }
                }
            }
            Ok(())
        })();

        if written.is_err() {
            stop.cancel();
        }
        drop(res_rx);
        written
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::options::IdentifyOptions;
    use crate::output::parse_lines;
    use std::sync::Arc;

    const CATALOG: &str = r#"
        [[format]]
        puid = "fmt/10"
        name = "Alpha"
        [[format.signature]]
        [[format.signature.sequence]]
        pattern = "'ALPHA'"

        [[format]]
        puid = "fmt/11"
        name = "Beta"
        [[format.signature]]
        [[format.signature.sequence]]
        pattern = "'BETA'"
    "#;

    fn identifier() -> Identifier {
        identifier_with(IdentifyOptions::default())
    }

    fn identifier_with(opts: IdentifyOptions) -> Identifier {
        let catalog = Arc::new(Catalog::from_toml_str(CATALOG).unwrap());
        Identifier::new(catalog, opts).unwrap()
    }

    /// 收集日志输出
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn info_log_of(id: &Identifier, targets: &[PathBuf]) -> String {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        let opts = ScanOptions { threads: Some(1), ..ScanOptions::default() };
        tracing::subscriber::with_default(subscriber, || {
            scan_and_write(id, targets, &mut Vec::<u8>::new(), &opts, OutputFormat::Csv).unwrap();
        });
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.bin"), b"BETA!").unwrap();
        fs::write(dir.path().join("a.bin"), b"ALPHA!").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/c.bin"), b"nothing").unwrap();
        for i in 0..20 {
            fs::write(dir.path().join(format!("sub/n{i:02}.bin")), if i % 2 == 0 { &b"ALPHA"[..] } else { &b"BETA"[..] }).unwrap();
        }
        dir
    }

    #[test]
    fn folder_scan_is_sorted_and_respects_recursion() {
        let dir = tree();
        let id = identifier();
        let flat: Vec<IdentificationResult> = id.identify_folder(dir.path(), false, false).collect();
        let names: Vec<String> = flat
            .iter()
            .map(|r| Path::new(&r.target).file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.bin", "b.bin"]);
        assert_eq!(flat[0].puid(), Some("fmt/10"));
        assert_eq!(flat[1].puid(), Some("fmt/11"));

        let deep: Vec<_> = id.identify_folder(dir.path(), true, false).collect();
        assert_eq!(deep.len(), 23);
    }

    #[test]
    fn quiet_option_keeps_scan_progress_below_info() {
        let dir = tree();
        let targets = [dir.path().join("a.bin")];
        let loud = info_log_of(&identifier(), &targets);
        assert!(loud.contains("scan started"));
        assert!(loud.contains("scan finished"));

        let quiet = identifier_with(IdentifyOptions { quiet: true, ..IdentifyOptions::default() });
        let silent = info_log_of(&quiet, &targets);
        assert!(!silent.contains("scan started"));
        assert!(!silent.contains("scan finished"));
    }

    #[test]
    fn scan_restarts_and_reports_missing_targets() {
        let dir = tree();
        let id = identifier();
        let targets = [dir.path().join("a.bin"), dir.path().join("missing.bin")];
        let first: Vec<_> = id.scan(&targets, ScanOptions::default()).collect();
        let second: Vec<_> = id.scan(&targets, ScanOptions::default()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(first[1].is_error());
    }

    #[test]
    fn cancelled_scan_stops_early() {
        let dir = tree();
        let token = CancellationToken::new();
        token.cancel();
        let opts = ScanOptions { recursive: true, cancel: Some(token), ..ScanOptions::default() };
        assert_eq!(identifier().scan([dir.path()], opts).count(), 0);
    }

    #[test]
    fn parallel_output_matches_sequential() {
        let dir = tree();
        let id = identifier();
        let targets = vec![dir.path().to_path_buf()];

        let mut seq = Vec::new();
        let seq_opts = ScanOptions { recursive: true, threads: Some(1), ..ScanOptions::default() };
        let seq_stats = scan_and_write(&id, &targets, &mut seq, &seq_opts, OutputFormat::Csv).unwrap();

        let mut par = Vec::new();
        let par_opts = ScanOptions { recursive: true, threads: Some(4), ..ScanOptions::default() };
        let par_stats = scan_and_write(&id, &targets, &mut par, &par_opts, OutputFormat::Csv).unwrap();

        assert_eq!(String::from_utf8(seq.clone()).unwrap(), String::from_utf8(par).unwrap());
        assert_eq!(seq_stats.outputs_written, 23);
        assert_eq!(par_stats.matched, 22);
        assert_eq!(par_stats.unmatched, 1);

        let lines = parse_lines(&String::from_utf8(seq).unwrap()).unwrap();
        assert_eq!(lines.len(), 23);
    }

    #[test]
    fn completion_order_writes_every_result() {
        let dir = tree();
        let opts = ScanOptions {
            recursive: true,
            threads: Some(3),
            order: ResultOrder::Completion,
            ..ScanOptions::default()
        };
        let mut buf = Vec::new();
        let stats = scan_and_write(&identifier(), &[dir.path().to_path_buf()], &mut buf, &opts, OutputFormat::Json).unwrap();
        assert_eq!(stats.outputs_written, 23);
        assert_eq!(String::from_utf8(buf).unwrap().lines().count(), 23);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_terminate() {
        let dir = tree();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub/loop")).unwrap();
        let results: Vec<_> = identifier().identify_folder(dir.path(), true, false).collect();
        assert_eq!(results.len(), 23);
    }
}
