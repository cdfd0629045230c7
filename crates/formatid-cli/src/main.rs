use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use formatid_core::{
    engine_version, scan_and_write, write_result, Catalog, IdentifyOptions, Identifier, OutputFormat, ResultOrder,
    ScanOptions,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "formatid", version, about = "按字节签名识别文件格式（PRONOM PUID）")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// 目录与配置相关参数（各子命令共用）
#[derive(Args, Debug)]
struct CatalogArgs {
    /// 配置目录（含 versions.toml 与签名文件）；缺省使用内置目录
    #[arg(long)]
    confdir: Option<PathBuf>,

    /// 额外加载的签名文件（逗号分隔），同 PUID 覆盖
    #[arg(long, value_delimiter = ',')]
    loadformats: Vec<PathBuf>,

    /// 识别选项文件（TOML），命令行参数在其之上覆盖
    #[arg(long)]
    config: Option<PathBuf>,

    /// 只输出警告及以上日志
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 识别文件、目录或标准输入（`-`）
    Identify {
        /// 目标路径；`-` 表示标准输入
        targets: Vec<PathBuf>,

        #[command(flatten)]
        catalog: CatalogArgs,

        /// 递归进入子目录
        #[arg(short, long)]
        recurse: bool,

        /// 展开 ZIP / TAR / GZIP 容器并识别其中条目
        #[arg(long)]
        zip: bool,

        /// 禁用容器签名（如 DOCX 只识别为 ZIP）
        #[arg(long)]
        nocontainer: bool,

        /// 仅匹配这些 PUID（逗号分隔）
        #[arg(long, value_delimiter = ',')]
        useformats: Vec<String>,

        /// 永不匹配这些 PUID（逗号分隔）
        #[arg(long, value_delimiter = ',')]
        nouseformats: Vec<String>,

        /// 前缀/后缀窗口大小（字节）
        #[arg(long)]
        bufsize: Option<usize>,

        /// 容器条目窗口大小（字节）
        #[arg(long)]
        container_bufsize: Option<usize>,

        /// 目标列表文件，每行一个路径
        #[arg(long)]
        input: Option<PathBuf>,

        /// 标准输入的显示名
        #[arg(long, default_value = "STDIN")]
        filename: String,

        /// 线程数（"auto"=CPU 核心数）
        #[arg(long, default_value = "auto")]
        threads: String,

        /// 按完成顺序输出（不保证与输入顺序一致）
        #[arg(long)]
        unordered: bool,

        /// 单目标时间预算（毫秒）
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// 输出格式
        #[arg(long, value_enum, default_value_t = Format::Csv)]
        format: Format,

        /// 无签名命中时按扩展名兜底
        #[arg(long)]
        extensions: bool,

        /// 展开容器时同时输出容器本身的结果
        #[arg(long)]
        report_containers: bool,

        /// 输出文件；缺省写到标准输出
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// 列出目录中的格式（可按 PUID 过滤）
    Formats {
        puids: Vec<String>,

        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// 打印引擎与签名目录版本
    Version {
        #[command(flatten)]
        catalog: CatalogArgs,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Csv,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Csv => OutputFormat::Csv,
            Format::Json => OutputFormat::Json,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let quiet = match &cli.command {
        Commands::Identify { catalog, .. } | Commands::Formats { catalog, .. } | Commands::Version { catalog } => {
            catalog.quiet
        }
    };
    // 初始化日志（支持通过 RUST_LOG 控制等级，例如 info、debug）
    init_tracing(quiet);

    match cli.command {
        Commands::Identify {
            targets,
            catalog,
            recurse,
            zip,
            nocontainer,
            useformats,
            nouseformats,
            bufsize,
            container_bufsize,
            input,
            filename,
            threads,
            unordered,
            timeout_ms,
            format,
            extensions,
            report_containers,
            output,
        } => {
            let mut opts = base_options(&catalog)?;
            opts.expand_containers |= zip;
            opts.container_signatures &= !nocontainer;
            opts.include_formats.extend(useformats);
            opts.exclude_formats.extend(nouseformats);
            if let Some(n) = bufsize {
                opts.buffer_size = n;
            }
            if let Some(n) = container_bufsize {
                opts.container_buffer_size = n;
            }
            if timeout_ms.is_some() {
                opts.timeout_ms = timeout_ms;
            }
            opts.match_extensions |= extensions;
            opts.report_containers |= report_containers;

            let identifier = Identifier::open(opts).context("load signature catalog")?;

            let mut targets = targets;
            if let Some(list) = &input {
                targets.extend(read_target_list(list)?);
            }
            if targets.is_empty() {
                bail!("no targets given (pass paths, `-` for stdin, or --input <list>)");
            }
            let (stdin_targets, paths): (Vec<PathBuf>, Vec<PathBuf>) =
                targets.into_iter().partition(|p| p.as_os_str() == "-");

            let mut out: Box<dyn Write> = match &output {
                Some(p) => Box::new(BufWriter::new(File::create(p).with_context(|| format!("create output file {}", p.display()))?)),
                None => Box::new(BufWriter::new(io::stdout().lock())),
            };
            let format = OutputFormat::from(format);

            // 标准输入只能读取一次，且先于其他目标处理
            if !stdin_targets.is_empty() {
                if stdin_targets.len() > 1 {
                    warn!("stdin given more than once, reading it once");
                }
                let result = identifier.identify_reader(&filename, io::stdin().lock());
                write_result(&mut *out, &result, format).context("write stdin result")?;
            }

            if !paths.is_empty() {
                let scan = ScanOptions {
                    recursive: recurse,
                    expand_archives: None,
                    threads: parse_threads(&threads),
                    order: if unordered { ResultOrder::Completion } else { ResultOrder::Input },
                    cancel: None,
                };
                let stats = scan_and_write(&identifier, &paths, &mut *out, &scan, format).context("scan and write failed")?;
                info!(
                    targets_scanned = stats.targets_scanned,
                    outputs_written = stats.outputs_written,
                    errors = stats.errors,
                    "identify finished"
                );
            }
            out.flush().context("flush output")?;
        }

        Commands::Formats { puids, catalog } => {
            let catalog = open_catalog(&catalog)?;
            let mut out = BufWriter::new(io::stdout().lock());
            let listing = catalog.known_formats(&puids);
            for puid in puids.iter().filter(|p| catalog.get(p).is_none()) {
                warn!(%puid, "unknown puid");
            }
            for (_, display) in listing {
                writeln!(out, "{display}")?;
            }
            out.flush()?;
        }

        Commands::Version { catalog } => {
            let catalog = open_catalog(&catalog)?;
            let mut out = io::stdout().lock();
            writeln!(out, "formatid {}", engine_version())?;
            writeln!(out, "catalog version: {}", catalog.version())?;
            writeln!(out, "signature file: {}", catalog.signature_file_name())?;
        }
    }

    Ok(())
}

fn base_options(args: &CatalogArgs) -> Result<IdentifyOptions> {
    let mut opts = match &args.config {
        Some(p) => IdentifyOptions::from_toml_file(p)?,
        None => IdentifyOptions::default(),
    };
    if let Some(dir) = &args.confdir {
        opts.conf_dir = Some(dir.clone());
    }
    opts.catalog_paths.extend(args.loadformats.iter().cloned());
    opts.quiet |= args.quiet;
    Ok(opts)
}

fn open_catalog(args: &CatalogArgs) -> Result<Catalog> {
    let opts = base_options(args)?;
    Catalog::open(&opts).context("load signature catalog")
}

/// 读取目标列表：每行一个路径，忽略空行
fn read_target_list(path: &Path) -> Result<Vec<PathBuf>> {
    let txt = std::fs::read_to_string(path).with_context(|| format!("read input list {}", path.display()))?;
    Ok(txt
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}

fn init_tracing(quiet: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    // 结果写标准输出，日志写标准错误
    let default = if quiet { "warn" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 解析线程参数
fn parse_threads(s: &str) -> Option<usize> {
    if s.eq_ignore_ascii_case("auto") {
        return None;
    }
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    }
}
