// CamVault - 手机相册增量备份工具
//
// 主程序入口，负责命令行参数解析和备份流程协调
//
// 功能特性：
// - 增量备份：已备份的内容（按 SHA-256 判断）不会再次复制
// - 按拍摄日期归档：<备份目录>/<年>/<年-月-日>/<文件名>
// - 原子写入：中断的运行不会留下半个文件
// - 交互式设备选择：自动发现挂载的设备并保存为配置

use anyhow::{Context, Result};
use camvault::cli::{is_mounted, resolve_requested, select_device};
use camvault::config::{BackupConfig, Overrides};
use camvault::device::{default_search_paths, discover_devices, Device};
use camvault::executor::BackupExecutor;
use camvault::fingerprint::FingerprintIndex;
use camvault::listing::{list_files, ListOptions};
use camvault::logging::init_logging;
use camvault::progress::{ConsoleReporter, ProgressEvent, ProgressObserver};
use camvault::store::AppConfig;
use camvault::utils::{expand_tilde, format_bytes, format_duration};
use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

/// 子命令枚举
#[derive(Subcommand, Debug)]
enum Commands {
    /// 备份设备上的照片和视频（默认）
    Backup,

    /// 列出已保存和自动发现的设备
    Devices,

    /// 连接设备并显示设备信息
    Info,

    /// 列出设备上的文件
    Files {
        /// 起始目录
        #[arg(value_name = "PATH", default_value = "/")]
        path: String,

        /// 显示大小和修改时间
        #[arg(long)]
        details: bool,

        /// 只列出照片和视频
        #[arg(long)]
        photos_only: bool,

        /// 只列出当前目录
        #[arg(long)]
        no_recursive: bool,
    },

    /// 查看备份目录的指纹索引
    Fingerprints {
        #[command(subcommand)]
        action: FingerprintAction,
    },
}

#[derive(Subcommand, Debug)]
enum FingerprintAction {
    /// 列出所有已备份文件及其哈希
    List,

    /// 显示索引统计
    Stats,

    /// 检查本地文件是否已经备份过
    Check {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// 命令行参数结构体
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 子命令
    #[command(subcommand)]
    command: Option<Commands>,

    /// 配置文件路径
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 备份目录（覆盖配置文件）
    #[arg(short = 'd', long = "backup-dir", global = true, value_name = "DIR")]
    backup_dir: Option<PathBuf>,

    /// 设备名称或挂载路径
    #[arg(long, global = true, value_name = "NAME|PATH")]
    device: Option<String>,

    /// 额外的排除模式（Glob 风格，可重复）
    #[arg(long, global = true, value_name = "GLOB")]
    exclude: Vec<String>,

    /// 显示详细输出
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// 程序入口
fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => AppConfig::default_path()?,
    };
    let mut app = AppConfig::load_from(&config_path)?;

    let log_file = app.logging.file.as_deref().map(expand_tilde);
    let _log_guard = init_logging(&app.logging.level, args.verbose, log_file.as_deref())?;

    match &args.command {
        None | Some(Commands::Backup) => run_backup(&args, &mut app, &config_path),
        Some(Commands::Devices) => list_devices(&app),
        Some(Commands::Info) => show_device_info(&args, &mut app, &config_path),
        Some(Commands::Files {
            path,
            details,
            photos_only,
            no_recursive,
        }) => {
            let options = ListOptions {
                recursive: !no_recursive,
                media_only: *photos_only,
            };
            list_device_files(&args, &mut app, &config_path, path, *details, &options)
        }
        Some(Commands::Fingerprints { action }) => run_fingerprints(&args, &app, action),
    }
}

fn overrides(args: &Args, device_backup_dir: Option<PathBuf>) -> Overrides {
    Overrides {
        backup_directory: args.backup_dir.clone().or(device_backup_dir),
        exclude_patterns: args.exclude.clone(),
    }
}

fn print_header() {
    println!(
        "{}",
        style(format!("CamVault Photo Backup v{}", env!("CARGO_PKG_VERSION")))
            .cyan()
            .bold()
    );
}

/// 执行备份操作
fn run_backup(args: &Args, app: &mut AppConfig, config_path: &Path) -> Result<()> {
    print_header();

    let Some(selected) = select_device(app, config_path, args.device.as_deref())? else {
        return Ok(());
    };
    let config = BackupConfig::resolve(app, &overrides(args, selected.backup_directory))?;

    println!("Device: {:?}", style(selected.device.mount_point()).blue());
    println!("Dest:   {:?}", style(&config.backup_directory).blue());
    println!("{}", style("----------------------------------------").dim());

    let start_time = Instant::now();
    let reporter = Rc::new(ConsoleReporter::new(args.verbose));
    let observer = Rc::clone(&reporter);

    let mut executor = BackupExecutor::new(config, selected.device)
        .with_observer(move |event: &ProgressEvent| observer.on_progress(event));
    let result = executor.run_backup();
    reporter.finish();
    let stats = result.context("Backup aborted")?;

    println!("{}", style("----------------------------------------").dim());
    if stats.is_up_to_date() {
        println!("{}", style("All photos are already backed up.").green().bold());
    } else {
        println!("{}", style("Backup Completed!").green().bold());
    }
    println!("Total Found:       {}", stats.total_candidates);
    println!("Backed Up (New):   {}", style(stats.newly_backed_up).green());
    if stats.renamed > 0 {
        println!("  of which renamed: {}", style(stats.renamed).yellow());
    }
    println!("Skipped (Exists):  {}", style(stats.skipped_existing_path).dim());
    println!("Skipped (Dup):     {}", style(stats.skipped_duplicate_content).dim());
    if stats.excluded > 0 {
        println!("Excluded:          {}", style(stats.excluded).dim());
    }
    println!("Errors:            {}", style(stats.errors).red().bold());
    println!("Data Transferred:  {}", style(format_bytes(stats.bytes_copied)).cyan());
    println!(
        "Total Duration:    {}",
        style(format_duration(start_time.elapsed().as_secs())).bold()
    );

    if stats.stale_temp_files_removed > 0 {
        println!(
            "Cleaned up:        {} leftover temp file(s) from an interrupted run",
            stats.stale_temp_files_removed
        );
    }

    if stats.errors > 0 {
        println!(
            "{} {} file(s) could not be backed up, run again to retry.",
            style("Warning:").yellow(),
            stats.errors
        );
    }
    Ok(())
}

/// 列出已保存和自动发现的设备
fn list_devices(app: &AppConfig) -> Result<()> {
    println!("{}", style("Configured devices:").bold());
    if app.devices.is_empty() {
        println!("  {}", style("(none)").dim());
    }
    for (name, profile) in &app.devices {
        let mount_point = expand_tilde(&profile.mount_point);
        let state = if is_mounted(&mount_point) {
            style("connected").green()
        } else {
            style("not mounted").dim()
        };
        println!("  {} ({}) [{}]", name, mount_point.display(), state);
        if let Some(dir) = &profile.backup_directory {
            println!("      backup directory: {}", dir.display());
        }
    }

    let discovered = discover_devices(&default_search_paths());
    println!("{}", style("Discovered devices:").bold());
    if discovered.is_empty() {
        println!("  {}", style("(none)").dim());
    }
    for device in &discovered {
        println!("  {} ({})", device.name(), device.mount_point().display());
    }
    Ok(())
}

/// 连接设备并显示设备信息
fn show_device_info(args: &Args, app: &mut AppConfig, config_path: &Path) -> Result<()> {
    let Some(selected) = select_device(app, config_path, args.device.as_deref())? else {
        return Ok(());
    };
    let mut device = selected.device;
    let info = device.connect().context("Failed to connect to device")?;

    println!("Name:        {}", style(&info.name).cyan());
    println!("Location:    {}", info.location);
    println!(
        "Camera roll: {}",
        if info.camera_roll_present {
            style("present").green()
        } else {
            style("missing").red()
        }
    );
    println!("Entries:     {}", info.top_level_entries);
    Ok(())
}

/// 列出设备上的文件
fn list_device_files(
    args: &Args,
    app: &mut AppConfig,
    config_path: &Path,
    path: &str,
    details: bool,
    options: &ListOptions,
) -> Result<()> {
    let Some(selected) = select_device(app, config_path, args.device.as_deref())? else {
        return Ok(());
    };
    let config = BackupConfig::resolve(app, &overrides(args, selected.backup_directory))?;
    let mut device = selected.device;
    device.connect().context("Failed to connect to device")?;

    println!("Scanning {} on {}", style(path).blue(), style(device.name()).cyan());
    let listing = list_files(&device, path, &config.media_extensions, options)
        .with_context(|| format!("Failed to list {}", path))?;

    if listing.files.is_empty() {
        println!("{}", style("No files found").yellow());
    }
    for file in &listing.files {
        let marker = if file.is_media {
            style("media").green()
        } else {
            style("other").dim()
        };
        println!("[{}] {}", marker, file.path);
        if details {
            let modified = file
                .modified_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "        {:>10} | modified {} | ext {}",
                format_bytes(file.size_bytes),
                modified,
                if file.extension.is_empty() { "-" } else { file.extension.as_str() }
            );
        }
    }

    let stats = &listing.stats;
    println!("{}", style("----------------------------------------").dim());
    println!("Directories:  {}", stats.total_dirs);
    println!("Files:        {}", stats.total_files);
    println!("Photo/Video:  {}", style(stats.media_files).green());
    println!("Other:        {}", stats.other_files);
    println!("Total Size:   {}", style(format_bytes(stats.total_bytes)).cyan());
    if stats.errors > 0 {
        println!("Errors:       {}", style(stats.errors).red().bold());
    }
    Ok(())
}

/// 查看备份目录的指纹索引
fn run_fingerprints(args: &Args, app: &AppConfig, action: &FingerprintAction) -> Result<()> {
    // 不需要连接设备，只使用设备条目中的备份目录
    let device_dir = match &args.device {
        Some(requested) => resolve_requested(app, requested)?.backup_directory,
        None => None,
    };
    let config = BackupConfig::resolve(app, &overrides(args, device_dir))?;
    let index = FingerprintIndex::new(config.backup_directory.clone(), config.media_extensions.clone());

    let report = index.ensure_built();
    if report.unreadable > 0 {
        println!(
            "{} {} archived file(s) could not be read",
            style("Warning:").yellow(),
            report.unreadable
        );
    }

    match action {
        FingerprintAction::List => {
            for fp in index.fingerprints() {
                println!(
                    "{}  {:>10}  {}",
                    style(fp.content_hash.short()).dim(),
                    format_bytes(fp.size_bytes),
                    fp.destination_path.display()
                );
            }
        }
        FingerprintAction::Stats => {
            let stats = index.stats();
            println!("Backup directory: {:?}", style(index.destination()).blue());
            println!("Archived files:   {}", style(stats.file_count).cyan());
            println!("Total size:       {}", style(format_bytes(stats.total_size_bytes)).cyan());
        }
        FingerprintAction::Check { file } => {
            let bytes = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
            let check = index.check_duplicate(&bytes);
            match check.existing {
                Some(existing) => println!(
                    "{} already backed up as {:?}",
                    style("Duplicate:").green(),
                    existing.destination_path
                ),
                None => println!(
                    "{} not in backup (sha256 {})",
                    style("New:").yellow(),
                    check.hash
                ),
            }
        }
    }
    Ok(())
}
