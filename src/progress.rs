// CamVault - 进度通知模块
// 备份核心在固定的时间点发出事件，由调用方决定如何显示

use crate::date_resolver::DateSource;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

/// 备份过程中的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// 开始扫描一个设备根目录
    ScanStarted { root: String },

    /// 根目录不存在或遍历出错，已跳过
    RootUnavailable { root: String, reason: String },

    /// 文件被排除策略过滤
    Excluded { path: String },

    /// 扫描完成
    ScanCompleted { candidates: usize },

    /// 指纹索引已就绪
    IndexReady { files: usize, unreadable: usize },

    /// 开始处理一个候选文件（从 1 开始计数）
    Processing { index: usize, total: usize, path: String },

    /// 拍摄日期退回到了当前时间
    DateFallback { path: String },

    BackedUp {
        path: String,
        destination: PathBuf,
        bytes: u64,
        date_source: DateSource,
    },

    /// 目标路径被不同内容占用，已改名写入
    Renamed { path: String, destination: PathBuf },

    SkippedDuplicate { path: String, existing: PathBuf },

    SkippedExisting { path: String, destination: PathBuf },

    Failed { path: String, error: String },
}

/// 进度观察者
pub trait ProgressObserver {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent),
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// 忽略所有事件
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// 终端进度显示
///
/// 扫描阶段显示旋转指示器，复制阶段显示进度条，
/// 跳过和错误信息打印在进度条上方。
pub struct ConsoleReporter {
    pb: ProgressBar,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_message("Scanning device...");
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb, verbose }
    }

    fn switch_to_bar(&self, total: usize) {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        self.pb.set_style(style);
        self.pb.set_length(total as u64);
        self.pb.set_position(0);
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ProgressObserver for ConsoleReporter {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::ScanStarted { root } => {
                self.pb.set_message(format!("Scanning {}...", root));
            }
            ProgressEvent::RootUnavailable { root, reason } => {
                self.pb.println(format!(
                    "{} Could not access {}: {}",
                    style("Warning:").yellow(),
                    root,
                    reason
                ));
            }
            ProgressEvent::Excluded { path } => {
                if self.verbose {
                    self.pb.println(format!("{} {}", style("Excluded:").dim(), path));
                }
            }
            ProgressEvent::ScanCompleted { candidates } => {
                self.pb.println(format!("Found {} photos/videos", style(candidates).cyan()));
                self.switch_to_bar(*candidates);
                self.pb.set_message("Building fingerprint cache...");
            }
            ProgressEvent::IndexReady { files, unreadable } => {
                let mut line = format!("Fingerprint cache: {} archived files", files);
                if *unreadable > 0 {
                    line.push_str(&format!(" ({} unreadable)", style(unreadable).yellow()));
                }
                self.pb.println(line);
            }
            ProgressEvent::Processing { index, path, .. } => {
                self.pb.set_position(index.saturating_sub(1) as u64);
                self.pb.set_message(path.rsplit('/').next().unwrap_or(path).to_string());
            }
            ProgressEvent::DateFallback { path } => {
                self.pb.println(format!(
                    "{} No capture date for {}, filed under today",
                    style("Warning:").yellow(),
                    path
                ));
            }
            ProgressEvent::BackedUp { destination, .. } => {
                if self.verbose {
                    self.pb.println(format!("{} {:?}", style("Copied:").green(), destination));
                }
                self.pb.inc(1);
            }
            ProgressEvent::Renamed { path, destination } => {
                self.pb.println(format!(
                    "{} {} saved as {:?} (name taken by different content)",
                    style("Renamed:").yellow(),
                    path,
                    destination
                ));
                self.pb.inc(1);
            }
            ProgressEvent::SkippedDuplicate { path, existing } => {
                if self.verbose {
                    self.pb.println(format!(
                        "{} {} (same as {:?})",
                        style("Duplicate:").dim(),
                        path,
                        existing
                    ));
                }
                self.pb.inc(1);
            }
            ProgressEvent::SkippedExisting { path, .. } => {
                if self.verbose {
                    self.pb.println(format!("{} {}", style("Exists:").dim(), path));
                }
                self.pb.inc(1);
            }
            ProgressEvent::Failed { path, error } => {
                self.pb.println(format!("{} {} - {}", style("Failed:").red(), path, error));
                self.pb.inc(1);
            }
        }
    }
}
