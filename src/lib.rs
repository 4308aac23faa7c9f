// CamVault - 手机相册增量备份工具
// 模块声明文件

/// 候选文件、处理结果和统计信息
pub mod actions;

/// 命令行交互界面模块
pub mod cli;

/// 备份配置管理模块
pub mod config;

/// 拍摄日期解析模块
pub mod date_resolver;

/// 设备访问模块
pub mod device;

/// 错误类型
pub mod error;

/// 排除策略模块
pub mod exclusion;

/// 备份执行器模块
pub mod executor;

/// 指纹索引模块
pub mod fingerprint;

/// 文件哈希计算模块
pub mod hasher;

/// 设备文件列表
pub mod listing;

/// 日志初始化
pub mod logging;

/// 图片元数据读取
pub mod metadata;

/// 进度通知模块
pub mod progress;

/// 源文件扫描模块
pub mod scanner;

/// 配置文件存储模块
pub mod store;

/// 工具函数模块
pub mod utils;
