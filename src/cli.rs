// CamVault - 命令行交互界面模块
// 选择要备份的设备，并把新设备保存为配置中的设备条目

use anyhow::{bail, Context, Result};
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use std::path::{Path, PathBuf};

use crate::device::{default_search_paths, discover_devices, MountedDevice};
use crate::store::{AppConfig, DeviceProfile};
use crate::utils::expand_tilde;

/// 选中的设备
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub device: MountedDevice,

    /// 设备条目中配置的专用备份目录
    pub backup_directory: Option<PathBuf>,
}

impl SelectedDevice {
    fn from_profile(name: &str, profile: &DeviceProfile) -> Self {
        Self {
            device: MountedDevice::new(name, expand_tilde(&profile.mount_point)),
            backup_directory: profile.backup_directory.as_deref().map(expand_tilde),
        }
    }
}

/// 挂载点是否像一台带相册的设备
pub fn is_mounted(mount_point: &Path) -> bool {
    mount_point.join("DCIM").is_dir()
}

/// 查找挂载点相同的设备条目
fn profile_for_mount<'a>(app: &'a AppConfig, mount_point: &Path) -> Option<(&'a String, &'a DeviceProfile)> {
    app.devices
        .iter()
        .find(|(_, p)| expand_tilde(&p.mount_point) == mount_point)
}

/// 按 `--device` 参数查找设备
///
/// 先按设备条目名称匹配，再当作挂载路径处理。
///
/// # 参数
/// * `app` - 应用配置
/// * `requested` - 设备名称或挂载路径
///
/// # 返回
/// * `Ok(SelectedDevice)` - 找到的设备
/// * `Err(anyhow::Error)` - 既不是已知名称，也不是存在的目录
pub fn resolve_requested(app: &AppConfig, requested: &str) -> Result<SelectedDevice> {
    if let Some(profile) = app.devices.get(requested) {
        return Ok(SelectedDevice::from_profile(requested, profile));
    }

    let path = expand_tilde(Path::new(requested));
    if !path.is_dir() {
        bail!(
            "Unknown device {:?}: not a configured device name or an existing mount directory",
            requested
        );
    }

    if let Some((name, profile)) = profile_for_mount(app, &path) {
        return Ok(SelectedDevice::from_profile(name, profile));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| requested.to_string());
    Ok(SelectedDevice {
        device: MountedDevice::new(name, path),
        backup_directory: None,
    })
}

/// 选择要备份的设备
///
/// 顺序：`--device` 参数 → 唯一自动发现的设备 → 交互式选择。
///
/// # 参数
/// * `app` - 可变的应用配置（交互时可能新增设备条目）
/// * `config_path` - 配置文件路径，保存新设备时使用
/// * `requested` - `--device` 参数
///
/// # 返回
/// * `Ok(Some(SelectedDevice))` - 选中的设备
/// * `Ok(None)` - 用户选择退出
/// * `Err(anyhow::Error)` - 设备无效，或需要交互但不在终端中
pub fn select_device(
    app: &mut AppConfig,
    config_path: &Path,
    requested: Option<&str>,
) -> Result<Option<SelectedDevice>> {
    if let Some(requested) = requested {
        return resolve_requested(app, requested).map(Some);
    }

    let discovered = discover_devices(&default_search_paths());
    if let [only] = discovered.as_slice() {
        let selected = match profile_for_mount(app, only.mount_point()) {
            Some((name, profile)) => SelectedDevice::from_profile(name, profile),
            None => SelectedDevice {
                device: only.clone(),
                backup_directory: None,
            },
        };
        println!(
            "Using device {} at {:?}",
            style(selected.device.name()).green(),
            selected.device.mount_point()
        );
        return Ok(Some(selected));
    }

    if !console::user_attended() {
        bail!("No device selected: pass --device NAME|PATH when not running in a terminal");
    }

    run_interactive_selection(app, config_path, discovered)
}

/// 交互式选择设备
///
/// 列出已保存的设备和自动发现的设备，也可以手动输入挂载路径。
fn run_interactive_selection(
    app: &mut AppConfig,
    config_path: &Path,
    discovered: Vec<MountedDevice>,
) -> Result<Option<SelectedDevice>> {
    let theme = ColorfulTheme::default();

    let mut options: Vec<SelectedDevice> = Vec::new();
    let mut choices: Vec<String> = Vec::new();

    for (name, profile) in &app.devices {
        let selected = SelectedDevice::from_profile(name, profile);
        let state = if is_mounted(selected.device.mount_point()) {
            "connected"
        } else {
            "not mounted"
        };
        choices.push(format!(
            "{} ({}) [{}]",
            name,
            selected.device.mount_point().display(),
            state
        ));
        options.push(selected);
    }

    for device in discovered {
        if profile_for_mount(app, device.mount_point()).is_some() {
            continue;
        }
        choices.push(format!(
            "{} ({}) [discovered]",
            device.name(),
            device.mount_point().display()
        ));
        options.push(SelectedDevice {
            device,
            backup_directory: None,
        });
    }

    choices.push(">> Enter Mount Path".to_string());
    choices.push(">> Exit".to_string());

    let selection = Select::with_theme(&theme)
        .with_prompt("Select a device to back up")
        .default(0)
        .items(&choices)
        .interact()?;

    if selection < options.len() {
        return Ok(Some(options.swap_remove(selection)));
    }
    if choices[selection] == ">> Exit" {
        return Ok(None);
    }

    let mount: String = Input::with_theme(&theme)
        .with_prompt("Mount Path")
        .interact_text()?;
    let mount_point = expand_tilde(Path::new(mount.trim()));
    if !mount_point.is_dir() {
        bail!("Mount path {:?} does not exist", mount_point);
    }
    if !is_mounted(&mount_point) {
        println!(
            "{} No DCIM directory under {:?}",
            style("Warning:").yellow(),
            mount_point
        );
    }

    let default_name = mount_point
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "device".to_string());

    if Confirm::with_theme(&theme)
        .with_prompt("Save this device for next time?")
        .default(true)
        .interact()?
    {
        let name: String = Input::with_theme(&theme)
            .with_prompt("Device Name")
            .default(default_name.clone())
            .interact_text()?;
        app.devices.insert(
            name.clone(),
            DeviceProfile {
                mount_point: mount_point.clone(),
                backup_directory: None,
            },
        );
        app.save_to(config_path)
            .with_context(|| format!("Failed to save device {:?}", name))?;
        println!("{} Device '{}' saved.", style("Success:").green(), name);
        return Ok(Some(SelectedDevice {
            device: MountedDevice::new(name, mount_point),
            backup_directory: None,
        }));
    }

    Ok(Some(SelectedDevice {
        device: MountedDevice::new(default_name, mount_point),
        backup_directory: None,
    }))
}
