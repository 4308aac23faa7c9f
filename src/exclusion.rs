// CamVault - 排除策略模块
// 根据精确路径和 Glob 模式判断某个设备文件是否应被排除

use glob::Pattern;
use std::collections::HashSet;

/// 排除策略
///
/// 模式在构造时编译，非法的 Glob 语法在加载配置时就会被拒绝，
/// 匹配阶段不会再出错。
#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    exact: HashSet<String>,
    patterns: Vec<Pattern>,
}

impl ExclusionPolicy {
    /// 创建排除策略
    ///
    /// # 参数
    /// * `exclude_files` - 需要精确匹配的完整路径
    /// * `exclude_patterns` - Glob 风格的模式，针对完整路径匹配
    ///
    /// # 返回
    /// * `Err(glob::PatternError)` - 某个模式语法错误
    pub fn new<F, P>(exclude_files: F, exclude_patterns: P) -> Result<Self, glob::PatternError>
    where
        F: IntoIterator,
        F::Item: Into<String>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let patterns = exclude_patterns
            .into_iter()
            .map(|p| Pattern::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            exact: exclude_files.into_iter().map(Into::into).collect(),
            patterns,
        })
    }

    /// 判断路径是否应被排除
    ///
    /// 模式针对完整路径字符串匹配（而不只是文件名），`*` 可以跨越 `/`。
    pub fn should_exclude(&self, path: &str) -> bool {
        self.exact.contains(path) || self.patterns.iter().any(|p| p.matches(path))
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(files: &[&str], patterns: &[&str]) -> ExclusionPolicy {
        ExclusionPolicy::new(files.iter().copied(), patterns.iter().copied()).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let p = policy(&["/DCIM/100APPLE/IMG_0001.JPG"], &[]);
        assert!(p.should_exclude("/DCIM/100APPLE/IMG_0001.JPG"));
        assert!(!p.should_exclude("/DCIM/100APPLE/IMG_0002.JPG"));
        assert!(!p.should_exclude("IMG_0001.JPG"));
    }

    #[test]
    fn test_glob_matches_full_path() {
        let p = policy(&[], &["*/Thumbnails/*", "*.tmp"]);
        assert!(p.should_exclude("/DCIM/Thumbnails/IMG_0001.JPG"));
        assert!(p.should_exclude("/DCIM/100APPLE/Thumbnails/deep/IMG_0001.JPG"));
        assert!(p.should_exclude("/DCIM/100APPLE/upload.tmp"));
        assert!(!p.should_exclude("/DCIM/100APPLE/IMG_0001.JPG"));
    }

    #[test]
    fn test_pattern_against_basename_only_does_not_match() {
        let p = policy(&[], &["IMG_*.jpg"]);
        assert!(!p.should_exclude("/DCIM/100APPLE/IMG_0001.jpg"));
        assert!(p.should_exclude("IMG_0001.jpg"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = ExclusionPolicy::new(Vec::<String>::new(), ["[unclosed"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_policy_excludes_nothing() {
        let p = ExclusionPolicy::default();
        assert!(p.is_empty());
        assert!(!p.should_exclude("/DCIM/anything.jpg"));
    }
}
