//! 上传目录内的文件命名与路径约束
//!
//! 客户端只能引用上传目录中的文件；执行器会在任务结束后删除输入视频，
//! 所以任何来自请求的路径都必须先经过 [`resolve_in_upload_dir`]。

use std::path::{Component, Path, PathBuf};

use crate::error::{CutterError, CutterResult};

/// 允许上传的视频扩展名
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];

/// 扩展名是否在允许列表中（不区分大小写）
pub fn allowed_file(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 清理客户端给出的文件名
///
/// 只保留最后一级文件名，空白换成下划线，去掉 ASCII 字母数字与 `._-` 之外的字符，
/// 并去掉开头的点和下划线。清理后为空时返回 `None`。
pub fn secure_filename(name: &str) -> Option<String> {
    let last = name.rsplit(&['/', '\\'][..]).next().unwrap_or(name);
    let cleaned: String = last
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches(&['.', '_'][..]).to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// 把请求中的视频路径解析到上传目录内
///
/// 相对路径按上传目录解析；绝对路径或以上传目录开头的路径原样检查。
/// 解析结果（跟随符号链接后）不在上传目录内时返回 `SpecificationError`。
/// 文件不存在时只做字面检查，交给后续流程报告 `InputNotFound`。
pub fn resolve_in_upload_dir(upload_dir: &Path, requested: &Path) -> CutterResult<PathBuf> {
    let outside = || CutterError::spec(format!("视频必须位于上传目录内: {}", requested.display()));

    if requested.as_os_str().is_empty() {
        return Err(CutterError::spec("视频路径为空"));
    }
    if requested.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(outside());
    }

    let candidate = if requested.is_absolute() || requested.starts_with(upload_dir) {
        requested.to_path_buf()
    } else {
        upload_dir.join(requested)
    };

    match (candidate.canonicalize(), upload_dir.canonicalize()) {
        (Ok(real), Ok(root)) if real.starts_with(&root) && real != root => Ok(real),
        (Ok(_), _) => Err(outside()),
        (Err(_), _) if candidate.starts_with(upload_dir) && candidate != upload_dir => Ok(candidate),
        (Err(_), _) => Err(outside()),
    }
}
