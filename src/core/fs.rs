//! 原子写文件：先写同目录临时文件再 rename 覆盖，写到一半失败时旧文件保持完整

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// 临时文件路径：`<path>.tmp`
pub fn temp_path(path: &Path) -> PathBuf {
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}
