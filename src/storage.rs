//! 本地键值存储模块
//!
//! 权限快照和会话记录以字符串形式保存在固定键下，
//! 相当于浏览器端的 localStorage。
//!
//! 持久化是尽力而为的：调用方在写入失败时只记录警告，不回滚内存状态。
//!
//! ## 示例
//!
//! ```rust
//! use crm_access::storage::{InMemoryLocalStorage, LocalStorage};
//!
//! let storage = InMemoryLocalStorage::new();
//! storage.set("crm_permissions", "{}").unwrap();
//! assert_eq!(storage.get("crm_permissions").unwrap().as_deref(), Some("{}"));
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, Result, StorageError};

/// 本地键值存储 trait
///
/// 实现此 trait 可以替换存储后端
pub trait LocalStorage: Send + Sync {
    /// 读取键对应的值
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// 写入键值
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// 删除键
    fn remove(&self, key: &str) -> Result<()>;
}

// ============================================================================
// InMemoryLocalStorage
// ============================================================================

/// 内存存储
///
/// 用于测试和不需要跨进程保留状态的场景
#[derive(Debug, Default)]
pub struct InMemoryLocalStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryLocalStorage {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 条目数量
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_poisoned() -> Error {
    Error::Storage(StorageError::OperationFailed("lock poisoned".into()))
}

impl LocalStorage for InMemoryLocalStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|_| lock_poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| lock_poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| lock_poisoned())?;
        entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// FileLocalStorage
// ============================================================================

/// 文件存储
///
/// 每个键对应目录下的一个 `<key>.json` 文件。
/// 写入先落到临时文件再重命名，读者不会看到写了一半的内容。
#[derive(Debug, Clone)]
pub struct FileLocalStorage {
    dir: PathBuf,
}

impl FileLocalStorage {
    /// 使用指定目录创建存储，目录不存在时自动创建
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::storage(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    /// 存储目录
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(Error::validation(format!("invalid storage key '{}'", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl LocalStorage for FileLocalStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(format!("read {}: {}", path.display(), e))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .map_err(|e| Error::storage(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::storage(format!("rename to {}: {}", path.display(), e)))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!("remove {}: {}", path.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_storage() {
        let storage = InMemoryLocalStorage::new();
        assert!(storage.is_empty());

        storage.set("a", "1").unwrap();
        storage.set("a", "2").unwrap();
        assert_eq!(storage.get("a").unwrap(), Some("2".to_string()));
        assert_eq!(storage.len(), 1);

        storage.remove("a").unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
    }

    #[test]
    fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileLocalStorage::new(dir.path().join("state")).unwrap();

        assert_eq!(storage.get("crm_permissions").unwrap(), None);
        storage.set("crm_permissions", "{\"x\":1}").unwrap();
        assert_eq!(
            storage.get("crm_permissions").unwrap().as_deref(),
            Some("{\"x\":1}")
        );
        assert!(storage.dir().join("crm_permissions.json").exists());

        storage.remove("crm_permissions").unwrap();
        storage.remove("crm_permissions").unwrap();
        assert_eq!(storage.get("crm_permissions").unwrap(), None);
    }

    #[test]
    fn test_file_storage_rejects_bad_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileLocalStorage::new(dir.path()).unwrap();
        assert!(storage.set("../escape", "x").is_err());
        assert!(storage.set("", "x").is_err());
        assert!(storage.get(".hidden").is_err());
    }
}
