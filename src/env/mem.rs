//! In-memory `Env`.

use super::{default_env, Env, EnvWrapper, FileLock, Job, RandomAccessFile, SequentialFile, WritableFile};
use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type FileData = Arc<RwLock<Vec<u8>>>;

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

struct MemSequentialFile {
    data: FileData,
    pos: usize,
}

impl SequentialFile for MemSequentialFile {
    fn read(&mut self, n: usize) -> Result<Bytes> {
        let data = self.data.read();
        let start = self.pos.min(data.len());
        let end = start.saturating_add(n).min(data.len());
        self.pos = end;
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let len = self.data.read().len();
        let n = usize::try_from(n).unwrap_or(usize::MAX);
        self.pos = self.pos.saturating_add(n).min(len);
        Ok(())
    }
}

struct MemRandomAccessFile {
    data: FileData,
}

impl RandomAccessFile for MemRandomAccessFile {
    fn read(&self, offset: u64, n: usize) -> Result<Bytes> {
        let data = self.data.read();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(n).min(data.len());
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }
}

struct MemWritableFile {
    path: PathBuf,
    data: Option<FileData>,
}

impl MemWritableFile {
    fn data(&self) -> Result<&FileData> {
        self.data
            .as_ref()
            .ok_or_else(|| Error::io_error(&path_str(&self.path), "file already closed"))
    }
}

impl WritableFile for MemWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.data()?.write().extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.data().map(|_| ())
    }

    fn sync(&mut self) -> Result<()> {
        self.data().map(|_| ())
    }

    fn close(&mut self) -> Result<()> {
        self.data = None;
        Ok(())
    }
}

/// [`Env`] that keeps files in memory.
///
/// Directories are implicit: any path may hold a file, and a directory's
/// children are the files whose parent it is. Threads, scheduling and time
/// are delegated to a base environment.
pub struct MemEnv {
    base: EnvWrapper,
    files: Mutex<HashMap<PathBuf, FileData>>,
    locks: Mutex<HashSet<PathBuf>>,
}

impl Default for MemEnv {
    fn default() -> Self {
        Self::new(default_env())
    }
}

impl MemEnv {
    /// Create an empty in-memory environment on top of `base`.
    pub fn new(base: Arc<dyn Env>) -> Self {
        Self {
            base: EnvWrapper::new(base),
            files: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashSet::new()),
        }
    }

    fn file(&self, path: &Path) -> Result<FileData> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_found(path_str(path)))
    }
}

impl Env for MemEnv {
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        let data = self.file(path)?;
        Ok(Box::new(MemSequentialFile { data, pos: 0 }))
    }

    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>> {
        let data = self.file(path)?;
        Ok(Box::new(MemRandomAccessFile { data }))
    }

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let data: FileData = Arc::new(RwLock::new(Vec::new()));
        self.files.lock().insert(path.to_path_buf(), Arc::clone(&data));
        Ok(Box::new(MemWritableFile { path: path.to_path_buf(), data: Some(data) }))
    }

    fn new_appendable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let data = Arc::clone(self.files.lock().entry(path.to_path_buf()).or_default());
        Ok(Box::new(MemWritableFile { path: path.to_path_buf(), data: Some(data) }))
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    fn get_children(&self, dir: &Path) -> Result<Vec<String>> {
        let files = self.files.lock();
        Ok(files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        match self.files.lock().remove(path) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(path_str(path))),
        }
    }

    fn create_dir(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn remove_dir(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn get_file_size(&self, path: &Path) -> Result<u64> {
        Ok(self.file(path)?.read().len() as u64)
    }

    fn rename_file(&self, src: &Path, target: &Path) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .remove(src)
            .ok_or_else(|| Error::not_found(path_str(src)))?;
        files.insert(target.to_path_buf(), data);
        Ok(())
    }

    fn lock_file(&self, path: &Path) -> Result<FileLock> {
        if !self.locks.lock().insert(path.to_path_buf()) {
            return Err(Error::io_error(&path_str(path), "lock already held by process"));
        }
        self.files.lock().entry(path.to_path_buf()).or_default();
        Ok(FileLock::new(path.to_path_buf(), None))
    }

    fn unlock_file(&self, lock: FileLock) -> Result<()> {
        if !self.locks.lock().remove(lock.path()) {
            return Err(Error::invalid_argument_with(
                "unlock of a file that is not locked",
                &path_str(lock.path()),
            ));
        }
        Ok(())
    }

    fn schedule(&self, job: Job) {
        self.base.schedule(job)
    }

    fn start_thread(&self, job: Job) {
        self.base.start_thread(job)
    }

    fn get_test_directory(&self) -> Result<PathBuf> {
        Ok(PathBuf::from("/test"))
    }

    fn now_micros(&self) -> u64 {
        self.base.now_micros()
    }

    fn sleep_for_microseconds(&self, micros: u64) {
        self.base.sleep_for_microseconds(micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{read_file, write_file};

    #[test]
    fn test_basic_file_ops() {
        let env = MemEnv::default();
        let dir = Path::new("/dir");
        assert!(!env.file_exists(&dir.join("f")));
        assert!(env.get_children(dir).unwrap().is_empty());

        write_file(&env, b"abc", &dir.join("f")).unwrap();
        assert!(env.file_exists(&dir.join("f")));
        assert_eq!(env.get_file_size(&dir.join("f")).unwrap(), 3);
        assert_eq!(env.get_children(dir).unwrap(), vec!["f".to_string()]);

        env.rename_file(&dir.join("f"), &dir.join("g")).unwrap();
        assert!(!env.file_exists(&dir.join("f")));
        assert_eq!(read_file(&env, &dir.join("g")).unwrap(), b"abc");

        env.remove_file(&dir.join("g")).unwrap();
        assert!(env.remove_file(&dir.join("g")).unwrap_err().is_not_found());
        assert!(env.get_file_size(&dir.join("g")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_writable_truncates_and_appendable_extends() {
        let env = MemEnv::default();
        let path = Path::new("/f");
        write_file(&env, b"first", path).unwrap();
        write_file(&env, b"2nd", path).unwrap();
        assert_eq!(read_file(&env, path).unwrap(), b"2nd");

        let mut file = env.new_appendable_file(path).unwrap();
        file.append(b"+more").unwrap();
        file.close().unwrap();
        assert!(file.append(b"x").is_err());
        assert_eq!(read_file(&env, path).unwrap(), b"2nd+more");
    }

    #[test]
    fn test_sequential_and_random_reads() {
        let env = MemEnv::default();
        let path = Path::new("/data");
        write_file(&env, b"0123456789", path).unwrap();

        let mut seq = env.new_sequential_file(path).unwrap();
        assert_eq!(&seq.read(3).unwrap()[..], b"012");
        seq.skip(4).unwrap();
        assert_eq!(&seq.read(10).unwrap()[..], b"789");
        assert!(seq.read(1).unwrap().is_empty());
        seq.skip(100).unwrap();

        let random = env.new_random_access_file(path).unwrap();
        assert_eq!(&random.read(5, 2).unwrap()[..], b"56");
        assert_eq!(&random.read(9, 5).unwrap()[..], b"9");
        assert!(random.read(50, 5).unwrap().is_empty());
    }

    #[test]
    fn test_locks() {
        let env = MemEnv::default();
        let lock = env.lock_file(Path::new("/LOCK")).unwrap();
        assert!(env.lock_file(Path::new("/LOCK")).is_err());
        assert!(env.file_exists(Path::new("/LOCK")));
        env.unlock_file(lock).unwrap();
        let lock = env.lock_file(Path::new("/LOCK")).unwrap();
        env.unlock_file(lock).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let env = MemEnv::default();
        assert!(env.new_sequential_file(Path::new("/nope")).err().unwrap().is_not_found());
        assert!(env.new_random_access_file(Path::new("/nope")).err().unwrap().is_not_found());
    }
}
