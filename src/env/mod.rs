//! Platform abstraction: files, locks, background work and time.
//!
//! The block codec itself only needs the narrow file contracts
//! ([`WritableFile`] to persist a finished block, [`SequentialFile`] or
//! [`RandomAccessFile`] to read it back). The wider [`Env`] trait is the
//! capability set that table and engine layers are built against; it is
//! passed down explicitly rather than read from global state.
//!
//! Implementations:
//! - [`PosixEnv`]: the local filesystem via `std::fs`.
//! - [`MemEnv`]: an in-memory filesystem, handy for tests.
//! - [`EnvWrapper`]: forwards everything to another `Env`.

mod mem;
mod posix;

pub use mem::MemEnv;
pub use posix::PosixEnv;

use crate::error::{Error, Result};
use bytes::Bytes;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// A unit of work handed to [`Env::schedule`] or [`Env::start_thread`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A file read from front to back.
pub trait SequentialFile: Send {
    /// Read up to `n` bytes. Fewer bytes are returned only at end of file;
    /// an empty result means the end was reached.
    fn read(&mut self, n: usize) -> Result<Bytes>;

    /// Skip `n` bytes. Skipping past the end is not an error.
    fn skip(&mut self, n: u64) -> Result<()>;
}

/// A file read at arbitrary offsets. Safe for concurrent readers.
pub trait RandomAccessFile: Send + Sync {
    /// Read up to `n` bytes starting at `offset`. Fewer bytes are returned
    /// only when the range runs past the end of the file.
    fn read(&self, offset: u64, n: usize) -> Result<Bytes>;
}

/// A file written sequentially.
///
/// Dropping a file that was not closed flushes it on a best-effort basis.
pub trait WritableFile: Send {
    /// Append `data` to the end of the file.
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Push buffered data to the operating system.
    fn flush(&mut self) -> Result<()>;

    /// Flush and wait until the data is durable.
    fn sync(&mut self) -> Result<()>;

    /// Flush and release the file. Further writes fail.
    fn close(&mut self) -> Result<()>;
}

/// A held lock on a file, released by [`Env::unlock_file`].
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    // The OS lock lives as long as this handle stays open.
    file: Option<File>,
}

impl FileLock {
    pub(crate) fn new(path: PathBuf, file: Option<File>) -> Self {
        Self { path, file }
    }

    pub(crate) fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }

    /// Path of the locked file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The capability set a storage engine needs from its platform.
pub trait Env: Send + Sync {
    /// Open a file for sequential reading.
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>>;

    /// Open a file for random-access reading.
    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>>;

    /// Create a new file for writing, truncating any existing file.
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    /// Open a file for appending, creating it if needed.
    ///
    /// Not every environment supports this; the default fails with
    /// `NotSupported`.
    fn new_appendable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        Err(Error::not_supported_with(
            "new_appendable_file",
            &path.display().to_string(),
        ))
    }

    /// Whether `path` exists.
    fn file_exists(&self, path: &Path) -> bool;

    /// Names (not full paths) of the entries in `dir`.
    fn get_children(&self, dir: &Path) -> Result<Vec<String>>;

    /// Delete a file.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Create a directory.
    fn create_dir(&self, dir: &Path) -> Result<()>;

    /// Delete an empty directory.
    fn remove_dir(&self, dir: &Path) -> Result<()>;

    /// Size of a file in bytes.
    fn get_file_size(&self, path: &Path) -> Result<u64>;

    /// Atomically rename `src` to `target`, replacing `target`.
    fn rename_file(&self, src: &Path, target: &Path) -> Result<()>;

    /// Lock `path` against other users, creating it if needed.
    ///
    /// Fails if the lock is already held, whether by this process or
    /// another one. A lock left held is released when the process exits.
    fn lock_file(&self, path: &Path) -> Result<FileLock>;

    /// Release a lock obtained from [`Env::lock_file`].
    fn unlock_file(&self, lock: FileLock) -> Result<()>;

    /// Run `job` once on a shared background thread. Jobs run in the order
    /// they were scheduled.
    fn schedule(&self, job: Job);

    /// Run `job` on a new thread.
    fn start_thread(&self, job: Job);

    /// A directory tests may use for scratch files.
    fn get_test_directory(&self) -> Result<PathBuf>;

    /// Microseconds since some fixed point in time.
    fn now_micros(&self) -> u64;

    /// Sleep for `micros` microseconds.
    fn sleep_for_microseconds(&self, micros: u64);
}

/// An [`Env`] that forwards every call to a target environment.
///
/// Wrap an environment in this to override a few operations and delegate
/// the rest.
#[derive(Clone)]
pub struct EnvWrapper {
    target: Arc<dyn Env>,
}

impl EnvWrapper {
    /// Wrap `target`.
    pub fn new(target: Arc<dyn Env>) -> Self {
        Self { target }
    }

    /// The wrapped environment.
    pub fn target(&self) -> &Arc<dyn Env> {
        &self.target
    }
}

impl Env for EnvWrapper {
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        self.target.new_sequential_file(path)
    }

    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>> {
        self.target.new_random_access_file(path)
    }

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        self.target.new_writable_file(path)
    }

    fn new_appendable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        self.target.new_appendable_file(path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.target.file_exists(path)
    }

    fn get_children(&self, dir: &Path) -> Result<Vec<String>> {
        self.target.get_children(dir)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.target.remove_file(path)
    }

    fn create_dir(&self, dir: &Path) -> Result<()> {
        self.target.create_dir(dir)
    }

    fn remove_dir(&self, dir: &Path) -> Result<()> {
        self.target.remove_dir(dir)
    }

    fn get_file_size(&self, path: &Path) -> Result<u64> {
        self.target.get_file_size(path)
    }

    fn rename_file(&self, src: &Path, target: &Path) -> Result<()> {
        self.target.rename_file(src, target)
    }

    fn lock_file(&self, path: &Path) -> Result<FileLock> {
        self.target.lock_file(path)
    }

    fn unlock_file(&self, lock: FileLock) -> Result<()> {
        self.target.unlock_file(lock)
    }

    fn schedule(&self, job: Job) {
        self.target.schedule(job)
    }

    fn start_thread(&self, job: Job) {
        self.target.start_thread(job)
    }

    fn get_test_directory(&self) -> Result<PathBuf> {
        self.target.get_test_directory()
    }

    fn now_micros(&self) -> u64 {
        self.target.now_micros()
    }

    fn sleep_for_microseconds(&self, micros: u64) {
        self.target.sleep_for_microseconds(micros)
    }
}

/// The process-wide [`PosixEnv`], created on first use.
///
/// Meant for program entry points; library code should take an `Env`
/// argument instead.
pub fn default_env() -> Arc<dyn Env> {
    static DEFAULT: OnceLock<Arc<PosixEnv>> = OnceLock::new();
    let env = DEFAULT.get_or_init(|| Arc::new(PosixEnv::new()));
    Arc::clone(env) as Arc<dyn Env>
}

fn write_file_impl(env: &dyn Env, data: &[u8], path: &Path, should_sync: bool) -> Result<()> {
    let mut file = env.new_writable_file(path)?;
    let mut result = file.append(data);
    if result.is_ok() && should_sync {
        result = file.sync();
    }
    if result.is_ok() {
        result = file.close();
    }
    drop(file);
    if result.is_err() {
        let _ = env.remove_file(path);
    }
    result
}

/// Write `data` to a new file at `path`. The file is removed on failure.
pub fn write_file(env: &dyn Env, data: &[u8], path: &Path) -> Result<()> {
    write_file_impl(env, data, path, false)
}

/// Like [`write_file`], but syncs before closing.
pub fn write_file_sync(env: &dyn Env, data: &[u8], path: &Path) -> Result<()> {
    write_file_impl(env, data, path, true)
}

/// Read the whole file at `path`.
pub fn read_file(env: &dyn Env, path: &Path) -> Result<Vec<u8>> {
    const BUFFER_SIZE: usize = 8192;

    let mut file = env.new_sequential_file(path)?;
    let mut data = Vec::new();
    loop {
        let fragment = file.read(BUFFER_SIZE)?;
        if fragment.is_empty() {
            break;
        }
        data.extend_from_slice(&fragment);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Counts file creations, fails renames and cannot append.
    struct CountingEnv {
        inner: EnvWrapper,
        created: Mutex<usize>,
    }

    impl Env for CountingEnv {
        fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
            self.inner.new_sequential_file(path)
        }
        fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>> {
            self.inner.new_random_access_file(path)
        }
        fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
            *self.created.lock() += 1;
            self.inner.new_writable_file(path)
        }
        fn file_exists(&self, path: &Path) -> bool {
            self.inner.file_exists(path)
        }
        fn get_children(&self, dir: &Path) -> Result<Vec<String>> {
            self.inner.get_children(dir)
        }
        fn remove_file(&self, path: &Path) -> Result<()> {
            self.inner.remove_file(path)
        }
        fn create_dir(&self, dir: &Path) -> Result<()> {
            self.inner.create_dir(dir)
        }
        fn remove_dir(&self, dir: &Path) -> Result<()> {
            self.inner.remove_dir(dir)
        }
        fn get_file_size(&self, path: &Path) -> Result<u64> {
            self.inner.get_file_size(path)
        }
        fn rename_file(&self, _src: &Path, _target: &Path) -> Result<()> {
            Err(Error::not_supported("rename"))
        }
        fn lock_file(&self, path: &Path) -> Result<FileLock> {
            self.inner.lock_file(path)
        }
        fn unlock_file(&self, lock: FileLock) -> Result<()> {
            self.inner.unlock_file(lock)
        }
        fn schedule(&self, job: Job) {
            self.inner.schedule(job)
        }
        fn start_thread(&self, job: Job) {
            self.inner.start_thread(job)
        }
        fn get_test_directory(&self) -> Result<PathBuf> {
            self.inner.get_test_directory()
        }
        fn now_micros(&self) -> u64 {
            self.inner.now_micros()
        }
        fn sleep_for_microseconds(&self, micros: u64) {
            self.inner.sleep_for_microseconds(micros)
        }
    }

    #[test]
    fn test_wrapper_forwards() {
        let mem: Arc<dyn Env> = Arc::new(MemEnv::default());
        let env = CountingEnv { inner: EnvWrapper::new(Arc::clone(&mem)), created: Mutex::new(0) };

        write_file(&env, b"hello", Path::new("/w/a")).unwrap();
        assert_eq!(*env.created.lock(), 1);
        assert!(mem.file_exists(Path::new("/w/a")));
        assert_eq!(read_file(&env, Path::new("/w/a")).unwrap(), b"hello");

        let err = env.rename_file(Path::new("/w/a"), Path::new("/w/b")).unwrap_err();
        assert!(err.is_not_supported());
        assert!(env.inner.target().file_exists(Path::new("/w/a")));
    }

    #[test]
    fn test_default_appendable_not_supported() {
        let mem: Arc<dyn Env> = Arc::new(MemEnv::default());
        let env = CountingEnv { inner: EnvWrapper::new(mem), created: Mutex::new(0) };

        // CountingEnv keeps the trait's default
        let err = env.new_appendable_file(Path::new("/x")).err().unwrap();
        assert!(err.is_not_supported());
        assert!(env.inner.new_appendable_file(Path::new("/x")).is_ok());
    }

    #[test]
    fn test_default_env_is_shared() {
        let a = default_env();
        let b = default_env();
        assert!(a.now_micros() > 0);
        assert!(b.get_test_directory().is_ok());
    }

    #[test]
    fn test_read_file_large() {
        let env = MemEnv::default();
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        write_file_sync(&env, &data, Path::new("/big")).unwrap();
        assert_eq!(read_file(&env, Path::new("/big")).unwrap(), data);
    }

    #[test]
    fn test_read_missing_file() {
        let env = MemEnv::default();
        assert!(read_file(&env, Path::new("/missing")).unwrap_err().is_not_found());
    }
}
