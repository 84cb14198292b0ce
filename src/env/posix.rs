//! `Env` over the local filesystem.

use super::{Env, FileLock, Job, RandomAccessFile, SequentialFile, WritableFile};
use crate::error::{Error, Result};
use bytes::Bytes;
use crossbeam::channel::{self, Sender};
use fs4::fs_std::FileExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

struct PosixSequentialFile {
    path: PathBuf,
    file: File,
}

impl SequentialFile for PosixSequentialFile {
    fn read(&mut self, n: usize) -> Result<Bytes> {
        // Grows with the bytes actually read, so `n` may exceed the file
        let mut buf = Vec::new();
        (&mut self.file)
            .take(n as u64)
            .read_to_end(&mut buf)
            .map_err(|e| Error::from_io(&path_str(&self.path), e))?;
        Ok(Bytes::from(buf))
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let offset = i64::try_from(n).map_err(|_| Error::invalid_argument("skip too large"))?;
        self.file
            .seek(SeekFrom::Current(offset))
            .map_err(|e| Error::from_io(&path_str(&self.path), e))?;
        Ok(())
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

struct PosixRandomAccessFile {
    path: PathBuf,
    file: File,
}

impl RandomAccessFile for PosixRandomAccessFile {
    fn read(&self, offset: u64, n: usize) -> Result<Bytes> {
        let len = self
            .file
            .metadata()
            .map_err(|e| Error::from_io(&path_str(&self.path), e))?
            .len();
        let available = usize::try_from(len.saturating_sub(offset)).unwrap_or(usize::MAX);
        let n = n.min(available);

        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match read_at(&self.file, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from_io(&path_str(&self.path), e)),
            }
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }
}

struct PosixWritableFile {
    path: PathBuf,
    // None once closed
    writer: Option<BufWriter<File>>,
}

impl PosixWritableFile {
    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        match self.writer.as_mut() {
            Some(w) => Ok(w),
            None => Err(Error::io_error(&path_str(&self.path), "file already closed")),
        }
    }
}

impl WritableFile for PosixWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        let path = path_str(&self.path);
        self.writer()?
            .write_all(data)
            .map_err(|e| Error::from_io(&path, e))
    }

    fn flush(&mut self) -> Result<()> {
        let path = path_str(&self.path);
        self.writer()?.flush().map_err(|e| Error::from_io(&path, e))
    }

    fn sync(&mut self) -> Result<()> {
        let path = path_str(&self.path);
        let writer = self.writer()?;
        writer.flush().map_err(|e| Error::from_io(&path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| Error::from_io(&path, e))
    }

    fn close(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer
                .flush()
                .map_err(|e| Error::from_io(&path_str(&self.path), e)),
            None => Ok(()),
        }
    }
}

impl Drop for PosixWritableFile {
    fn drop(&mut self) {
        // Best effort flush on drop
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

/// [`Env`] backed by `std::fs` and OS threads.
///
/// File locks are exclusive OS locks on the opened lock file, so they
/// exclude other processes and are dropped if this one exits. A
/// process-wide table of held paths also rejects a second lock from the
/// same process, whichever `PosixEnv` asks. Scheduled jobs run on a single
/// background worker started on first use.
pub struct PosixEnv {
    background: Mutex<Option<Sender<Job>>>,
}

/// Paths locked by this process through any `PosixEnv`.
fn locked_paths() -> &'static Mutex<HashSet<PathBuf>> {
    static LOCKS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Hand `job` to the background worker, starting one with `start` if there
/// is none or the current one has exited. Returns false if the job could
/// not be delivered.
fn send_job(background: &mut Option<Sender<Job>>, job: Job, start: fn() -> Sender<Job>) -> bool {
    let sender = background.get_or_insert_with(start);
    let job = match sender.send(job) {
        Ok(()) => return true,
        Err(e) => e.into_inner(),
    };

    log::warn!("Background worker exited, restarting");
    let sender = start();
    let delivered = sender.send(job).is_ok();
    if !delivered {
        log::error!("Dropping scheduled job: no background worker could be started");
    }
    *background = Some(sender);
    delivered
}

impl Default for PosixEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl PosixEnv {
    /// Create a new environment.
    pub fn new() -> Self {
        Self {
            background: Mutex::new(None),
        }
    }

    fn start_background_worker() -> Sender<Job> {
        let (tx, rx) = channel::unbounded::<Job>();
        let spawned = thread::Builder::new()
            .name("kvblock-bg".to_string())
            .spawn(move || {
                for job in rx {
                    job();
                }
            });
        match spawned {
            Ok(_) => log::debug!("Started background worker"),
            Err(e) => log::error!("Failed to start background worker: {}", e),
        }
        tx
    }
}

impl Env for PosixEnv {
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        let file = File::open(path).map_err(|e| Error::from_io(&path_str(path), e))?;
        Ok(Box::new(PosixSequentialFile { path: path.to_path_buf(), file }))
    }

    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>> {
        let file = File::open(path).map_err(|e| Error::from_io(&path_str(path), e))?;
        Ok(Box::new(PosixRandomAccessFile { path: path.to_path_buf(), file }))
    }

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = File::create(path).map_err(|e| Error::from_io(&path_str(path), e))?;
        Ok(Box::new(PosixWritableFile {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        }))
    }

    fn new_appendable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::from_io(&path_str(path), e))?;
        Ok(Box::new(PosixWritableFile {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        }))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn get_children(&self, dir: &Path) -> Result<Vec<String>> {
        let entries = fs::read_dir(dir).map_err(|e| Error::from_io(&path_str(dir), e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::from_io(&path_str(dir), e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| Error::from_io(&path_str(path), e))
    }

    fn create_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir(dir).map_err(|e| Error::from_io(&path_str(dir), e))
    }

    fn remove_dir(&self, dir: &Path) -> Result<()> {
        fs::remove_dir(dir).map_err(|e| Error::from_io(&path_str(dir), e))
    }

    fn get_file_size(&self, path: &Path) -> Result<u64> {
        let metadata = fs::metadata(path).map_err(|e| Error::from_io(&path_str(path), e))?;
        Ok(metadata.len())
    }

    fn rename_file(&self, src: &Path, target: &Path) -> Result<()> {
        fs::rename(src, target).map_err(|e| Error::from_io(&path_str(src), e))
    }

    fn lock_file(&self, path: &Path) -> Result<FileLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::from_io(&path_str(path), e))?;

        let mut locks = locked_paths().lock();
        if !locks.insert(path.to_path_buf()) {
            return Err(Error::io_error(
                &path_str(path),
                "lock already held by process",
            ));
        }
        match FileExt::try_lock_exclusive(&file) {
            Ok(true) => Ok(FileLock::new(path.to_path_buf(), Some(file))),
            Ok(false) => {
                locks.remove(path);
                Err(Error::io_error(&path_str(path), "lock held by another process"))
            }
            Err(e) => {
                locks.remove(path);
                Err(Error::from_io(&path_str(path), e))
            }
        }
    }

    fn unlock_file(&self, lock: FileLock) -> Result<()> {
        if !locked_paths().lock().remove(lock.path()) {
            return Err(Error::invalid_argument_with(
                "unlock of a file that is not locked",
                &path_str(lock.path()),
            ));
        }
        if let Some(file) = lock.file() {
            FileExt::unlock(file).map_err(|e| Error::from_io(&path_str(lock.path()), e))?;
        }
        Ok(())
    }

    fn schedule(&self, job: Job) {
        let mut background = self.background.lock();
        send_job(&mut background, job, Self::start_background_worker);
    }

    fn start_thread(&self, job: Job) {
        if let Err(e) = thread::Builder::new().spawn(job) {
            log::error!("Failed to start thread: {}", e);
        }
    }

    fn get_test_directory(&self) -> Result<PathBuf> {
        let dir = match std::env::var_os("TEST_TMPDIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::temp_dir().join(format!("kvblocktest-{}", std::process::id())),
        };
        // The directory may already exist
        let _ = fs::create_dir_all(&dir);
        Ok(dir)
    }

    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }

    fn sleep_for_microseconds(&self, micros: u64) {
        thread::sleep(Duration::from_micros(micros));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::write_file;
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_sequential() {
        let dir = TempDir::new().unwrap();
        let env = PosixEnv::new();
        let path = dir.path().join("seq");

        let mut file = env.new_writable_file(&path).unwrap();
        file.append(b"hello ").unwrap();
        file.append(b"world").unwrap();
        file.sync().unwrap();
        file.close().unwrap();
        assert!(file.append(b"late").unwrap_err().is_io_error());

        let mut reader = env.new_sequential_file(&path).unwrap();
        assert_eq!(&reader.read(5).unwrap()[..], b"hello");
        reader.skip(1).unwrap();
        assert_eq!(&reader.read(100).unwrap()[..], b"world");
        assert!(reader.read(10).unwrap().is_empty());
    }

    #[test]
    fn test_random_access_read() {
        let dir = TempDir::new().unwrap();
        let env = PosixEnv::new();
        let path = dir.path().join("random");
        write_file(&env, b"0123456789", &path).unwrap();

        let file = env.new_random_access_file(&path).unwrap();
        assert_eq!(&file.read(3, 4).unwrap()[..], b"3456");
        // Short read at end of file
        assert_eq!(&file.read(8, 10).unwrap()[..], b"89");
        assert!(file.read(20, 4).unwrap().is_empty());
    }

    #[test]
    fn test_read_far_past_end() {
        let dir = TempDir::new().unwrap();
        let env = PosixEnv::new();
        let path = dir.path().join("small");
        write_file(&env, b"0123456789", &path).unwrap();

        // Only the bytes that exist are buffered
        let file = env.new_random_access_file(&path).unwrap();
        assert_eq!(&file.read(4, 1 << 62).unwrap()[..], b"456789");
        assert!(file.read(u64::MAX, usize::MAX).unwrap().is_empty());

        let mut seq = env.new_sequential_file(&path).unwrap();
        assert_eq!(&seq.read(usize::MAX).unwrap()[..], b"0123456789");
    }

    #[test]
    fn test_send_job_reports_dead_worker() {
        fn dead_worker() -> Sender<Job> {
            let (tx, _rx) = channel::unbounded::<Job>();
            tx
        }

        let mut background = None;
        assert!(!send_job(&mut background, Box::new(|| {}), dead_worker));
        assert!(background.is_some());

        let (tx, rx) = channel::unbounded::<Job>();
        let mut background = Some(tx);
        assert!(send_job(&mut background, Box::new(|| {}), dead_worker));
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_appendable_file() {
        let dir = TempDir::new().unwrap();
        let env = PosixEnv::new();
        let path = dir.path().join("append");
        write_file(&env, b"abc", &path).unwrap();

        let mut file = env.new_appendable_file(&path).unwrap();
        file.append(b"def").unwrap();
        file.close().unwrap();
        assert_eq!(env.get_file_size(&path).unwrap(), 6);
    }

    #[test]
    fn test_directory_operations() {
        let dir = TempDir::new().unwrap();
        let env = PosixEnv::new();
        let sub = dir.path().join("sub");

        env.create_dir(&sub).unwrap();
        write_file(&env, b"x", &sub.join("a")).unwrap();
        env.rename_file(&sub.join("a"), &sub.join("b")).unwrap();
        assert!(!env.file_exists(&sub.join("a")));
        assert_eq!(env.get_children(&sub).unwrap(), vec!["b".to_string()]);

        env.remove_file(&sub.join("b")).unwrap();
        env.remove_dir(&sub).unwrap();
        assert!(!env.file_exists(&sub));
        assert!(env.remove_file(&sub.join("b")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_lock_file() {
        let dir = TempDir::new().unwrap();
        let env = PosixEnv::new();
        let path = dir.path().join("LOCK");

        let lock = env.lock_file(&path).unwrap();
        assert!(env.lock_file(&path).unwrap_err().is_io_error());
        env.unlock_file(lock).unwrap();

        let lock = env.lock_file(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());
        env.unlock_file(lock).unwrap();
    }

    #[test]
    fn test_lock_file_across_envs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("LOCK");
        let first = PosixEnv::new();
        let second = PosixEnv::new();

        let lock = first.lock_file(&path).unwrap();
        assert!(second.lock_file(&path).unwrap_err().is_io_error());

        // The file itself is locked, not just the path in this process
        let other = File::open(&path).unwrap();
        assert!(!FileExt::try_lock_exclusive(&other).unwrap());

        first.unlock_file(lock).unwrap();
        assert!(FileExt::try_lock_exclusive(&other).unwrap());
        FileExt::unlock(&other).unwrap();

        let lock = second.lock_file(&path).unwrap();
        second.unlock_file(lock).unwrap();
    }

    #[test]
    fn test_unlock_without_lock() {
        let dir = TempDir::new().unwrap();
        let env = PosixEnv::new();
        let path = dir.path().join("LOCK");

        let lock = env.lock_file(&path).unwrap();
        env.unlock_file(lock).unwrap();
        let stale = FileLock::new(path, None);
        assert!(env.unlock_file(stale).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_schedule_runs_in_order() {
        let env = PosixEnv::new();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            env.schedule(Box::new(move || tx.send(i).unwrap()));
        }
        let got: Vec<i32> = (0..5).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_start_thread_and_time() {
        let env = PosixEnv::new();
        let (tx, rx) = mpsc::channel();
        env.start_thread(Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.recv().unwrap(), 7);

        let start = env.now_micros();
        env.sleep_for_microseconds(1000);
        assert!(env.now_micros() >= start + 1000);
    }
}
