use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::AsRawFd,
    path::Path,
};

/// Exclusive advisory lock (`flock(2)`) on a file.
///
/// The kernel drops the lock together with the last descriptor of the open
/// file, so a holder that dies never starves the others.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

#[derive(Debug)]
pub struct FileLockGuard<'a> {
    lock: &'a FileLock,
}

impl FileLock {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        Ok(Self { file })
    }

    /// Blocks until the lock is granted.
    pub fn lock(&self) -> io::Result<FileLockGuard<'_>> {
        loop {
            match self.flock(libc::LOCK_EX) {
                Ok(()) => return Ok(FileLockGuard { lock: self }),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error),
            }
        }
    }

    fn flock(&self, operation: libc::c_int) -> io::Result<()> {
        // SAFETY: the descriptor is owned by `self.file` and stays open for
        // the duration of the call
        let result = unsafe { libc::flock(self.file.as_raw_fd(), operation) };

        match result {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.lock.flock(libc::LOCK_UN) {
            log::warn!("Couldn't release the file lock! {error:?}");
        }
    }
}
