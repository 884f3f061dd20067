//! Thin platform shims: free space, sequential-access hints, process priority.
//!
//! Every hint here is best-effort. A failed hint is logged at debug level and
//! the ordinary result is used.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use tracing::debug;

/// Usable free bytes on the filesystem holding `path`, minus `reserve`,
/// floored at zero. Returns 0 when the query fails.
#[cfg(unix)]
pub fn usable_free_space(path: &Path, reserve: u64) -> u64 {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return 0;
    };
    // SAFETY: `stat` is plain data written by statvfs; c_path is NUL-terminated.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        debug!(path = %path.display(), "statvfs failed: {}", io::Error::last_os_error());
        return 0;
    }
    let free = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
    free.saturating_sub(reserve)
}

#[cfg(not(unix))]
pub fn usable_free_space(path: &Path, _reserve: u64) -> u64 {
    debug!(path = %path.display(), "free-space query not supported on this platform");
    0
}

/// Open a file for reading with a sequential-access hint.
pub fn open_sequential_read(path: &Path) -> io::Result<File> {
    let file = File::open(path)?;
    advise_sequential(&file, true);
    Ok(file)
}

/// Create/truncate a file for writing with a sequential-access hint.
pub fn open_sequential_write(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    advise_sequential(&file, false);
    Ok(file)
}

#[cfg(target_os = "linux")]
fn advise_sequential(file: &File, will_need: bool) {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // SAFETY: fd is a valid open descriptor owned by `file` for this call.
    let rc = unsafe { libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_SEQUENTIAL) };
    if rc != 0 {
        debug!("posix_fadvise(SEQUENTIAL) failed: {}", rc);
    }
    if will_need {
        let rc = unsafe { libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_WILLNEED) };
        if rc != 0 {
            debug!("posix_fadvise(WILLNEED) failed: {}", rc);
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn advise_sequential(_file: &File, _will_need: bool) {}

/// Raise this process's scheduling priority. Usually needs privileges;
/// failure is expected and harmless.
#[cfg(unix)]
pub fn raise_priority() {
    // SAFETY: setpriority has no memory-safety preconditions.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -5) };
    if rc != 0 {
        debug!("setpriority failed: {}", io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
pub fn raise_priority() {
    debug!("priority raise not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_sequential_open_round_trip() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("seq.bin");

        let mut out = open_sequential_write(&path).expect("Failed to open for write");
        out.write_all(b"sequential").expect("Failed to write");
        drop(out);

        let mut content = String::new();
        open_sequential_read(&path)
            .expect("Failed to open for read")
            .read_to_string(&mut content)
            .expect("Failed to read");
        assert_eq!(content, "sequential");
    }

    #[cfg(unix)]
    #[test]
    fn test_free_space_respects_reserve() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let free = usable_free_space(temp_dir.path(), 0);
        assert!(free > 0);
        assert_eq!(usable_free_space(temp_dir.path(), u64::MAX), 0);
        assert_eq!(usable_free_space(&temp_dir.path().join("missing"), 0), 0);
    }
}
