//! Linux implementation of the platform primitives (§4.A).

use crate::error::{DataBlockError, DataBlockResult};
use memmap2::MmapMut;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::ffi::CString;
use std::fs::File;
use std::os::fd::FromRawFd;

/// Create a new POSIX shared memory object and map it read/write.
///
/// Fails with [`DataBlockError::PlatformIo`] if an object with this name
/// already exists (`O_EXCL`); callers that want "overwrite a stale
/// segment" semantics must `shm_unlink` first, which is exactly what the
/// `force` creation option does.
pub fn shm_create(name: &str, size: usize) -> DataBlockResult<MmapMut> {
    let cname = shm_path(name)?;
    let fd = unsafe {
        libc::shm_open(
            cname.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            0o600,
        )
    };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let file = unsafe { File::from_raw_fd(fd) };
    file.set_len(size as u64)?;
    let mmap = unsafe { MmapMut::map_mut(&file)? };
    // `file` owns the fd; mmap keeps its own reference via dup at the
    // kernel level, so dropping `file` here (closing the descriptor) does
    // not invalidate the mapping.
    Ok(mmap)
}

/// Attach to an existing POSIX shared memory object read/write.
///
/// Fails with [`DataBlockError::PlatformIo`] if the object does not exist.
pub fn shm_attach(name: &str, expected_size: usize) -> DataBlockResult<MmapMut> {
    let cname = shm_path(name)?;
    let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0o600) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let file = unsafe { File::from_raw_fd(fd) };
    let actual = file.metadata()?.len() as usize;
    if actual < expected_size {
        return Err(DataBlockError::LayoutCorrupt {
            reason: format!(
                "segment '{name}' is {actual} bytes, expected at least {expected_size}"
            ),
        });
    }
    let mmap = unsafe { MmapMut::map_mut(&file)? };
    Ok(mmap)
}

/// Remove the name from the kernel's shared-memory registry.
///
/// Does not affect mappings already established by other processes; they
/// continue to observe the underlying memory until they unmap it. Only
/// the creator may call this (enforced by the caller, not this function).
pub fn shm_unlink(name: &str) -> DataBlockResult<()> {
    let cname = shm_path(name)?;
    let rc = unsafe { libc::shm_unlink(cname.as_ptr()) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

fn shm_path(name: &str) -> DataBlockResult<CString> {
    let full = format!("/{name}");
    CString::new(full.into_bytes()).map_err(|_| DataBlockError::ConfigInvalid {
        reason: "segment name must not contain a NUL byte".into(),
    })
}

/// Host monotonic clock in nanoseconds. Suspend-safe: never goes backwards,
/// unaffected by wall-clock adjustments.
pub fn monotonic_time_ns() -> u64 {
    let ts = nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC)
        .expect("CLOCK_MONOTONIC is always available on Linux");
    ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64
}

/// The calling process's pid.
pub fn current_pid() -> u32 {
    nix::unistd::getpid().as_raw() as u32
}

/// The calling thread's kernel tid (distinct from the pthread id).
pub fn current_tid() -> u64 {
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

/// TOCTOU-tolerant liveness check for a pid (§4.A contract).
///
/// Returns `true` if a process with this pid exists and is not a zombie
/// we could not signal. Cross-uid signals we lack permission for are
/// conservatively treated as "alive" to avoid falsely reclaiming a live
/// owner's resources.
pub fn is_process_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
