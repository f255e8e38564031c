//! Page-fault containment for memory-mapped window reads.
//!
//! A torn or I/O-failing backing file raises `SIGBUS` (or `SIGSEGV` on
//! some platforms/filesystems) the moment the mapped region is touched.
//! That is a hardware signal, not a Rust `panic!`, so `catch_unwind`
//! never sees it. This module arms real `SIGBUS`/`SIGSEGV` handlers for
//! the duration of a window's processing and uses `sigsetjmp`/
//! `siglongjmp` to transfer control back to [`guarded`] instead of
//! letting the signal kill the process.

#[cfg(unix)]
use std::cell::Cell;
#[cfg(unix)]
use std::os::raw::c_int;
#[cfg(unix)]
use std::ptr;
#[cfg(unix)]
use std::sync::Mutex;

use crate::error::CounterError;

#[cfg(unix)]
mod sigjmp {
    use std::os::raw::c_int;

    /// Opaque buffer handed to `sigsetjmp`/`siglongjmp`. Its true layout
    /// (`struct __jmp_buf_tag` on glibc, a smaller struct on other
    /// libcs) is never inspected by us, only round-tripped through the
    /// same libc that filled it in; 256 bytes is larger than every
    /// mainstream unix target's real `sigjmp_buf`.
    #[repr(C, align(16))]
    #[derive(Clone, Copy)]
    pub struct SigJmpBuf([u8; 256]);

    impl SigJmpBuf {
        pub const fn zeroed() -> Self {
            Self([0u8; 256])
        }
    }

    extern "C" {
        #[link_name = "sigsetjmp"]
        pub fn sigsetjmp(env: *mut SigJmpBuf, savesigs: c_int) -> c_int;
        #[link_name = "siglongjmp"]
        pub fn siglongjmp(env: *mut SigJmpBuf, val: c_int) -> !;
    }
}

#[cfg(unix)]
thread_local! {
    /// Armed only while a worker is inside [`guarded`]; `None` means a
    /// fault here didn't originate from a guarded window read.
    static RECOVERY_POINT: Cell<Option<sigjmp::SigJmpBuf>> = Cell::new(None);
}

#[cfg(unix)]
extern "C" fn on_fault(signum: c_int) {
    let armed = RECOVERY_POINT.with(Cell::get);
    match armed {
        Some(mut env) => unsafe { sigjmp::siglongjmp(&mut env, 1) },
        None => unsafe {
            // Not ours to handle: restore the default disposition and
            // re-raise so the process dies the way it would have
            // without this handler installed.
            libc::signal(signum, libc::SIG_DFL);
            libc::raise(signum);
        },
    }
}

#[cfg(unix)]
unsafe fn install(signum: c_int) -> libc::sigaction {
    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = on_fault as usize;
    libc::sigemptyset(&mut action.sa_mask);
    action.sa_flags = 0;
    let mut previous: libc::sigaction = std::mem::zeroed();
    libc::sigaction(signum, &action, &mut previous);
    previous
}

#[cfg(unix)]
unsafe fn restore(signum: c_int, previous: libc::sigaction) {
    libc::sigaction(signum, &previous, ptr::null_mut());
}

/// The OS-level signal disposition is process-wide, but partitions
/// within a window are processed by several worker threads that each
/// call [`guarded`] concurrently. Reference-count the installation so
/// only the first concurrent caller swaps in `on_fault` and only the
/// last restores whatever was there before any of them started,
/// instead of racing each other's save/restore of `previous`.
#[cfg(unix)]
struct Installed {
    count: u32,
    prev_bus: libc::sigaction,
    prev_segv: libc::sigaction,
}

#[cfg(unix)]
unsafe impl Send for Installed {}

#[cfg(unix)]
static INSTALL_STATE: Mutex<Option<Installed>> = Mutex::new(None);

#[cfg(unix)]
fn arm() {
    let mut state = INSTALL_STATE.lock().expect("fault install mutex poisoned");
    match state.as_mut() {
        Some(installed) => installed.count += 1,
        None => unsafe {
            let prev_bus = install(libc::SIGBUS);
            let prev_segv = install(libc::SIGSEGV);
            *state = Some(Installed {
                count: 1,
                prev_bus,
                prev_segv,
            });
        },
    }
}

#[cfg(unix)]
fn disarm() {
    let mut state = INSTALL_STATE.lock().expect("fault install mutex poisoned");
    if let Some(installed) = state.as_mut() {
        installed.count -= 1;
        if installed.count == 0 {
            let installed = state.take().expect("checked above");
            unsafe {
                restore(libc::SIGBUS, installed.prev_bus);
                restore(libc::SIGSEGV, installed.prev_segv);
            }
        }
    }
}

/// Runs `body` with `SIGBUS`/`SIGSEGV` handlers armed for its duration.
///
/// If one of those signals fires while `body` runs, `body` is abandoned
/// mid-flight — `siglongjmp` transfers control straight back here
/// without running any Rust drop glue between the fault point and this
/// call, the same trade-off the reference's `SetPanicOnFault` recovery
/// makes — and this returns `Err(CounterError::StorageFault)` instead
/// of the signal's default disposition (process termination).
///
/// Safe to call concurrently from several worker threads over the same
/// window: each caller arms its own thread-local recovery point (a
/// fault is delivered to whichever thread touched the faulting page),
/// while the underlying OS signal handler installation is
/// reference-counted across callers.
#[cfg(unix)]
pub fn guarded<F>(window_offset: u64, body: F) -> Result<(), CounterError>
where
    F: FnOnce() -> Result<(), CounterError>,
{
    arm();

    let mut env = sigjmp::SigJmpBuf::zeroed();
    let outcome = if unsafe { sigjmp::sigsetjmp(&mut env, 1) } == 0 {
        RECOVERY_POINT.with(|cell| cell.set(Some(env)));
        body()
    } else {
        log::error!("page fault while reading memory-mapped window at offset {window_offset}");
        Err(CounterError::StorageFault { window_offset })
    };

    RECOVERY_POINT.with(|cell| cell.set(None));
    disarm();
    outcome
}

/// Non-unix targets have no `SIGBUS`/`SIGSEGV` to intercept; `body`
/// simply runs unguarded.
#[cfg(not(unix))]
pub fn guarded<F>(_window_offset: u64, body: F) -> Result<(), CounterError>
where
    F: FnOnce() -> Result<(), CounterError>,
{
    body()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn body_result_passes_through_when_no_fault_fires() {
        let result = guarded(0, || Ok(()));
        assert!(result.is_ok());
    }

    #[test]
    fn body_error_passes_through_when_no_fault_fires() {
        let result = guarded(0, || Err(CounterError::InvalidFileSize(-1)));
        assert!(matches!(result, Err(CounterError::InvalidFileSize(-1))));
    }

    #[test]
    fn recovers_from_an_actual_sigbus() {
        // Truncate a backing file after mapping it so touching the
        // tail of the mapping raises a genuine SIGBUS, then confirm
        // `guarded` turns that into a StorageFault instead of killing
        // the test process.
        use memmap2::MmapOptions;
        use std::io::Write;

        let mut path = std::env::temp_dir();
        path.push(format!(
            "ipcounter-fault-test-{:?}",
            std::thread::current().id()
        ));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(&vec![0u8; 8192]).unwrap();
        }

        let file = std::fs::File::open(&path).unwrap();
        let mmap = unsafe { MmapOptions::new().len(8192).map(&file).unwrap() };
        file.set_len(0).unwrap();

        let result = guarded(0, || {
            let mut sum: u64 = 0;
            for &byte in mmap.iter() {
                sum = sum.wrapping_add(byte as u64);
            }
            std::hint::black_box(sum);
            Ok(())
        });

        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(CounterError::StorageFault { .. })));
    }
}
