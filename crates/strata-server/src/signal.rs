use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Arrange for SIGINT/SIGTERM to request an orderly stop.
///
/// The first signal only raises the flag behind [`triggered`]; the handler
/// then reinstates the default disposition, so a repeat signal ends the
/// process the usual way.
pub fn install() {
    #[cfg(unix)]
    {
        // Safety: the handler touches nothing but the atomic flag and the
        // signal disposition.
        unsafe {
            for sig in [libc::SIGINT, libc::SIGTERM] {
                libc::signal(sig, handle_stop as *const () as libc::sighandler_t);
            }
        }
    }
}

/// True once a stop signal has been observed.
pub fn triggered() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

#[cfg(unix)]
extern "C" fn handle_stop(sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}
