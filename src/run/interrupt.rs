use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

/// Set by the SIGINT/SIGTERM handler.
static SIGNALLED: AtomicBool = AtomicBool::new(false);

/// Cooperative stop request, checked by the run loop between documents.
#[derive(Debug, Clone, Default)]
pub struct InterruptToken {
    requested: Arc<AtomicBool>,
}

impl InterruptToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to flush and exit at the next safe point.
    pub fn interrupt(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether this token was interrupted or a termination signal arrived.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.requested.load(Ordering::SeqCst) || SIGNALLED.load(Ordering::SeqCst)
    }
}

/// Route SIGINT and SIGTERM to every [`InterruptToken`] instead of terminating the process.
#[cfg(unix)]
pub fn install_signal_handlers() -> Result<()> {
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

    extern "C" fn on_signal(_signal: std::ffi::c_int) {
        SIGNALLED.store(true, Ordering::SeqCst);
    }

    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        unsafe { sigaction(signal, &action) }.map_err(std::io::Error::from)?;
    }
    tracing::debug!("signal handlers installed");
    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers() -> Result<()> {
    Ok(())
}
