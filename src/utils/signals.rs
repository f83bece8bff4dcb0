//! Process signal flags.
//!
//! While a topology is live, SIGINT must not kill the process: namespaces,
//! veth pairs and switch processes would outlive it. [`SignalFlags`] replaces
//! the default dispositions with flags that the session and the start-up
//! loops poll:
//!
//! - SIGINT sets the interrupt flag. The shell prints a notice and keeps
//!   going; during set-up it aborts the run.
//! - SIGTERM and SIGHUP set the terminate flag, which ends the run through
//!   the normal teardown path.

use log::debug;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared interrupt/terminate flags
#[derive(Debug, Clone, Default)]
pub struct SignalFlags {
    interrupt: Arc<AtomicBool>,
    terminate: Arc<AtomicBool>,
}

impl SignalFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT, SIGTERM and SIGHUP to these flags for the rest of the process.
    pub fn install(&self) -> io::Result<()> {
        signal_hook::flag::register(SIGINT, Arc::clone(&self.interrupt))?;
        for signal in [SIGTERM, SIGHUP] {
            signal_hook::flag::register(signal, Arc::clone(&self.terminate))?;
        }
        debug!("Installed SIGINT/SIGTERM/SIGHUP handlers");
        Ok(())
    }

    /// Clear and return the interrupt flag
    pub fn take_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::SeqCst)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Either flag is set; long waits give up on this
    pub fn should_abort(&self) -> bool {
        self.is_interrupted() || self.terminate_requested()
    }

    pub fn raise_interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_shared_between_clones() {
        let flags = SignalFlags::new();
        let clone = flags.clone();
        assert!(!flags.should_abort());

        clone.raise_interrupt();
        assert!(flags.is_interrupted());
        assert!(flags.should_abort());
        assert!(flags.take_interrupt());
        assert!(!clone.is_interrupted());

        clone.request_terminate();
        assert!(flags.terminate_requested());
        // Terminate is sticky
        assert!(!flags.take_interrupt());
        assert!(flags.should_abort());
    }

    #[test]
    fn test_sigint_sets_interrupt_flag() {
        let flags = SignalFlags::new();
        flags.install().unwrap();

        signal_hook::low_level::raise(SIGINT).unwrap();

        assert!(flags.take_interrupt());
        assert!(!flags.terminate_requested());
    }
}
