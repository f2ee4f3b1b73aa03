//! Termination-notification source.
//!
//! Workers never touch OS signals directly. They read notices from a
//! `TerminationListener`, which is fed either by the OS signal handlers
//! (`os_listener`) or by a `TerminationTrigger` held by a test or simulation.

use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

/// A maskable termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationNotice {
    /// SIGTERM
    Terminate,
    /// SIGINT / Ctrl-C
    Interrupt,
}

impl TerminationNotice {
    pub fn signal_number(self) -> i32 {
        match self {
            TerminationNotice::Terminate => libc::SIGTERM,
            TerminationNotice::Interrupt => libc::SIGINT,
        }
    }

    /// Conventional exit code of a process that ended because of this notice.
    pub fn exit_code(self) -> u8 {
        // SIGINT and SIGTERM are small, 128 + signo fits
        (128 + self.signal_number()) as u8
    }
}

impl fmt::Display for TerminationNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationNotice::Terminate => write!(f, "terminated"),
            TerminationNotice::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// Sending half of an in-memory termination source.
#[derive(Debug, Clone)]
pub struct TerminationTrigger {
    tx: mpsc::UnboundedSender<TerminationNotice>,
}

impl TerminationTrigger {
    /// Deliver a notice. Returns false once the listener is gone.
    pub fn send(&self, notice: TerminationNotice) -> bool {
        self.tx.send(notice).is_ok()
    }
}

/// Receiving half, owned by the worker.
#[derive(Debug)]
pub struct TerminationListener {
    rx: mpsc::UnboundedReceiver<TerminationNotice>,
}

impl TerminationListener {
    /// Wait for the next notice. `None` once every trigger is dropped.
    pub async fn recv(&mut self) -> Option<TerminationNotice> {
        self.rx.recv().await
    }

    /// Take a notice that has already arrived, without waiting.
    pub fn try_recv(&mut self) -> Option<TerminationNotice> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected trigger/listener pair.
pub fn channel() -> (TerminationTrigger, TerminationListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TerminationTrigger { tx }, TerminationListener { rx })
}

/// Install handlers for SIGTERM and SIGINT and forward every delivery.
///
/// Once this returns, the default disposition of both signals is replaced
/// for the rest of the process lifetime. Must be called inside a tokio
/// runtime.
#[cfg(unix)]
pub fn os_listener() -> std::io::Result<TerminationListener> {
    use tokio::signal::unix::{signal, SignalKind};

    let (trigger, listener) = channel();
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            let notice = tokio::select! {
                Some(()) = terminate.recv() => TerminationNotice::Terminate,
                Some(()) = interrupt.recv() => TerminationNotice::Interrupt,
                else => break,
            };
            debug!(notice = %notice, "termination signal delivered");
            if !trigger.send(notice) {
                break;
            }
        }
    });

    Ok(listener)
}

/// Only Ctrl-C can be intercepted portably outside unix.
#[cfg(not(unix))]
pub fn os_listener() -> std::io::Result<TerminationListener> {
    let (trigger, listener) = channel();

    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            debug!("ctrl-c delivered");
            if !trigger.send(TerminationNotice::Interrupt) {
                break;
            }
        }
    });

    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(TerminationNotice::Terminate.exit_code(), 143);
        assert_eq!(TerminationNotice::Interrupt.exit_code(), 130);
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (trigger, mut listener) = channel();
        assert!(trigger.send(TerminationNotice::Interrupt));
        assert!(trigger.send(TerminationNotice::Terminate));

        assert_eq!(listener.recv().await, Some(TerminationNotice::Interrupt));
        assert_eq!(listener.try_recv(), Some(TerminationNotice::Terminate));
        assert_eq!(listener.try_recv(), None);
    }

    #[tokio::test]
    async fn test_listener_closes_when_triggers_dropped() {
        let (trigger, mut listener) = channel();
        let second = trigger.clone();
        drop(trigger);
        assert!(second.send(TerminationNotice::Terminate));
        drop(second);

        assert_eq!(listener.recv().await, Some(TerminationNotice::Terminate));
        assert_eq!(listener.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_fails_after_listener_dropped() {
        let (trigger, listener) = channel();
        drop(listener);
        assert!(!trigger.send(TerminationNotice::Terminate));
    }
}
