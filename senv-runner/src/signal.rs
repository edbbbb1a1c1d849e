// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for handling signals while a command is in flight.

use std::io;

/// The signal handler implementation.
///
/// Must be constructed inside a tokio runtime context; the underlying signal
/// streams register with the runtime's reactor.
#[derive(Debug)]
pub(crate) struct SignalHandler {
    signals: Option<imp::Signals>,
}

impl SignalHandler {
    /// Creates a new `SignalHandler` that handles Ctrl-C and termination
    /// signals.
    pub(crate) fn new() -> io::Result<Self> {
        let signals = imp::Signals::new()?;
        Ok(Self {
            signals: Some(signals),
        })
    }

    /// Creates a handler that never fires. Useful for tests.
    pub(crate) fn noop() -> Self {
        Self { signals: None }
    }

    /// Waits for the next shutdown signal. Pending forever on a noop
    /// handler, so this is only useful inside a `select!`.
    pub(crate) async fn recv(&mut self) -> ShutdownEvent {
        match &mut self.signals {
            Some(signals) => signals.recv().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::ShutdownEvent;
    use std::io;
    use tokio::signal::unix::{Signal, SignalKind, signal};

    /// Streams for SIGINT, SIGTERM and SIGHUP.
    #[derive(Debug)]
    pub(super) struct Signals {
        int: Signal,
        term: Signal,
        hup: Signal,
    }

    impl Signals {
        pub(super) fn new() -> io::Result<Self> {
            Ok(Self {
                int: signal(SignalKind::interrupt())?,
                term: signal(SignalKind::terminate())?,
                hup: signal(SignalKind::hangup())?,
            })
        }

        pub(super) async fn recv(&mut self) -> ShutdownEvent {
            tokio::select! {
                _ = self.int.recv() => ShutdownEvent::Interrupt,
                _ = self.term.recv() => ShutdownEvent::Term,
                _ = self.hup.recv() => ShutdownEvent::Hangup,
            }
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::ShutdownEvent;
    use std::io;
    use tokio::signal::windows::{CtrlC, ctrl_c};

    #[derive(Debug)]
    pub(super) struct Signals {
        ctrl_c: CtrlC,
    }

    impl Signals {
        pub(super) fn new() -> io::Result<Self> {
            Ok(Self { ctrl_c: ctrl_c()? })
        }

        pub(super) async fn recv(&mut self) -> ShutdownEvent {
            // If the stream ends, stay pending; the process is on its way
            // out anyway.
            loop {
                match self.ctrl_c.recv().await {
                    Some(()) => return ShutdownEvent::Interrupt,
                    None => std::future::pending::<()>().await,
                }
            }
        }
    }
}

/// A signal event that should cause the run to wind down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ShutdownEvent {
    Interrupt,
    #[cfg_attr(windows, expect(dead_code))]
    Term,
    #[cfg_attr(windows, expect(dead_code))]
    Hangup,
}

/// Re-raises the signal that interrupted the run, after restoring the
/// default disposition. Called once child cleanup is complete, so the driver
/// dies with the conventional wait status.
pub fn reraise_interrupt() {
    #[cfg(unix)]
    {
        // Restore the default handler first; otherwise tokio's registered
        // handler would swallow the raise.
        unsafe {
            libc::signal(libc::SIGINT, libc::SIG_DFL);
            libc::raise(libc::SIGINT);
        }
    }
    // 130 is the conventional interrupted-by-ctrl-c exit status.
    std::process::exit(130);
}
