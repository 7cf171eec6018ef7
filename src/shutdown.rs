// src/shutdown.rs

//! Process signals that end a run early.
//!
//! Whichever signal arrives, the caller drops the run future so the live
//! engine handle is dropped and its process group killed.

use std::future::pending;
use std::io;
use strum::Display;

/// The signal that ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Shutdown {
    #[strum(serialize = "SIGINT")]
    Interrupt,
    #[strum(serialize = "SIGTERM")]
    Terminate,
    #[strum(serialize = "SIGHUP")]
    Hangup,
}

impl Shutdown {
    /// Shell convention: 128 + signal number.
    pub fn exit_code(self) -> u8 {
        match self {
            Shutdown::Interrupt => 130,
            Shutdown::Terminate => 143,
            Shutdown::Hangup => 129,
        }
    }
}

/// Signal listeners, registered before the run starts.
pub struct ShutdownSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    /// Replaces the default (fatal) disposition of SIGTERM and SIGHUP.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Resolves once the first shutdown signal arrives.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Shutdown {
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => Shutdown::Interrupt,
            Some(()) = self.terminate.recv() => Shutdown::Terminate,
            Some(()) = self.hangup.recv() => Shutdown::Hangup,
            else => pending().await,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Shutdown {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Shutdown::Interrupt,
            Err(_) => pending().await,
        }
    }
}
