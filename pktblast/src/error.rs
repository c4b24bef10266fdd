use std::fmt;

use crate::lcore::LcoreRole;

/// Error type for pktblast setup and launch operations.
///
/// The burst loops themselves never return errors; transient conditions
/// (empty pool, partial transmit accept) are counted as statistics instead.
#[derive(Debug)]
pub enum Error {
    /// A run configuration value is out of range.
    InvalidConfig(String),
    /// An lcore binding carries the `Unknown` role.
    UnknownRole { lcore: u32 },
    /// An lcore binding is missing the queue its role requires.
    MissingQueue { lcore: u32, role: LcoreRole },
    /// An lcore binding references a port the driver does not expose.
    PortOutOfRange { lcore: u32, port: u16 },
    /// An lcore binding references a queue beyond its port's queue range.
    QueueOutOfRange { lcore: u32, queue: u16 },
    /// Spawning a worker thread failed.
    Launch(std::io::Error),
    /// A worker thread panicked before reaching its loop exit.
    WorkerPanic { lcore: u32 },
    /// Pinning a worker thread to its CPU failed.
    Affinity(nix::errno::Errno),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::UnknownRole { lcore } => write!(f, "lcore {lcore} has an unknown role"),
            Error::MissingQueue { lcore, role } => {
                write!(f, "lcore {lcore} role {role:?} is missing a queue assignment")
            }
            Error::PortOutOfRange { lcore, port } => {
                write!(f, "lcore {lcore} is bound to nonexistent port {port}")
            }
            Error::QueueOutOfRange { lcore, queue } => {
                write!(f, "lcore {lcore} is bound to nonexistent queue {queue}")
            }
            Error::Launch(e) => write!(f, "failed to launch worker thread: {e}"),
            Error::WorkerPanic { lcore } => write!(f, "worker thread for lcore {lcore} panicked"),
            Error::Affinity(e) => write!(f, "failed to set CPU affinity: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Launch(e) => Some(e),
            Error::Affinity(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Launch(e)
    }
}

/// A Result type using pktblast's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
