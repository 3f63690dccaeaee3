use std::io;

use thiserror::Error;

use crate::net::TransportKind;

pub type Result<T> = std::result::Result<T, PingError>;

#[derive(Debug, Error)]
pub enum PingError {
    /// Malformed literal or a hostname that did not resolve
    #[error("invalid address {addr:?}: {reason}")]
    Address { addr: String, reason: String },

    #[error("cannot open {kind} ICMP socket: {source}")]
    Permission {
        kind: TransportKind,
        #[source]
        source: io::Error,
    },

    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    #[error("discarded ICMP packet: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("a run is already in progress on this pinger")]
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame of {len} bytes is shorter than the ICMP header")]
    Truncated { len: usize },

    #[error("unexpected ICMP type {icmp_type} code {code}")]
    UnexpectedType { icmp_type: u8, code: u8 },

    #[error("checksum mismatch (carried {carried:#06x}, computed {computed:#06x})")]
    Checksum { carried: u16, computed: u16 },

    #[error("payload of {len} bytes cannot hold a timestamp and token")]
    ShortPayload { len: usize },

    #[error("malformed IP header: {0}")]
    IpHeader(String),
}

impl PingError {
    pub(crate) fn address(addr: &str, reason: impl Into<String>) -> Self {
        PingError::Address {
            addr: addr.to_string(),
            reason: reason.into(),
        }
    }
}

/// Map a socket creation failure to either a privilege problem or a plain
/// transport failure.
pub(crate) fn classify_open_error(kind: TransportKind, err: io::Error) -> PingError {
    let denied = err.kind() == io::ErrorKind::PermissionDenied
        || matches!(
            err.raw_os_error(),
            Some(libc::EPERM)
                | Some(libc::EACCES)
                | Some(libc::EPROTONOSUPPORT)
                | Some(libc::ESOCKTNOSUPPORT)
                | Some(libc::EAFNOSUPPORT)
        );

    if denied {
        PingError::Permission { kind, source: err }
    } else {
        PingError::Transport(err)
    }
}

/// Send failures the engine survives: the packet counts as lost.
pub(crate) fn is_transient_send_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || matches!(
            err.raw_os_error(),
            Some(libc::ENOBUFS) | Some(libc::EHOSTUNREACH) | Some(libc::ENETUNREACH)
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_open_error() {
        let err = io::Error::from_raw_os_error(libc::EPERM);
        assert!(matches!(
            classify_open_error(TransportKind::Raw, err),
            PingError::Permission {
                kind: TransportKind::Raw,
                ..
            }
        ));

        let err = io::Error::from_raw_os_error(libc::EACCES);
        assert!(matches!(
            classify_open_error(TransportKind::Datagram, err),
            PingError::Permission { .. }
        ));

        // IPv6 ping socket on a host without IPv6
        let err = io::Error::from_raw_os_error(libc::EAFNOSUPPORT);
        assert!(matches!(
            classify_open_error(TransportKind::Datagram, err),
            PingError::Permission {
                kind: TransportKind::Datagram,
                ..
            }
        ));

        let err = io::Error::from_raw_os_error(libc::EMFILE);
        assert!(matches!(
            classify_open_error(TransportKind::Raw, err),
            PingError::Transport(_)
        ));
    }

    #[test]
    fn test_transient_send_errors() {
        assert!(is_transient_send_error(&io::Error::from_raw_os_error(
            libc::ENOBUFS
        )));
        assert!(is_transient_send_error(&io::Error::from_raw_os_error(
            libc::EHOSTUNREACH
        )));
        assert!(!is_transient_send_error(&io::Error::from_raw_os_error(
            libc::EBADF
        )));
    }
}
