//! Error types for the switch fabric.
//!
//! The forwarding data plane never raises errors: every failure on that
//! path is counted and the frame is dropped. `SwitchError`
//! and `LinkError` cover the two places this crate *does* surface a `Result`
//! — startup/configuration, and the virtual-link polling receive path.

/// Startup and configuration failures. These are the only failures in the
/// fabric that can lead to a nonzero process exit.
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    /// A port could not be set up (bad index, duplicate, or missing config).
    #[error("port setup failed: {0}")]
    PortSetup(String),

    /// The number of ports discovered did not match the configured topology.
    #[error("port count mismatch: expected {expected}, found {found}")]
    PortCountMismatch { expected: usize, found: usize },

    /// A static MAC table file could not be loaded. This is surfaced for
    /// callers that want to treat it as fatal; `MacTable::load_static` itself
    /// only warns and skips bad lines (recoverable configuration error).
    #[error("static MAC table error: {0}")]
    StaticMacTable(String),

    /// An unknown or unsupported topology shape was requested.
    #[error("unknown topology: {0}")]
    UnknownTopology(String),
}

/// Outcomes of a virtual-link polling `recv`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LinkError {
    /// No frame arrived before the deadline.
    #[error("recv timed out")]
    Timeout,

    /// The caller's buffer is smaller than the pending frame.
    #[error("buffer too small: need {needed}, have {max}")]
    BufferTooSmall { needed: usize, max: usize },

    /// The referenced link id does not exist.
    #[error("unknown link id {0}")]
    UnknownLink(u32),

    /// The requested operation is invalid for the endpoint's current state
    /// (e.g. connecting an endpoint that is already connected).
    #[error("invalid link state: {0}")]
    InvalidState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_count_mismatch_displays_both_numbers() {
        let err = SwitchError::PortCountMismatch {
            expected: 3,
            found: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('2'));
    }

    #[test]
    fn link_errors_compare_by_variant() {
        assert_eq!(LinkError::Timeout, LinkError::Timeout);
        assert_ne!(LinkError::Timeout, LinkError::UnknownLink(0));
    }

    #[test]
    fn buffer_too_small_displays_sizes() {
        let err = LinkError::BufferTooSmall {
            needed: 128,
            max: 64,
        };
        assert!(err.to_string().contains("128"));
        assert!(err.to_string().contains("64"));
    }
}
