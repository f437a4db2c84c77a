use std::io;
use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Retry delay for transient accept failures: 5ms, doubling, capped at 1s.
#[derive(Debug, Default)]
pub struct AcceptBackoff {
    current: Option<Duration>,
}

impl AcceptBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the backoff and return how long to wait before the next accept.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => INITIAL_DELAY,
            Some(delay) => (delay * 2).min(MAX_DELAY),
        };
        self.current = Some(next);
        next
    }

    /// Forget accumulated backoff after a successful accept.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Whether an accept error is worth retrying rather than tearing the listener down.
pub fn is_temporary(err: &io::Error) -> bool {
    use io::ErrorKind::*;

    if matches!(
        err.kind(),
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock | TimedOut
    ) {
        return true;
    }

    #[cfg(unix)]
    if let Some(code) = err.raw_os_error() {
        use nix::errno::Errno;
        let errno = Errno::from_i32(code);
        return matches!(
            errno,
            Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM
        );
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_five_millis() {
        let mut backoff = AcceptBackoff::new();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 320, 640]);
    }

    #[test]
    fn test_backoff_never_exceeds_cap() {
        let mut backoff = AcceptBackoff::new();
        for _ in 0..100 {
            assert!(backoff.next_delay() <= MAX_DELAY);
        }
        assert_eq!(backoff.next_delay(), MAX_DELAY);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = AcceptBackoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), INITIAL_DELAY);
    }

    #[test]
    fn test_error_classification() {
        assert!(is_temporary(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_temporary(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_temporary(&io::Error::from(io::ErrorKind::InvalidInput)));
        assert!(!is_temporary(&io::Error::other("listener gone")));
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_exhaustion_is_temporary() {
        let err = io::Error::from_raw_os_error(nix::errno::Errno::EMFILE as i32);
        assert!(is_temporary(&err));
    }
}
