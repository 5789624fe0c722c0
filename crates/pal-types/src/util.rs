use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Generate a fresh session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Stable short fingerprint of the process context a session started in.
///
/// Two agents running in parallel differ in at least one of cwd, tty,
/// parent pid or start time, so the fingerprint disambiguates concurrent
/// sessions inside the same project root.
pub fn fingerprint(
    cwd: &str,
    tty: Option<&str>,
    parent_pid: Option<i64>,
    started_at: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cwd.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(tty.unwrap_or("").as_bytes());
    hasher.update(b"\x1f");
    hasher.update(parent_pid.unwrap_or(0).to_le_bytes());
    hasher.update(b"\x1f");
    hasher.update(started_at.timestamp_millis().to_le_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 12)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fingerprint_is_stable() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let a = fingerprint("/work/proj", Some("/dev/pts/3"), Some(4242), ts);
        let b = fingerprint("/work/proj", Some("/dev/pts/3"), Some(4242), ts);
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn test_fingerprint_varies_by_context() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let base = fingerprint("/work/proj", Some("/dev/pts/3"), Some(4242), ts);
        assert_ne!(
            base,
            fingerprint("/work/other", Some("/dev/pts/3"), Some(4242), ts)
        );
        assert_ne!(
            base,
            fingerprint("/work/proj", Some("/dev/pts/4"), Some(4242), ts)
        );
        assert_ne!(
            base,
            fingerprint("/work/proj", Some("/dev/pts/3"), Some(4243), ts)
        );
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
    }
}
