//! Decides which side wins when local and remote sessions differ

use serde::Serialize;
use strum::{AsRefStr, Display};

use super::model::Session;

/// A remote session copy together with the revision it was read at
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    pub session: Session,
    pub rev: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncAction {
    /// Neither side has a session
    Nothing,
    /// Both sides hold the same credential; only sync bookkeeping may change
    InSync,
    /// Upload the local session
    Push,
    /// Replace the local session with the remote one
    Pull,
}

/// Picks the sync direction.
///
/// Rules, in order:
/// 1. a side that is missing receives the other side's copy;
/// 2. identical checksums are in sync;
/// 3. remote still at the revision we last synced: only local changed, push;
/// 4. local has no unsynced changes: only remote changed, pull;
/// 5. both changed: newer `updated_at` wins, ties go to the remote so
///    every replica converges on the same copy.
pub fn reconcile(local: Option<&Session>, remote: Option<&RemoteSnapshot>) -> SyncAction {
    match (local, remote) {
        (None, None) => SyncAction::Nothing,
        (Some(_), None) => SyncAction::Push,
        (None, Some(_)) => SyncAction::Pull,
        (Some(local), Some(remote)) => {
            if local.checksum() == remote.session.checksum() {
                SyncAction::InSync
            } else if local.remote_rev.as_deref() == Some(remote.rev.as_str()) {
                SyncAction::Push
            } else if !local.is_dirty() {
                SyncAction::Pull
            } else if local.updated_at > remote.session.updated_at {
                SyncAction::Push
            } else {
                SyncAction::Pull
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn session(blob: &[u8], age_secs: i64) -> Session {
        Session::with_timestamp(blob.to_vec(), Utc::now() - Duration::seconds(age_secs)).unwrap()
    }

    fn snapshot(blob: &[u8], age_secs: i64, rev: &str) -> RemoteSnapshot {
        RemoteSnapshot {
            session: session(blob, age_secs),
            rev: rev.to_string(),
        }
    }

    #[test]
    fn test_missing_sides() {
        let local = session(b"a", 0);
        let remote = snapshot(b"a", 0, "r1");
        assert_eq!(reconcile(None, None), SyncAction::Nothing);
        assert_eq!(reconcile(Some(&local), None), SyncAction::Push);
        assert_eq!(reconcile(None, Some(&remote)), SyncAction::Pull);
    }

    #[test]
    fn test_same_content_is_in_sync() {
        let local = session(b"a", 100);
        let remote = snapshot(b"a", 0, "r1");
        assert_eq!(reconcile(Some(&local), Some(&remote)), SyncAction::InSync);
    }

    #[test]
    fn test_remote_unchanged_since_last_sync_pushes() {
        // Remote looks newer by clock, but it is still the revision we wrote.
        let mut local = session(b"new", 100);
        local.remote_rev = Some("r1".into());
        let remote = snapshot(b"old", 0, "r1");
        assert_eq!(reconcile(Some(&local), Some(&remote)), SyncAction::Push);
    }

    #[test]
    fn test_clean_local_pulls_remote_change() {
        let mut local = session(b"old", 0);
        local.mark_synced(Some("r1".into()), Utc::now());
        let remote = snapshot(b"new", 500, "r2");
        assert_eq!(reconcile(Some(&local), Some(&remote)), SyncAction::Pull);
    }

    #[test]
    fn test_both_changed_newer_wins() {
        let local = session(b"mine", 10);
        let older_remote = snapshot(b"theirs", 60, "r2");
        let newer_remote = snapshot(b"theirs", 1, "r2");
        assert_eq!(reconcile(Some(&local), Some(&older_remote)), SyncAction::Push);
        assert_eq!(reconcile(Some(&local), Some(&newer_remote)), SyncAction::Pull);
    }

    #[test]
    fn test_tie_goes_to_remote() {
        let at = Utc::now();
        let local = Session::with_timestamp(b"mine".to_vec(), at).unwrap();
        let remote = RemoteSnapshot {
            session: Session::with_timestamp(b"theirs".to_vec(), at).unwrap(),
            rev: "r9".into(),
        };
        assert_eq!(reconcile(Some(&local), Some(&remote)), SyncAction::Pull);
    }

    #[test]
    fn test_action_labels() {
        assert_eq!(SyncAction::InSync.to_string(), "in_sync");
        assert_eq!(SyncAction::Push.as_ref(), "push");
    }
}
