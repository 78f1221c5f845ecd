//! Session lifecycle: create, resume and the single-active rule.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use uuid::Uuid;

use crate::db::{Chunk, DeviceInfo, Session};
use crate::store::SampleStore;

pub fn new_session_id() -> String {
    format!("s_{}", Uuid::new_v4().simple())
}

/// Persists a fresh Session together with its first open Chunk.
pub async fn start_new<S: SampleStore>(
    store: &S,
    target_rate_hz: u32,
    device: DeviceInfo,
    now: DateTime<Utc>,
) -> Result<(Session, Chunk)> {
    let session = Session::new(new_session_id(), now, target_rate_hz, device);
    let chunk = Chunk::open(&session.session_id, 1, now);

    store
        .create_session(&session, &chunk)
        .await
        .context("failed to create session")?;

    info!(
        "session {} started at {} Hz",
        session.session_id, target_rate_hz
    );
    Ok((session, chunk))
}

/// Reactivates an existing Session, taking the new target rate. The caller's
/// copy only changes once the write has committed.
pub async fn resume<S: SampleStore>(
    store: &S,
    session: &mut Session,
    target_rate_hz: u32,
) -> Result<()> {
    let mut updated = session.clone();
    updated.target_rate_hz = target_rate_hz;
    updated.active = true;

    store
        .put_session(&updated)
        .await
        .with_context(|| format!("failed to resume session {}", updated.session_id))?;

    info!(
        "session {} resumed at chunk {} (next sample {})",
        updated.session_id,
        updated.current_chunk_index,
        updated.next_sample_index()
    );
    *session = updated;
    Ok(())
}

/// Deactivates every Session other than `session_id`. Returns how many rows
/// changed; 0 means the rule already held.
pub async fn enforce_single_active<S: SampleStore>(store: &S, session_id: &str) -> Result<usize> {
    let changed = store
        .enforce_single_active(session_id)
        .await
        .context("failed to enforce single active session")?;
    if changed > 0 {
        info!("single-active repair: {changed} session row(s) updated, {session_id} kept active");
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    #[test]
    fn session_ids_are_prefixed_hex() {
        let id = new_session_id();
        assert!(id.starts_with("s_"));
        assert_eq!(id.len(), 34);
        assert!(id[2..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_session_id());
    }

    #[tokio::test]
    async fn only_one_session_stays_active() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();

        let mut ids = Vec::new();
        for offset in 0..3 {
            let (session, _) = start_new(
                &store,
                50,
                DeviceInfo::default(),
                t0 + Duration::minutes(offset),
            )
            .await
            .unwrap();
            ids.push(session.session_id);
        }

        let keep = &ids[1];
        enforce_single_active(&store, keep).await.unwrap();

        let active: Vec<String> = store
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .filter(|session| session.active)
            .map(|session| session.session_id)
            .collect();
        assert_eq!(active, vec![keep.clone()]);

        assert_eq!(enforce_single_active(&store, keep).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_resume_leaves_session_untouched() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();
        let (mut session, _) = start_new(&store, 50, DeviceInfo::default(), t0)
            .await
            .unwrap();
        session.active = false;

        store.fail_next_session_writes(1);
        assert!(resume(&store, &mut session, 100).await.is_err());
        assert_eq!(session.target_rate_hz, 50);
        assert!(!session.active);

        resume(&store, &mut session, 100).await.unwrap();
        assert_eq!(session.target_rate_hz, 100);
        assert!(session.active);
    }
}
