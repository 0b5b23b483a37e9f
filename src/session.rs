//! The Session Store: process-wide, session-scoped state between extraction
//! and download.
//!
//! ## Concurrency contract
//!
//! Operations on the same session id are serialized; operations on different
//! ids proceed concurrently. The outer map lock is held only long enough to
//! clone an `Arc` to the per-session mutex, so a slow fill on one session
//! never blocks extraction results for another. Per-session serialization is
//! what prevents a verification submission from racing an in-flight fill and
//! producing a form filled from half-updated state.
//!
//! ## Lifecycle
//!
//! Created in `extracting` when processing is requested, opened for
//! verification when extraction completes, mutated only by verification
//! submission and fill, destroyed on download or after an idle TTL. Sessions
//! are purely
//! ephemeral — nothing in here survives the claim it belongs to, and expiry
//! is enforced lazily on access rather than by a background task.

use crate::error::ReisefixError;
use crate::schema::{FieldSet, Leg};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Opaque, unguessable session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, ReisefixError> {
        Uuid::parse_str(s)
            .map(SessionId)
            .map_err(|_| ReisefixError::SessionNotFound { id: s.to_string() })
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Processing status of a session. Transitions are enforced by the store;
/// out-of-order operations fail with `InvalidSessionState` rather than
/// relying on caller discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Extracting,
    AwaitingVerification,
    Filling,
    Complete,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Extracting => "extracting",
            SessionStatus::AwaitingVerification => "awaiting-verification",
            SessionStatus::Filling => "filling",
            SessionStatus::Complete => "complete",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One in-progress reimbursement claim.
///
/// `extracted` is immutable once set; `verified` starts equal to `extracted`
/// and is replaced wholesale by verification submissions (last-write-wins
/// within the per-session serialization).
#[derive(Debug, Clone)]
pub struct Session {
    pub status: SessionStatus,
    pub applicant: FieldSet,
    pub extracted: HashMap<Leg, FieldSet>,
    pub verified: HashMap<Leg, FieldSet>,
    pub leg_errors: Vec<crate::error::LegError>,
    pub filled_document: Option<Vec<u8>>,
    created: Instant,
    last_activity: Instant,
}

impl Session {
    /// A fresh session in `awaiting-verification`, with verified sets
    /// initialised from the extracted sets.
    pub fn new(
        applicant: FieldSet,
        extracted: HashMap<Leg, FieldSet>,
        leg_errors: Vec<crate::error::LegError>,
    ) -> Self {
        let now = Instant::now();
        Session {
            status: SessionStatus::AwaitingVerification,
            verified: extracted.clone(),
            applicant,
            extracted,
            leg_errors,
            filled_document: None,
            created: now,
            last_activity: now,
        }
    }

    /// An empty session in `extracting`, created the moment processing is
    /// requested so the claim is observable (and expirable) while the model
    /// calls are still in flight.
    pub fn extracting() -> Self {
        let now = Instant::now();
        Session {
            status: SessionStatus::Extracting,
            applicant: FieldSet::new(),
            extracted: HashMap::new(),
            verified: HashMap::new(),
            leg_errors: Vec::new(),
            filled_document: None,
            created: now,
            last_activity: now,
        }
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.last_activity.elapsed() > ttl
    }

    fn require_status(&self, expected: SessionStatus) -> Result<(), ReisefixError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(ReisefixError::InvalidSessionState {
                expected: expected.to_string(),
                actual: self.status.to_string(),
            })
        }
    }
}

/// Read-only view of a session handed across the store boundary.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub applicant: FieldSet,
    pub extracted: HashMap<Leg, FieldSet>,
    pub verified: HashMap<Leg, FieldSet>,
    pub leg_errors: Vec<crate::error::LegError>,
    /// Time since the session was created, for diagnostics.
    pub age: Duration,
}

type Shared = Arc<Mutex<Session>>;

/// The only shared mutable resource in the pipeline.
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<SessionId, Shared>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a freshly extracted session under a new id.
    pub async fn create(&self, session: Session) -> SessionId {
        let id = SessionId::new();
        let mut map = self.sessions.lock().await;
        map.insert(id, Arc::new(Mutex::new(session)));
        debug!("session {id} created ({} total)", map.len());
        id
    }

    /// Fetch the per-session handle, purging it first if expired.
    async fn handle(&self, id: SessionId) -> Result<Shared, ReisefixError> {
        let mut map = self.sessions.lock().await;
        if let Some(shared) = map.get(&id).cloned() {
            let expired = {
                let session = shared.lock().await;
                session.expired(self.ttl)
            };
            if expired {
                map.remove(&id);
                debug!("session {id} expired and was purged");
                return Err(ReisefixError::SessionNotFound { id: id.to_string() });
            }
            Ok(shared)
        } else {
            Err(ReisefixError::SessionNotFound { id: id.to_string() })
        }
    }

    /// Current state of a session.
    pub async fn get(&self, id: SessionId) -> Result<SessionSnapshot, ReisefixError> {
        let shared = self.handle(id).await?;
        let mut session = shared.lock().await;
        session.touch();
        Ok(SessionSnapshot {
            status: session.status,
            applicant: session.applicant.clone(),
            extracted: session.extracted.clone(),
            verified: session.verified.clone(),
            leg_errors: session.leg_errors.clone(),
            age: session.age(),
        })
    }

    /// Record the finished extraction and open the session for verification.
    ///
    /// Only valid while the session is still `extracting`; the verified sets
    /// start equal to the extracted sets.
    pub async fn complete_extraction(
        &self,
        id: SessionId,
        applicant: FieldSet,
        extracted: HashMap<Leg, FieldSet>,
        leg_errors: Vec<crate::error::LegError>,
    ) -> Result<(), ReisefixError> {
        let shared = self.handle(id).await?;
        let mut session = shared.lock().await;
        session.require_status(SessionStatus::Extracting)?;
        session.verified = extracted.clone();
        session.extracted = extracted;
        session.applicant = applicant;
        session.leg_errors = leg_errors;
        session.status = SessionStatus::AwaitingVerification;
        session.touch();
        debug!("session {id} finished extraction");
        Ok(())
    }

    /// Replace the verified field sets of a session awaiting verification.
    ///
    /// Values must already have passed the Verification Engine; the store
    /// only enforces lifecycle ordering, not syntax.
    pub async fn update(
        &self,
        id: SessionId,
        verified: HashMap<Leg, FieldSet>,
    ) -> Result<(), ReisefixError> {
        let shared = self.handle(id).await?;
        let mut session = shared.lock().await;
        session.require_status(SessionStatus::AwaitingVerification)?;
        for (leg, fields) in verified {
            session.verified.insert(leg, fields);
        }
        session.touch();
        Ok(())
    }

    /// Run the fill step under the session lock.
    ///
    /// `fill_fn` maps the session's verified state to document bytes. The
    /// status moves `awaiting-verification` → `filling` → `complete` (or
    /// `failed` if the closure errors), all within one critical section so a
    /// concurrent verification submission can never interleave.
    pub async fn fill_with<F>(&self, id: SessionId, fill_fn: F) -> Result<(), ReisefixError>
    where
        F: FnOnce(&Session) -> Result<Vec<u8>, ReisefixError>,
    {
        let shared = self.handle(id).await?;
        let mut session = shared.lock().await;
        session.require_status(SessionStatus::AwaitingVerification)?;
        session.status = SessionStatus::Filling;
        match fill_fn(&session) {
            Ok(bytes) => {
                session.filled_document = Some(bytes);
                session.status = SessionStatus::Complete;
                session.touch();
                Ok(())
            }
            Err(e) => {
                session.status = SessionStatus::Failed;
                Err(e)
            }
        }
    }

    /// One-shot download: return the filled document and destroy the session.
    ///
    /// Exactly-once by construction — the session is gone afterwards, so the
    /// document can never be regenerated from stale data.
    pub async fn take_filled(&self, id: SessionId) -> Result<Vec<u8>, ReisefixError> {
        let shared = self.handle(id).await?;
        let bytes = {
            let mut session = shared.lock().await;
            session.require_status(SessionStatus::Complete)?;
            session
                .filled_document
                .take()
                .ok_or_else(|| ReisefixError::Internal("complete session without document".into()))?
        };
        self.delete(id).await;
        Ok(bytes)
    }

    /// Remove a session unconditionally.
    pub async fn delete(&self, id: SessionId) {
        let mut map = self.sessions.lock().await;
        if map.remove(&id).is_some() {
            debug!("session {id} deleted ({} remaining)", map.len());
        }
    }

    /// Number of live (possibly expired-but-unpurged) sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::empty_field_set;

    fn sample_session() -> Session {
        let mut extracted = HashMap::new();
        for leg in Leg::ALL {
            extracted.insert(leg, empty_field_set(leg));
        }
        Session::new(FieldSet::new(), extracted, Vec::new())
    }

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn get_after_create_returns_created_fields() {
        let store = store();
        let mut session = sample_session();
        session
            .extracted
            .get_mut(&Leg::Outbound)
            .unwrap()
            .insert("hinreise_von".into(), "Ulm".into());
        session.verified = session.extracted.clone();
        let id = store.create(session).await;

        let snap = store.get(id).await.unwrap();
        assert_eq!(snap.status, SessionStatus::AwaitingVerification);
        assert_eq!(snap.extracted[&Leg::Outbound]["hinreise_von"], "Ulm");
        // Verified starts equal to extracted.
        assert_eq!(snap.verified[&Leg::Outbound]["hinreise_von"], "Ulm");
    }

    #[tokio::test]
    async fn update_replaces_verified_last_write_wins() {
        let store = store();
        let id = store.create(sample_session()).await;

        for city in ["Ulm", "Bangkok"] {
            let mut fields = empty_field_set(Leg::Outbound);
            fields.insert("hinreise_von".into(), city.into());
            let mut update = HashMap::new();
            update.insert(Leg::Outbound, fields);
            store.update(id, update).await.unwrap();
        }

        let snap = store.get(id).await.unwrap();
        assert_eq!(snap.verified[&Leg::Outbound]["hinreise_von"], "Bangkok");
        // Extracted is never mutated by updates.
        assert_eq!(snap.extracted[&Leg::Outbound]["hinreise_von"], "");
    }

    #[tokio::test]
    async fn get_unknown_session_is_not_found() {
        let store = store();
        let err = store.get(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, ReisefixError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn expired_session_is_purged_on_access() {
        let store = SessionStore::new(Duration::from_millis(10));
        let id = store.create(sample_session()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let err = store.get(id).await.unwrap_err();
        assert!(matches!(err, ReisefixError::SessionNotFound { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn extraction_lifecycle_via_complete_extraction() {
        let store = store();
        let id = store.create(Session::extracting()).await;
        assert_eq!(
            store.get(id).await.unwrap().status,
            SessionStatus::Extracting
        );

        let mut extracted = HashMap::new();
        let mut outbound = empty_field_set(Leg::Outbound);
        outbound.insert("hinreise_von".into(), "Ulm".into());
        extracted.insert(Leg::Outbound, outbound);
        store
            .complete_extraction(id, FieldSet::new(), extracted, Vec::new())
            .await
            .unwrap();

        let snap = store.get(id).await.unwrap();
        assert_eq!(snap.status, SessionStatus::AwaitingVerification);
        assert_eq!(snap.verified[&Leg::Outbound]["hinreise_von"], "Ulm");

        // Completing twice is out of order.
        let err = store
            .complete_extraction(id, FieldSet::new(), HashMap::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReisefixError::InvalidSessionState { .. }));
    }

    #[tokio::test]
    async fn snapshot_reports_session_age() {
        let store = store();
        let id = store.create(sample_session()).await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        let snap = store.get(id).await.unwrap();
        assert!(snap.age >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn fill_requires_awaiting_verification() {
        let store = store();
        let id = store.create(Session::extracting()).await;

        let err = store.fill_with(id, |_| Ok(vec![1])).await.unwrap_err();
        match err {
            ReisefixError::InvalidSessionState { expected, actual } => {
                assert_eq!(expected, "awaiting-verification");
                assert_eq!(actual, "extracting");
            }
            other => panic!("expected InvalidSessionState, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fill_twice_fails_second_time() {
        let store = store();
        let id = store.create(sample_session()).await;
        store.fill_with(id, |_| Ok(vec![1, 2, 3])).await.unwrap();
        let err = store.fill_with(id, |_| Ok(vec![4])).await.unwrap_err();
        assert!(matches!(err, ReisefixError::InvalidSessionState { .. }));
    }

    #[tokio::test]
    async fn failed_fill_marks_session_failed() {
        let store = store();
        let id = store.create(sample_session()).await;
        let err = store
            .fill_with(id, |_| {
                Err(ReisefixError::FillInvocation { detail: "boom".into() })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReisefixError::FillInvocation { .. }));
        let snap = store.get(id).await.unwrap();
        assert_eq!(snap.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn download_is_one_shot() {
        let store = store();
        let id = store.create(sample_session()).await;
        store.fill_with(id, |_| Ok(vec![9, 9])).await.unwrap();

        let bytes = store.take_filled(id).await.unwrap();
        assert_eq!(bytes, vec![9, 9]);

        let err = store.take_filled(id).await.unwrap_err();
        assert!(matches!(err, ReisefixError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let store = store();
        let a = store.create(sample_session()).await;
        let b = store.create(sample_session()).await;
        store.fill_with(a, |_| Ok(vec![1])).await.unwrap();
        // b is untouched by a's lifecycle.
        let snap = store.get(b).await.unwrap();
        assert_eq!(snap.status, SessionStatus::AwaitingVerification);
        assert_eq!(store.len().await, 2);
    }
}
