//! Guarded attendance transitions: mark, override, unlock and reset.
//!
//! A team is either UNMARKED or LOCKED. A mark moves it to LOCKED, an admin
//! unlock moves it back, and an admin mark on a locked team is an override
//! that appends to the audit log and leaves the lock in place. Reset returns
//! a team to UNMARKED with an empty audit log.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::error::{AttendanceError, Result};
use crate::model::attendance::{AttendanceRecord, MarkedBy};
use crate::model::team::{AttendanceStatus, PersonKey, RosterEntry, Team, derive_status};
use crate::model::user::Identity;
use crate::services::settings_registry::SettingsRegistry;
use crate::store::{CommitOutcome, MarkCommit, TeamStore};

/// Bounded retry for lost compare-and-swap races.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkOutcome {
    pub status: AttendanceStatus,
    pub present_count: u32,
    pub absent_count: u32,
    pub locked: bool,
    pub audit_len: usize,
    /// The mark replaced a locked result.
    pub overridden: bool,
    pub round: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnlockOutcome {
    pub locked: bool,
}

/// Teams a reset applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetTarget {
    All,
    Teams(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    pub reset_count: usize,
    pub failures: Vec<ResetFailure>,
}

/// Turn a `personKey -> present` selector into the team's ordered roster.
///
/// The selector must name every person on the team exactly once.
pub fn roster_from_selector(team: &Team, selector: &HashMap<String, bool>) -> Result<Vec<RosterEntry>> {
    let mut chosen: HashMap<PersonKey, bool> = HashMap::with_capacity(selector.len());
    for (raw, present) in selector {
        let key: PersonKey = raw.parse().map_err(AttendanceError::Validation)?;
        if chosen.insert(key, *present).is_some() {
            return Err(AttendanceError::Validation(format!(
                "roster key '{}' appears more than once",
                key
            )));
        }
    }

    let people = team.people();
    let known: HashSet<PersonKey> = people.iter().copied().collect();
    if let Some(stranger) = chosen.keys().find(|key| !known.contains(key)) {
        return Err(AttendanceError::Validation(format!(
            "team '{}' has no person '{}'",
            team.id, stranger
        )));
    }

    people
        .into_iter()
        .map(|person| {
            chosen
                .get(&person)
                .map(|present| RosterEntry {
                    person,
                    present: *present,
                })
                .ok_or_else(|| {
                    AttendanceError::Validation(format!("roster is missing '{}'", person))
                })
        })
        .collect()
}

pub struct AttendanceEngine {
    teams: Arc<dyn TeamStore>,
    settings: Arc<SettingsRegistry>,
    retry: RetryPolicy,
}

impl AttendanceEngine {
    pub fn new(teams: Arc<dyn TeamStore>, settings: Arc<SettingsRegistry>, retry: RetryPolicy) -> Self {
        Self {
            teams,
            settings,
            retry,
        }
    }

    #[instrument(name = "mark_attendance", skip(self, caller, selector), fields(uid = %caller.uid))]
    pub async fn mark_attendance(
        &self,
        team_id: &str,
        caller: &Identity,
        selector: &HashMap<String, bool>,
    ) -> Result<MarkOutcome> {
        if !caller.approved {
            return Err(AttendanceError::NotApproved);
        }

        for attempt in 1..=self.retry.attempts {
            // both guards are re-evaluated on every attempt
            let settings = self.settings.read();
            if !settings.attendance_enabled && !caller.is_admin() {
                info!("Rejected: attendance window closed");
                return Err(AttendanceError::WindowClosed);
            }

            let team = self
                .teams
                .get(team_id)
                .await?
                .ok_or_else(|| AttendanceError::TeamNotFound(team_id.to_string()))?;

            let locked = team.attendance.locked;
            if locked && !caller.is_admin() {
                let holder = team.attendance.holder().ok_or_else(|| {
                    AttendanceError::Corrupt(format!("team '{}' is locked without a holder", team.id))
                })?;
                info!(holder = %holder, "Rejected: already locked");
                return Err(AttendanceError::AlreadyLocked { holder });
            }
            let overridden = locked && caller.is_admin();

            let roster = roster_from_selector(&team, selector)?;
            let total = team.headcount();
            let present = if total == 0 {
                0
            } else {
                roster.iter().filter(|entry| entry.present).count() as u32
            };
            let absent = total - present;
            let status = derive_status(present, total);

            let marked_by = MarkedBy {
                uid: caller.uid.clone(),
                name: if overridden {
                    format!("{} (Override)", caller.display_name)
                } else {
                    caller.display_name.clone()
                },
            };
            let marked_at = Utc::now();
            let round = settings.current_session.clone();

            let record = AttendanceRecord {
                present_count: present,
                absent_count: absent,
                status,
                roster: roster.clone(),
                marked_by: marked_by.clone(),
                marked_at,
                round: round.clone(),
            };

            let commit = MarkCommit {
                team_id: team.id.clone(),
                expected_version: team.version,
                require_unlocked: !caller.is_admin(),
                roster,
                marked_by,
                marked_at,
                round: round.clone(),
                record,
            };

            match self.teams.commit_mark(commit).await? {
                CommitOutcome::Committed(committed) => {
                    info!(
                        %status,
                        present,
                        total,
                        round = %round,
                        overridden,
                        "Attendance marked"
                    );
                    return Ok(MarkOutcome {
                        status,
                        present_count: present,
                        absent_count: absent,
                        locked: committed.attendance.locked,
                        audit_len: committed.attendance.audit_log.len(),
                        overridden,
                        round,
                    });
                }
                CommitOutcome::Conflict => {
                    warn!(attempt, "Lost attendance write race, retrying");
                    if attempt < self.retry.attempts {
                        tokio::time::sleep(self.retry.backoff * attempt).await;
                    }
                }
            }
        }

        error!(attempts = self.retry.attempts, "Giving up on attendance write");
        Err(AttendanceError::WriteConflict {
            attempts: self.retry.attempts,
        })
    }

    /// The old count-only entry point. Counts are derived from the roster
    /// now, so this always fails and tells the caller what to send instead.
    #[deprecated(note = "submit a per-person roster to mark_attendance")]
    pub fn mark_count(&self, team_id: &str, present_count: u32) -> Result<MarkOutcome> {
        warn!(team_id, present_count, "Count-only attendance mark rejected");
        Err(AttendanceError::Validation(
            "count-only marking is deprecated; submit a roster".to_string(),
        ))
    }

    #[instrument(name = "unlock_attendance", skip(self, caller), fields(uid = %caller.uid))]
    pub async fn unlock(&self, team_id: &str, caller: &Identity) -> Result<UnlockOutcome> {
        if !caller.is_admin() {
            return Err(AttendanceError::PermissionDenied("only admins can unlock attendance"));
        }

        match self.teams.unlock(team_id, Utc::now()).await? {
            Some(changed) => {
                if changed {
                    info!("Attendance unlocked");
                } else {
                    debug!("Unlock on an unlocked team, nothing to do");
                }
                Ok(UnlockOutcome { locked: false })
            }
            None => Err(AttendanceError::TeamNotFound(team_id.to_string())),
        }
    }

    /// Best-effort bulk reset. Failures are reported per team and never
    /// roll back teams that were already reset.
    #[instrument(name = "reset_attendance", skip(self, target, caller), fields(uid = %caller.uid))]
    pub async fn reset(&self, target: &ResetTarget, caller: &Identity) -> Result<ResetOutcome> {
        if !caller.is_admin() {
            return Err(AttendanceError::PermissionDenied("only admins can reset attendance"));
        }

        let ids = match target {
            ResetTarget::All => self.teams.ids().await?,
            ResetTarget::Teams(ids) => {
                let mut seen = HashSet::with_capacity(ids.len());
                ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect()
            }
        };

        let mut outcome = ResetOutcome {
            reset_count: 0,
            failures: Vec::new(),
        };

        for id in ids {
            match self.teams.reset(&id, Utc::now()).await {
                Ok(true) => outcome.reset_count += 1,
                Ok(false) => outcome.failures.push(ResetFailure {
                    reason: AttendanceError::TeamNotFound(id.clone()).to_string(),
                    id,
                }),
                Err(e) => {
                    error!(error = %e, team_id = %id, "Reset failed");
                    outcome.failures.push(ResetFailure {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            reset_count = outcome.reset_count,
            failed = outcome.failures.len(),
            "Attendance reset finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::DateTime;
    use tokio::sync::broadcast;

    use super::*;
    use crate::model::role::Role;
    use crate::model::settings::SettingsPatch;
    use crate::model::team::Person;
    use crate::model::team::fixtures::{team, team_with_leader};
    use crate::store::memory::{MemorySettingsStore, MemoryTeamStore};
    use crate::store::{ProfileOutcome, ScanQuery, TeamChange, TeamProfilePatch};

    /// Memory store that counts commits. It can lose every race, or apply a
    /// profile edit between the engine's read and its first commit.
    struct ContendedStore {
        inner: Arc<MemoryTeamStore>,
        commits: AtomicU32,
        lose_every_race: bool,
        edit_before_commit: Mutex<Option<TeamProfilePatch>>,
    }

    impl ContendedStore {
        fn new(inner: Arc<MemoryTeamStore>) -> Self {
            Self {
                inner,
                commits: AtomicU32::new(0),
                lose_every_race: false,
                edit_before_commit: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TeamStore for ContendedStore {
        async fn insert(&self, team: Team) -> Result<Team> {
            self.inner.insert(team).await
        }

        async fn get(&self, id: &str) -> Result<Option<Team>> {
            self.inner.get(id).await
        }

        async fn update_profile(
            &self,
            id: &str,
            patch: &TeamProfilePatch,
            now: DateTime<Utc>,
        ) -> Result<ProfileOutcome> {
            self.inner.update_profile(id, patch, now).await
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            self.inner.delete(id).await
        }

        async fn set_qr_token(&self, id: &str, token: &str, now: DateTime<Utc>) -> Result<bool> {
            self.inner.set_qr_token(id, token, now).await
        }

        async fn commit_mark(&self, commit: MarkCommit) -> Result<CommitOutcome> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            let edit = self.edit_before_commit.lock().unwrap().take();
            if let Some(patch) = edit {
                self.inner.update_profile(&commit.team_id, &patch, Utc::now()).await?;
            }
            if self.lose_every_race {
                return Ok(CommitOutcome::Conflict);
            }
            self.inner.commit_mark(commit).await
        }

        async fn unlock(&self, id: &str, now: DateTime<Utc>) -> Result<Option<bool>> {
            self.inner.unlock(id, now).await
        }

        async fn reset(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
            self.inner.reset(id, now).await
        }

        async fn ids(&self) -> Result<Vec<String>> {
            self.inner.ids().await
        }

        async fn scan(&self, query: &ScanQuery) -> Result<Vec<Team>> {
            self.inner.scan(query).await
        }

        fn subscribe(&self) -> broadcast::Receiver<TeamChange> {
            self.inner.subscribe()
        }
    }

    fn staff(uid: &str, name: &str, role: Role) -> Identity {
        Identity {
            uid: uid.to_string(),
            display_name: name.to_string(),
            role,
            approved: true,
        }
    }

    fn selector(pairs: &[(&str, bool)]) -> HashMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn all(team: &Team, present: usize) -> HashMap<String, bool> {
        team.people()
            .into_iter()
            .enumerate()
            .map(|(i, key)| (key.to_string(), i < present))
            .collect()
    }

    struct Harness {
        store: Arc<MemoryTeamStore>,
        settings: Arc<SettingsRegistry>,
        engine: AttendanceEngine,
        admin: Identity,
    }

    async fn harness(window_open: bool) -> Harness {
        let store = Arc::new(MemoryTeamStore::default());
        let settings = Arc::new(
            SettingsRegistry::init(Arc::new(MemorySettingsStore::default()))
                .await
                .unwrap(),
        );
        let admin = staff("admin", "Admin", Role::Admin);
        settings
            .update(
                &admin,
                &SettingsPatch {
                    attendance_enabled: Some(window_open),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let engine = AttendanceEngine::new(
            store.clone(),
            settings.clone(),
            RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(1),
            },
        );
        Harness {
            store,
            settings,
            engine,
            admin,
        }
    }

    #[actix_web::test]
    async fn lock_override_unlock_walkthrough() {
        let h = harness(true).await;
        let t = h.store.insert(team("t1", "Alpha", 4)).await.unwrap();
        let coord_a = staff("a", "Asha", Role::Coordinator);
        let coord_b = staff("b", "Bala", Role::Coordinator);

        // A marks all four present
        let outcome = h.engine.mark_attendance("t1", &coord_a, &all(&t, 4)).await.unwrap();
        assert_eq!(outcome.status, AttendanceStatus::Present);
        assert!(outcome.locked);
        assert_eq!(outcome.audit_len, 1);
        let after_a = h.store.get("t1").await.unwrap().unwrap();
        assert_eq!(after_a.attendance.marked_by.as_ref().unwrap().name, "Asha");

        // B is turned away and nothing changes
        let err = h.engine.mark_attendance("t1", &coord_b, &all(&t, 2)).await.unwrap_err();
        match err {
            AttendanceError::AlreadyLocked { holder } => {
                assert_eq!(holder.uid, "a");
                assert_eq!(holder.round, "Morning");
            }
            other => panic!("expected AlreadyLocked, got {:?}", other),
        }
        let unchanged = h.store.get("t1").await.unwrap().unwrap();
        assert_eq!(unchanged, after_a);

        // admin override
        let outcome = h.engine.mark_attendance("t1", &h.admin, &all(&t, 1)).await.unwrap();
        assert!(outcome.overridden);
        assert_eq!(outcome.status, AttendanceStatus::Partial);
        assert_eq!(outcome.audit_len, 2);
        let overridden = h.store.get("t1").await.unwrap().unwrap();
        assert!(overridden.attendance.locked);
        assert_eq!(overridden.attendance.marked_by.as_ref().unwrap().name, "Admin (Override)");
        assert_eq!(overridden.attendance.audit_log[1].marked_by.name, "Admin (Override)");

        // unlock keeps history and last values
        h.engine.unlock("t1", &h.admin).await.unwrap();
        let unlocked = h.store.get("t1").await.unwrap().unwrap();
        assert!(!unlocked.attendance.locked);
        assert_eq!(unlocked.attendance.audit_log.len(), 2);
        assert_eq!(unlocked.present_count(), 1);
        assert_eq!(unlocked.status(), Some(AttendanceStatus::Partial));
    }

    #[actix_web::test]
    async fn closed_window_blocks_coordinators_but_not_admins() {
        let h = harness(false).await;
        let t = h.store.insert(team("t1", "Alpha", 2)).await.unwrap();
        let coord = staff("c", "Chitra", Role::Coordinator);

        let err = h.engine.mark_attendance("t1", &coord, &all(&t, 2)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::WindowClosed));
        assert!(!h.store.get("t1").await.unwrap().unwrap().attendance.checked_in);

        let outcome = h.engine.mark_attendance("t1", &h.admin, &all(&t, 2)).await.unwrap();
        assert!(!outcome.overridden);
        assert_eq!(outcome.status, AttendanceStatus::Present);
    }

    #[actix_web::test]
    async fn unapproved_coordinators_are_rejected() {
        let h = harness(true).await;
        let t = h.store.insert(team("t1", "Alpha", 2)).await.unwrap();
        let mut coord = staff("c", "Chitra", Role::Coordinator);
        coord.approved = false;

        let err = h.engine.mark_attendance("t1", &coord, &all(&t, 2)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::NotApproved));
    }

    #[actix_web::test]
    async fn concurrent_coordinators_exactly_one_commits() {
        let h = harness(true).await;
        let t = h.store.insert(team("t1", "Alpha", 3)).await.unwrap();
        let coord_a = staff("a", "Asha", Role::Coordinator);
        let coord_b = staff("b", "Bala", Role::Coordinator);
        let sel_a = all(&t, 3);
        let sel_b = all(&t, 1);

        let (first, second) = tokio::join!(
            h.engine.mark_attendance("t1", &coord_a, &sel_a),
            h.engine.mark_attendance("t1", &coord_b, &sel_b),
        );

        let (winner, loser) = match (&first, &second) {
            (Ok(_), Err(e)) => ("a", e),
            (Err(e), Ok(_)) => ("b", e),
            other => panic!("expected exactly one success, got {:?}", other),
        };
        match loser {
            AttendanceError::AlreadyLocked { holder } => assert_eq!(holder.uid, winner),
            other => panic!("loser should see the lock, got {:?}", other),
        }

        let stored = h.store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.attendance.audit_log.len(), 1);
        assert_eq!(stored.attendance.marked_by.as_ref().unwrap().uid, winner);
    }

    #[actix_web::test]
    async fn audit_log_grows_by_one_per_mark() {
        let h = harness(true).await;
        let t = h.store.insert(team_with_leader("t1", "Alpha", 2)).await.unwrap();
        for round in 1..=4 {
            let outcome = h.engine.mark_attendance("t1", &h.admin, &all(&t, round % 4)).await.unwrap();
            assert_eq!(outcome.audit_len, round);
        }
    }

    #[actix_web::test]
    async fn session_is_snapshotted_at_mark_time() {
        let h = harness(true).await;
        let t = h.store.insert(team("t1", "Alpha", 2)).await.unwrap();
        let coord = staff("c", "Chitra", Role::Coordinator);
        h.engine.mark_attendance("t1", &coord, &all(&t, 2)).await.unwrap();

        h.settings
            .update(
                &h.admin,
                &SettingsPatch {
                    current_session: Some("Final".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        h.engine.mark_attendance("t1", &h.admin, &all(&t, 0)).await.unwrap();

        let stored = h.store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.attendance.audit_log[0].round, "Morning");
        assert_eq!(stored.attendance.audit_log[1].round, "Final");
        assert_eq!(stored.attendance.round.as_deref(), Some("Final"));
        assert_eq!(stored.status(), Some(AttendanceStatus::Absent));
    }

    #[actix_web::test]
    async fn empty_team_is_forced_absent() {
        let h = harness(true).await;
        h.store.insert(team("t0", "Nobody", 0)).await.unwrap();
        let outcome = h.engine.mark_attendance("t0", &h.admin, &HashMap::new()).await.unwrap();
        assert_eq!(outcome.status, AttendanceStatus::Absent);
        assert_eq!(outcome.present_count, 0);
        assert_eq!(outcome.absent_count, 0);
    }

    #[actix_web::test]
    async fn malformed_selectors_are_rejected() {
        let h = harness(true).await;
        h.store.insert(team_with_leader("t1", "Alpha", 2)).await.unwrap();

        let missing = selector(&[("leader", true), ("m0", true)]);
        let stranger = selector(&[("leader", true), ("m0", true), ("m1", true), ("m7", true)]);
        let garbage = selector(&[("captain", true)]);
        for bad in [missing, stranger, garbage] {
            let err = h.engine.mark_attendance("t1", &h.admin, &bad).await.unwrap_err();
            assert!(matches!(err, AttendanceError::Validation(_)), "{:?}", err);
        }
        let stored = h.store.get("t1").await.unwrap().unwrap();
        assert!(stored.attendance.audit_log.is_empty());
    }

    #[actix_web::test]
    async fn unknown_team_is_not_found() {
        let h = harness(true).await;
        let err = h.engine.mark_attendance("nope", &h.admin, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, AttendanceError::TeamNotFound(_)));
        let err = h.engine.unlock("nope", &h.admin).await.unwrap_err();
        assert!(matches!(err, AttendanceError::TeamNotFound(_)));
    }

    #[actix_web::test]
    async fn unlock_is_admin_only_and_idempotent() {
        let h = harness(true).await;
        let t = h.store.insert(team("t1", "Alpha", 2)).await.unwrap();
        let coord = staff("c", "Chitra", Role::Coordinator);
        h.engine.mark_attendance("t1", &coord, &all(&t, 1)).await.unwrap();

        let err = h.engine.unlock("t1", &coord).await.unwrap_err();
        assert!(matches!(err, AttendanceError::PermissionDenied(_)));

        h.engine.unlock("t1", &h.admin).await.unwrap();
        let once = h.store.get("t1").await.unwrap().unwrap();
        let outcome = h.engine.unlock("t1", &h.admin).await.unwrap();
        assert!(!outcome.locked);
        assert_eq!(h.store.get("t1").await.unwrap().unwrap(), once);
    }

    #[actix_web::test]
    async fn reset_reports_failures_without_rolling_back() {
        let h = harness(true).await;
        for (id, name) in [("t1", "Alpha"), ("t2", "Beta")] {
            let t = h.store.insert(team(id, name, 2)).await.unwrap();
            h.engine.mark_attendance(id, &h.admin, &all(&t, 2)).await.unwrap();
        }

        let coord = staff("c", "Chitra", Role::Coordinator);
        let err = h.engine.reset(&ResetTarget::All, &coord).await.unwrap_err();
        assert!(matches!(err, AttendanceError::PermissionDenied(_)));

        let target = ResetTarget::Teams(vec!["t1".into(), "ghost".into()]);
        let outcome = h.engine.reset(&target, &h.admin).await.unwrap();
        assert_eq!(outcome.reset_count, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].id, "ghost");

        let cleared = h.store.get("t1").await.unwrap().unwrap();
        assert!(!cleared.attendance.locked);
        assert!(!cleared.attendance.checked_in);
        assert!(cleared.attendance.audit_log.is_empty());
        assert!(cleared.attendance.roster.is_empty());
        assert_eq!(cleared.status(), None);
        assert!(h.store.get("t2").await.unwrap().unwrap().attendance.locked);

        let outcome = h.engine.reset(&ResetTarget::All, &h.admin).await.unwrap();
        assert_eq!(outcome.reset_count, 2);
        assert!(outcome.failures.is_empty());
    }

    #[actix_web::test]
    #[allow(deprecated)]
    async fn count_only_marking_is_refused() {
        let h = harness(true).await;
        h.store.insert(team("t1", "Alpha", 2)).await.unwrap();
        let err = h.engine.mark_count("t1", 2).unwrap_err();
        assert!(matches!(err, AttendanceError::Validation(_)));
        assert!(!h.store.get("t1").await.unwrap().unwrap().attendance.checked_in);
    }

    #[actix_web::test]
    async fn write_conflict_surfaces_after_every_attempt_is_spent() {
        let h = harness(true).await;
        let t = h.store.insert(team("t1", "Alpha", 2)).await.unwrap();
        let contended = Arc::new(ContendedStore {
            lose_every_race: true,
            ..ContendedStore::new(h.store.clone())
        });
        let engine = AttendanceEngine::new(
            contended.clone(),
            h.settings.clone(),
            RetryPolicy {
                attempts: 4,
                backoff: Duration::from_millis(1),
            },
        );
        let coord = staff("c", "Chitra", Role::Coordinator);

        let err = engine.mark_attendance("t1", &coord, &all(&t, 2)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::WriteConflict { attempts: 4 }), "{:?}", err);
        assert_eq!(contended.commits.load(Ordering::SeqCst), 4);
        assert_eq!(h.store.get("t1").await.unwrap().unwrap(), t);
    }

    #[actix_web::test]
    async fn roster_change_mid_mark_forces_a_fresh_read() {
        let h = harness(true).await;
        let t = h.store.insert(team("t1", "Alpha", 2)).await.unwrap();
        let mut members = t.members.clone();
        members.push(Person {
            name: "Late Joiner".to_string(),
            dept: "EEE".to_string(),
            gender: "Female".to_string(),
        });
        let contended = Arc::new(ContendedStore::new(h.store.clone()));
        *contended.edit_before_commit.lock().unwrap() = Some(TeamProfilePatch {
            members: Some(members),
            ..Default::default()
        });
        let engine = AttendanceEngine::new(contended.clone(), h.settings.clone(), RetryPolicy::default());
        let coord = staff("c", "Chitra", Role::Coordinator);

        // the selector names the two people the coordinator saw
        let err = engine.mark_attendance("t1", &coord, &all(&t, 2)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::Validation(ref msg) if msg.contains("m2")), "{:?}", err);
        assert_eq!(contended.commits.load(Ordering::SeqCst), 1);

        let stored = h.store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.headcount(), 3);
        assert!(!stored.attendance.checked_in);
        assert!(stored.attendance.audit_log.is_empty());
    }

    #[actix_web::test]
    async fn repeated_reset_ids_count_once() {
        let h = harness(true).await;
        let t = h.store.insert(team("t1", "Alpha", 2)).await.unwrap();
        h.engine.mark_attendance("t1", &h.admin, &all(&t, 2)).await.unwrap();
        let before = h.store.get("t1").await.unwrap().unwrap().version;

        let target = ResetTarget::Teams(vec!["t1".into(), "t1".into(), "ghost".into(), "ghost".into()]);
        let outcome = h.engine.reset(&target, &h.admin).await.unwrap();
        assert_eq!(outcome.reset_count, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(h.store.get("t1").await.unwrap().unwrap().version, before + 1);
    }
}
