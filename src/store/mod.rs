//! Persistence seams for the collections: `teams`, `settings`, `users`,
//! `notifications`.
//!
//! Each collection sits behind an `async_trait` so the services can run on
//! MySQL in production and on the in-memory backend in tests and demos.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::model::attendance::{AttendanceRecord, MarkedBy};
use crate::model::notification::Notification;
use crate::model::role::Role;
use crate::model::settings::Settings;
use crate::model::team::{Leader, Person, RosterEntry, SortKey, Team};
use crate::model::user::User;

/// Capacity of the change fan-out; slow subscribers resnapshot on lag.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Published after every committed write to `teams`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamChange {
    Upserted(String),
    Removed(String),
}

/// Range scan over the name index, ordered by [`SortKey`].
#[derive(Debug, Clone, Default)]
pub struct ScanQuery {
    /// Lowercase prefix on `team_name_lower`.
    pub prefix: Option<String>,
    /// Exclusive lower bound.
    pub after: Option<SortKey>,
    pub limit: Option<usize>,
}

impl ScanQuery {
    pub fn matches(&self, team: &Team) -> bool {
        let prefix_ok = self
            .prefix
            .as_deref()
            .is_none_or(|p| team.team_name_lower.starts_with(p));
        let after_ok = self
            .after
            .as_ref()
            .is_none_or(|after| team.sort_key() > *after);
        prefix_ok && after_ok
    }
}

/// Everything a successful mark writes, applied as one conditional write.
#[derive(Debug, Clone)]
pub struct MarkCommit {
    pub team_id: String,
    /// The write only lands if the record is still at this version.
    pub expected_version: u64,
    /// Non-admin marks additionally require the team to still be unlocked.
    pub require_unlocked: bool,
    pub roster: Vec<RosterEntry>,
    pub marked_by: MarkedBy,
    pub marked_at: DateTime<Utc>,
    pub round: String,
    pub record: AttendanceRecord,
}

#[derive(Debug)]
pub enum CommitOutcome {
    Committed(Team),
    /// The precondition no longer held; nothing was written.
    Conflict,
}

#[derive(Debug)]
pub enum ProfileOutcome {
    Updated(Team),
    NotFound,
    /// A roster change was refused because the team is checked in.
    CheckedIn,
}

/// Profile columns an update may touch. Attendance fields are not here.
#[derive(Debug, Clone, Default)]
pub struct TeamProfilePatch {
    pub team_name: Option<String>,
    pub college_name: Option<String>,
    pub leader: Option<Option<Leader>>,
    pub members: Option<Vec<Person>>,
    pub track: Option<String>,
    pub project_title: Option<String>,
}

impl TeamProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.team_name.is_none()
            && self.college_name.is_none()
            && self.leader.is_none()
            && self.members.is_none()
            && self.track.is_none()
            && self.project_title.is_none()
    }

    pub fn touches_roster(&self) -> bool {
        self.leader.is_some() || self.members.is_some()
    }

    pub fn apply(&self, team: &mut Team, now: DateTime<Utc>) {
        if let Some(name) = &self.team_name {
            team.team_name = name.clone();
            team.team_name_lower = name.to_lowercase();
        }
        if let Some(college) = &self.college_name {
            team.college_name = college.clone();
        }
        if let Some(leader) = &self.leader {
            team.leader = leader.clone();
        }
        if let Some(members) = &self.members {
            team.members = members.clone();
        }
        if let Some(track) = &self.track {
            team.track = track.clone();
        }
        if let Some(title) = &self.project_title {
            team.project_title = title.clone();
        }
        team.last_modified = now;
    }
}

#[async_trait]
pub trait TeamStore: Send + Sync {
    /// Fails with `Validation` if the id is already taken.
    async fn insert(&self, team: Team) -> Result<Team>;

    async fn get(&self, id: &str) -> Result<Option<Team>>;

    /// Apply `patch` and bump `version`. A patch that touches the roster
    /// only lands while the team is not checked in, tested in the same write.
    async fn update_profile(
        &self,
        id: &str,
        patch: &TeamProfilePatch,
        now: DateTime<Utc>,
    ) -> Result<ProfileOutcome>;

    /// `false` when the team does not exist.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn set_qr_token(&self, id: &str, token: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Verify the lock/version precondition and apply the mark in one step.
    async fn commit_mark(&self, commit: MarkCommit) -> Result<CommitOutcome>;

    /// `None` when the team does not exist, otherwise whether anything changed.
    async fn unlock(&self, id: &str, now: DateTime<Utc>) -> Result<Option<bool>>;

    /// Clear every attendance field and the audit log. `false` if absent.
    async fn reset(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    async fn ids(&self) -> Result<Vec<String>>;

    async fn scan(&self, query: &ScanQuery) -> Result<Vec<Team>>;

    fn subscribe(&self) -> broadcast::Receiver<TeamChange>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<Option<Settings>>;

    async fn save(&self, settings: &Settings) -> Result<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, uid: &str) -> Result<Option<User>>;

    /// Inserts the user unless the uid already exists; returns the stored row.
    async fn insert_if_absent(&self, user: User) -> Result<User>;

    async fn list(&self) -> Result<Vec<User>>;

    /// `false` when the user does not exist.
    async fn set_approved(&self, uid: &str, approved: bool) -> Result<bool>;

    async fn set_role(&self, uid: &str, role: Role) -> Result<bool>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<()>;

    /// Newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Notification>>;
}
