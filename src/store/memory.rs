//! In-process backend with the same conditional-write semantics as MySQL.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};

use crate::error::{AttendanceError, Result};
use crate::model::notification::Notification;
use crate::model::role::Role;
use crate::model::settings::Settings;
use crate::model::team::{AttendanceState, Team};
use crate::model::user::User;
use crate::store::{
    CHANGE_CHANNEL_CAPACITY, CommitOutcome, MarkCommit, NotificationStore, ProfileOutcome, ScanQuery,
    SettingsStore, TeamChange, TeamProfilePatch, TeamStore, UserStore,
};

pub struct MemoryTeamStore {
    teams: RwLock<BTreeMap<String, Team>>,
    changes: broadcast::Sender<TeamChange>,
}

impl Default for MemoryTeamStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            teams: RwLock::new(BTreeMap::new()),
            changes,
        }
    }
}

impl MemoryTeamStore {
    fn publish(&self, change: TeamChange) {
        // no receivers is fine
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl TeamStore for MemoryTeamStore {
    async fn insert(&self, team: Team) -> Result<Team> {
        let mut teams = self.teams.write().await;
        if teams.contains_key(&team.id) {
            return Err(AttendanceError::Validation(format!(
                "team id '{}' already exists",
                team.id
            )));
        }
        teams.insert(team.id.clone(), team.clone());
        drop(teams);
        self.publish(TeamChange::Upserted(team.id.clone()));
        Ok(team)
    }

    async fn get(&self, id: &str) -> Result<Option<Team>> {
        Ok(self.teams.read().await.get(id).cloned())
    }

    async fn update_profile(
        &self,
        id: &str,
        patch: &TeamProfilePatch,
        now: DateTime<Utc>,
    ) -> Result<ProfileOutcome> {
        let mut teams = self.teams.write().await;
        let Some(team) = teams.get_mut(id) else {
            return Ok(ProfileOutcome::NotFound);
        };
        if patch.touches_roster() && team.attendance.checked_in {
            return Ok(ProfileOutcome::CheckedIn);
        }
        patch.apply(team, now);
        team.version += 1;
        let updated = team.clone();
        drop(teams);
        self.publish(TeamChange::Upserted(id.to_string()));
        Ok(ProfileOutcome::Updated(updated))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.teams.write().await.remove(id).is_some();
        if removed {
            self.publish(TeamChange::Removed(id.to_string()));
        }
        Ok(removed)
    }

    async fn set_qr_token(&self, id: &str, token: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut teams = self.teams.write().await;
        let Some(team) = teams.get_mut(id) else {
            return Ok(false);
        };
        team.qr_token = Some(token.to_string());
        team.qr_generated_at = Some(now);
        team.last_modified = now;
        drop(teams);
        self.publish(TeamChange::Upserted(id.to_string()));
        Ok(true)
    }

    async fn commit_mark(&self, commit: MarkCommit) -> Result<CommitOutcome> {
        let mut teams = self.teams.write().await;
        let Some(team) = teams.get_mut(&commit.team_id) else {
            return Ok(CommitOutcome::Conflict);
        };
        if team.version != commit.expected_version
            || (commit.require_unlocked && team.attendance.locked)
        {
            return Ok(CommitOutcome::Conflict);
        }

        let state = &mut team.attendance;
        state.roster = commit.roster;
        state.checked_in = true;
        state.marked_by = Some(commit.marked_by);
        state.marked_at = Some(commit.marked_at);
        state.round = Some(commit.round);
        state.locked = true;
        state.audit_log.push(commit.record);
        team.version += 1;
        team.last_modified = commit.marked_at;

        let committed = team.clone();
        drop(teams);
        self.publish(TeamChange::Upserted(commit.team_id));
        Ok(CommitOutcome::Committed(committed))
    }

    async fn unlock(&self, id: &str, now: DateTime<Utc>) -> Result<Option<bool>> {
        let mut teams = self.teams.write().await;
        let Some(team) = teams.get_mut(id) else {
            return Ok(None);
        };
        if !team.attendance.locked {
            return Ok(Some(false));
        }
        team.attendance.locked = false;
        team.version += 1;
        team.last_modified = now;
        drop(teams);
        self.publish(TeamChange::Upserted(id.to_string()));
        Ok(Some(true))
    }

    async fn reset(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut teams = self.teams.write().await;
        let Some(team) = teams.get_mut(id) else {
            return Ok(false);
        };
        team.attendance = AttendanceState::default();
        team.version += 1;
        team.last_modified = now;
        drop(teams);
        self.publish(TeamChange::Upserted(id.to_string()));
        Ok(true)
    }

    async fn ids(&self) -> Result<Vec<String>> {
        Ok(self.teams.read().await.keys().cloned().collect())
    }

    async fn scan(&self, query: &ScanQuery) -> Result<Vec<Team>> {
        let teams = self.teams.read().await;
        let mut matched: Vec<Team> = teams
            .values()
            .filter(|team| query.matches(team))
            .cloned()
            .collect();
        matched.sort_by_key(|team| team.sort_key());
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    fn subscribe(&self) -> broadcast::Receiver<TeamChange> {
        self.changes.subscribe()
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    settings: RwLock<Option<Settings>>,
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<Option<Settings>> {
        Ok(self.settings.read().await.clone())
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        *self.settings.write().await = Some(settings.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<BTreeMap<String, User>>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get(&self, uid: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(uid).cloned())
    }

    async fn insert_if_absent(&self, user: User) -> Result<User> {
        let mut users = self.users.write().await;
        Ok(users.entry(user.uid.clone()).or_insert(user).clone())
    }

    async fn list(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn set_approved(&self, uid: &str, approved: bool) -> Result<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(uid) {
            Some(user) => {
                user.approved = approved;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_role(&self, uid: &str, role: Role) -> Result<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(uid) {
            Some(user) => {
                user.role = role;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: RwLock<Vec<Notification>>,
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        self.notifications.write().await.push(notification.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Notification>> {
        let notifications = self.notifications.read().await;
        Ok(notifications.iter().rev().take(limit).cloned().collect())
    }
}
