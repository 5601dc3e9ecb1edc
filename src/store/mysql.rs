use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, MySqlPool};
use tokio::sync::broadcast;

use crate::error::{AttendanceError, Result};
use crate::model::attendance::{AttendanceRecord, MarkedBy};
use crate::model::notification::{Notification, NotificationKind};
use crate::model::role::Role;
use crate::model::settings::Settings;
use crate::model::team::{AttendanceState, AttendanceStatus, Leader, Person, RosterEntry, Team};
use crate::model::user::User;
use crate::store::{
    CHANGE_CHANNEL_CAPACITY, CommitOutcome, MarkCommit, NotificationStore, ProfileOutcome, ScanQuery,
    SettingsStore, TeamChange, TeamProfilePatch, TeamStore, UserStore,
};
use crate::utils::db_utils::{SqlValue, build_update_sql, execute_update};

const TEAM_COLUMNS: &str = "id, team_name, team_name_lower, college_name, leader, members, \
     track, project_title, qr_token, qr_generated_at, roster, checked_in, marked_by_uid, marked_by_name, \
     marked_at, attendance_round, locked, version, created_at, last_modified";

#[derive(FromRow)]
struct TeamRow {
    id: String,
    team_name: String,
    team_name_lower: String,
    college_name: String,
    leader: Option<Json<Leader>>,
    members: Json<Vec<Person>>,
    track: String,
    project_title: String,
    qr_token: Option<String>,
    qr_generated_at: Option<DateTime<Utc>>,
    roster: Json<Vec<RosterEntry>>,
    checked_in: bool,
    marked_by_uid: Option<String>,
    marked_by_name: Option<String>,
    marked_at: Option<DateTime<Utc>>,
    attendance_round: Option<String>,
    locked: bool,
    version: u64,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

impl TeamRow {
    fn into_team(self, audit_log: Vec<AttendanceRecord>) -> Team {
        let marked_by = match (self.marked_by_uid, self.marked_by_name) {
            (Some(uid), Some(name)) => Some(MarkedBy { uid, name }),
            _ => None,
        };
        Team {
            id: self.id,
            team_name: self.team_name,
            team_name_lower: self.team_name_lower,
            college_name: self.college_name,
            leader: self.leader.map(|Json(leader)| leader),
            members: self.members.0,
            track: self.track,
            project_title: self.project_title,
            qr_token: self.qr_token,
            qr_generated_at: self.qr_generated_at,
            attendance: AttendanceState {
                roster: self.roster.0,
                checked_in: self.checked_in,
                marked_by,
                marked_at: self.marked_at,
                round: self.attendance_round,
                locked: self.locked,
                audit_log,
            },
            version: self.version,
            created_at: self.created_at,
            last_modified: self.last_modified,
        }
    }
}

#[derive(FromRow)]
struct RecordRow {
    team_id: String,
    present_count: u32,
    absent_count: u32,
    status: String,
    roster: Json<Vec<RosterEntry>>,
    marked_by_uid: String,
    marked_by_name: String,
    marked_at: DateTime<Utc>,
    attendance_round: String,
}

impl TryFrom<RecordRow> for AttendanceRecord {
    type Error = AttendanceError;

    fn try_from(row: RecordRow) -> Result<Self> {
        let status = row.status.parse::<AttendanceStatus>().map_err(|_| {
            AttendanceError::Corrupt(format!(
                "attendance record for '{}' has status '{}'",
                row.team_id, row.status
            ))
        })?;
        Ok(AttendanceRecord {
            present_count: row.present_count,
            absent_count: row.absent_count,
            status,
            roster: row.roster.0,
            marked_by: MarkedBy {
                uid: row.marked_by_uid,
                name: row.marked_by_name,
            },
            marked_at: row.marked_at,
            round: row.attendance_round,
        })
    }
}

/// Escape `%`, `_` and `\` so user input is matched literally by LIKE.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn is_duplicate_key(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23000"))
}

pub struct MySqlTeamStore {
    pool: MySqlPool,
    changes: broadcast::Sender<TeamChange>,
}

impl MySqlTeamStore {
    pub fn new(pool: MySqlPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    fn publish(&self, change: TeamChange) {
        let _ = self.changes.send(change);
    }

    async fn load_audit_logs(&self, ids: &[String]) -> Result<HashMap<String, Vec<AttendanceRecord>>> {
        let mut logs: HashMap<String, Vec<AttendanceRecord>> = HashMap::new();
        if ids.is_empty() {
            return Ok(logs);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT team_id, present_count, absent_count, status, roster,
                   marked_by_uid, marked_by_name, marked_at, attendance_round
            FROM attendance_records
            WHERE team_id IN ({})
            ORDER BY team_id, seq
            "#,
            placeholders
        );

        let mut query = sqlx::query_as::<_, RecordRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        for row in query.fetch_all(&self.pool).await? {
            let team_id = row.team_id.clone();
            logs.entry(team_id).or_default().push(row.try_into()?);
        }
        Ok(logs)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM teams WHERE id = ? LIMIT 1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl TeamStore for MySqlTeamStore {
    async fn insert(&self, team: Team) -> Result<Team> {
        let sql = format!(
            "INSERT INTO teams ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TEAM_COLUMNS
        );
        let state = &team.attendance;
        let result = sqlx::query(&sql)
            .bind(&team.id)
            .bind(&team.team_name)
            .bind(&team.team_name_lower)
            .bind(&team.college_name)
            .bind(team.leader.as_ref().map(Json))
            .bind(Json(&team.members))
            .bind(&team.track)
            .bind(&team.project_title)
            .bind(&team.qr_token)
            .bind(team.qr_generated_at)
            .bind(Json(&state.roster))
            .bind(state.checked_in)
            .bind(state.marked_by.as_ref().map(|m| m.uid.as_str()))
            .bind(state.marked_by.as_ref().map(|m| m.name.as_str()))
            .bind(state.marked_at)
            .bind(&state.round)
            .bind(state.locked)
            .bind(team.version)
            .bind(team.created_at)
            .bind(team.last_modified)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                self.publish(TeamChange::Upserted(team.id.clone()));
                Ok(team)
            }
            Err(e) if is_duplicate_key(&e) => Err(AttendanceError::Validation(format!(
                "team id '{}' already exists",
                team.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Team>> {
        let sql = format!("SELECT {} FROM teams WHERE id = ?", TEAM_COLUMNS);
        let Some(row) = sqlx::query_as::<_, TeamRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let mut logs = self.load_audit_logs(&[row.id.clone()]).await?;
        let audit_log = logs.remove(&row.id).unwrap_or_default();
        Ok(Some(row.into_team(audit_log)))
    }

    async fn update_profile(
        &self,
        id: &str,
        patch: &TeamProfilePatch,
        now: DateTime<Utc>,
    ) -> Result<ProfileOutcome> {
        let mut assignments: Vec<(&'static str, SqlValue)> = Vec::new();
        if let Some(name) = &patch.team_name {
            assignments.push(("team_name", SqlValue::String(name.clone())));
            assignments.push(("team_name_lower", SqlValue::String(name.to_lowercase())));
        }
        if let Some(college) = &patch.college_name {
            assignments.push(("college_name", SqlValue::String(college.clone())));
        }
        if let Some(leader) = &patch.leader {
            let value = match leader {
                Some(leader) => SqlValue::Json(
                    serde_json::to_value(leader).map_err(|e| AttendanceError::Corrupt(e.to_string()))?,
                ),
                None => SqlValue::Null,
            };
            assignments.push(("leader", value));
        }
        if let Some(members) = &patch.members {
            assignments.push((
                "members",
                SqlValue::Json(
                    serde_json::to_value(members).map_err(|e| AttendanceError::Corrupt(e.to_string()))?,
                ),
            ));
        }
        if let Some(track) = &patch.track {
            assignments.push(("track", SqlValue::String(track.clone())));
        }
        if let Some(title) = &patch.project_title {
            assignments.push(("project_title", SqlValue::String(title.clone())));
        }
        assignments.push(("last_modified", SqlValue::DateTime(now)));

        let guards: &[&'static str] = if patch.touches_roster() {
            &["checked_in = FALSE"]
        } else {
            &[]
        };
        let update = build_update_sql("teams", assignments, &["version"], "id", id, guards)?;
        let affected = execute_update(&self.pool, update).await?;
        if affected == 0 {
            // version always changes, so a matched row is never reported as untouched
            return Ok(if self.exists(id).await? {
                ProfileOutcome::CheckedIn
            } else {
                ProfileOutcome::NotFound
            });
        }

        self.publish(TeamChange::Upserted(id.to_string()));
        Ok(match self.get(id).await? {
            Some(team) => ProfileOutcome::Updated(team),
            None => ProfileOutcome::NotFound,
        })
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM teams WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            self.publish(TeamChange::Removed(id.to_string()));
        }
        Ok(removed)
    }

    async fn set_qr_token(&self, id: &str, token: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE teams SET qr_token = ?, qr_generated_at = ?, last_modified = ? WHERE id = ?",
        )
        .bind(token)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() > 0;
        if updated {
            self.publish(TeamChange::Upserted(id.to_string()));
        }
        Ok(updated)
    }

    async fn commit_mark(&self, commit: MarkCommit) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        let mut sql = String::from(
            r#"
            UPDATE teams
            SET roster = ?, checked_in = TRUE, marked_by_uid = ?, marked_by_name = ?,
                marked_at = ?, attendance_round = ?, locked = TRUE,
                version = version + 1, last_modified = ?
            WHERE id = ?
            AND version = ?
            "#,
        );
        if commit.require_unlocked {
            sql.push_str(" AND locked = FALSE");
        }

        let updated = sqlx::query(&sql)
            .bind(Json(&commit.roster))
            .bind(&commit.marked_by.uid)
            .bind(&commit.marked_by.name)
            .bind(commit.marked_at)
            .bind(&commit.round)
            .bind(commit.marked_at)
            .bind(&commit.team_id)
            .bind(commit.expected_version)
            .execute(&mut *tx)
            .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::Conflict);
        }

        // the team row is now locked by this transaction, so seq cannot race
        let seq = sqlx::query_scalar::<_, u64>(
            "SELECT CAST(COALESCE(MAX(seq), 0) + 1 AS UNSIGNED) FROM attendance_records WHERE team_id = ?",
        )
        .bind(&commit.team_id)
        .fetch_one(&mut *tx)
        .await?;

        let record = &commit.record;
        sqlx::query(
            r#"
            INSERT INTO attendance_records
                (team_id, seq, present_count, absent_count, status, roster,
                 marked_by_uid, marked_by_name, marked_at, attendance_round)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&commit.team_id)
        .bind(seq)
        .bind(record.present_count)
        .bind(record.absent_count)
        .bind(record.status.as_ref())
        .bind(Json(&record.roster))
        .bind(&record.marked_by.uid)
        .bind(&record.marked_by.name)
        .bind(record.marked_at)
        .bind(&record.round)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.publish(TeamChange::Upserted(commit.team_id.clone()));

        let team = self
            .get(&commit.team_id)
            .await?
            .ok_or_else(|| AttendanceError::TeamNotFound(commit.team_id.clone()))?;
        Ok(CommitOutcome::Committed(team))
    }

    async fn unlock(&self, id: &str, now: DateTime<Utc>) -> Result<Option<bool>> {
        let result = sqlx::query(
            r#"
            UPDATE teams
            SET locked = FALSE, version = version + 1, last_modified = ?
            WHERE id = ?
            AND locked = TRUE
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            self.publish(TeamChange::Upserted(id.to_string()));
            return Ok(Some(true));
        }
        if self.exists(id).await? {
            Ok(Some(false))
        } else {
            Ok(None)
        }
    }

    async fn reset(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE teams
            SET roster = JSON_ARRAY(), checked_in = FALSE, marked_by_uid = NULL,
                marked_by_name = NULL, marked_at = NULL, attendance_round = NULL,
                locked = FALSE, version = version + 1, last_modified = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM attendance_records WHERE team_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.publish(TeamChange::Upserted(id.to_string()));
        Ok(true)
    }

    async fn ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM teams ORDER BY team_name_lower, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn scan(&self, query: &ScanQuery) -> Result<Vec<Team>> {
        let mut sql = format!("SELECT {} FROM teams WHERE 1=1", TEAM_COLUMNS);
        let mut args: Vec<String> = Vec::new();

        if let Some(prefix) = query.prefix.as_deref() {
            sql.push_str(" AND team_name_lower LIKE ?");
            args.push(format!("{}%", escape_like(prefix)));
        }

        if let Some(after) = &query.after {
            sql.push_str(" AND (team_name_lower > ? OR (team_name_lower = ? AND id > ?))");
            args.push(after.name.clone());
            args.push(after.name.clone());
            args.push(after.id.clone());
        }

        sql.push_str(" ORDER BY team_name_lower, id");
        if query.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        tracing::debug!(sql = %sql, args = ?args, "Scanning teams");

        let mut data_q = sqlx::query_as::<_, TeamRow>(&sql);
        for arg in args {
            data_q = data_q.bind(arg);
        }
        if let Some(limit) = query.limit {
            data_q = data_q.bind(limit as u64);
        }

        let rows = data_q.fetch_all(&self.pool).await?;
        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let mut logs = self.load_audit_logs(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let audit_log = logs.remove(&row.id).unwrap_or_default();
                row.into_team(audit_log)
            })
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<TeamChange> {
        self.changes.subscribe()
    }
}

#[derive(FromRow)]
struct SettingsRow {
    attendance_enabled: bool,
    current_session: String,
    sessions: Json<Vec<String>>,
    last_modified: Option<DateTime<Utc>>,
}

pub struct MySqlSettingsStore {
    pool: MySqlPool,
}

impl MySqlSettingsStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for MySqlSettingsStore {
    async fn load(&self) -> Result<Option<Settings>> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT attendance_enabled, current_session, sessions, last_modified
            FROM settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Settings {
            attendance_enabled: row.attendance_enabled,
            current_session: row.current_session,
            sessions: row.sessions.0,
            last_modified: row.last_modified,
        }))
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (id, attendance_enabled, current_session, sessions, last_modified)
            VALUES (1, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                attendance_enabled = VALUES(attendance_enabled),
                current_session = VALUES(current_session),
                sessions = VALUES(sessions),
                last_modified = VALUES(last_modified)
            "#,
        )
        .bind(settings.attendance_enabled)
        .bind(&settings.current_session)
        .bind(Json(&settings.sessions))
        .bind(settings.last_modified)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(FromRow)]
pub(crate) struct UserRow {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AttendanceError;

    fn try_from(row: UserRow) -> Result<Self> {
        let role = row.role.parse::<Role>().map_err(|_| {
            AttendanceError::Corrupt(format!("user '{}' has role '{}'", row.uid, row.role))
        })?;
        Ok(User {
            uid: row.uid,
            name: row.name,
            email: row.email,
            role,
            approved: row.approved,
            created_at: row.created_at,
        })
    }
}

pub struct MySqlUserStore {
    pool: MySqlPool,
}

impl MySqlUserStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for MySqlUserStore {
    async fn get(&self, uid: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT uid, name, email, role, approved, created_at FROM users WHERE uid = ?",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn insert_if_absent(&self, user: User) -> Result<User> {
        sqlx::query(
            r#"
            INSERT IGNORE INTO users (uid, name, email, role, approved, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.uid)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_ref())
        .bind(user.approved)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        self.get(&user.uid)
            .await?
            .ok_or_else(|| AttendanceError::UserNotFound(user.uid.clone()))
    }

    async fn list(&self) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT uid, name, email, role, approved, created_at FROM users ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(User::try_from).collect()
    }

    async fn set_approved(&self, uid: &str, approved: bool) -> Result<bool> {
        sqlx::query("UPDATE users SET approved = ? WHERE uid = ?")
            .bind(approved)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        // MySQL reports changed rows, so an unchanged flag still needs an existence check
        Ok(self.get(uid).await?.is_some())
    }

    async fn set_role(&self, uid: &str, role: Role) -> Result<bool> {
        sqlx::query("UPDATE users SET role = ? WHERE uid = ?")
            .bind(role.as_ref())
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(self.get(uid).await?.is_some())
    }
}

#[derive(FromRow)]
struct NotificationRow {
    id: String,
    message: String,
    kind: String,
    sent_by: String,
    sent_by_uid: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = AttendanceError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        let kind = row.kind.parse::<NotificationKind>().map_err(|_| {
            AttendanceError::Corrupt(format!("notification '{}' has type '{}'", row.id, row.kind))
        })?;
        Ok(Notification {
            id: row.id,
            message: row.message,
            kind,
            sent_by: row.sent_by,
            sent_by_uid: row.sent_by_uid,
            timestamp: row.created_at,
        })
    }
}

pub struct MySqlNotificationStore {
    pool: MySqlPool,
}

impl MySqlNotificationStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for MySqlNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, message, kind, sent_by, sent_by_uid, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.message)
        .bind(notification.kind.as_ref())
        .bind(&notification.sent_by)
        .bind(&notification.sent_by_uid)
        .bind(notification.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, message, kind, sent_by, sent_by_uid, created_at
            FROM notifications
            ORDER BY created_at DESC, seq DESC
            LIMIT ?
            "#,
        )
        .bind(limit as u64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Notification::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("100%_a\\b"), "100\\%\\_a\\\\b");
        assert_eq!(escape_like("team"), "team");
    }
}
