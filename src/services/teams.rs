use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AttendanceError, Result};
use crate::model::team::{AttendanceState, Leader, MAX_MEMBERS, Person, Team};
use crate::model::user::Identity;
use crate::store::{ProfileOutcome, TeamProfilePatch, TeamStore};

const MAX_ID_LEN: usize = 64;

/// Path segments under `/teams` that are routes rather than team ids.
const RESERVED_IDS: &[&str] = &["all", "stats", "stream"];

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewTeam {
    /// Assigned by the server when omitted.
    #[schema(example = "T-014")]
    pub id: Option<String>,
    #[schema(example = "Byte Busters")]
    pub team_name: String,
    #[serde(default)]
    #[schema(example = "KNCET")]
    pub college_name: String,
    pub leader: Option<Leader>,
    #[serde(default)]
    pub members: Vec<Person>,
    #[serde(default)]
    #[schema(example = "Open Innovation")]
    pub track: String,
    #[serde(default)]
    pub project_title: String,
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN || id.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(AttendanceError::Validation(format!("'{}' is not a usable team id", id)));
    }
    if RESERVED_IDS.iter().any(|reserved| reserved.eq_ignore_ascii_case(id)) {
        return Err(AttendanceError::Validation(format!("'{}' is a reserved team id", id)));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AttendanceError::Validation("team name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

fn validate_people(leader: Option<&Leader>, members: &[Person]) -> Result<()> {
    if members.len() > MAX_MEMBERS {
        return Err(AttendanceError::Validation(format!(
            "a team has at most {} members besides the leader, got {}",
            MAX_MEMBERS,
            members.len()
        )));
    }
    if leader.is_some_and(|l| l.name.trim().is_empty()) {
        return Err(AttendanceError::Validation("leader name must not be empty".to_string()));
    }
    if let Some(index) = members.iter().position(|m| m.name.trim().is_empty()) {
        return Err(AttendanceError::Validation(format!("member m{} has no name", index)));
    }
    Ok(())
}

/// Profile management for teams. Attendance fields are never written here.
pub struct TeamService {
    teams: Arc<dyn TeamStore>,
}

impl TeamService {
    pub fn new(teams: Arc<dyn TeamStore>) -> Self {
        Self { teams }
    }

    pub async fn create(&self, caller: &Identity, new: NewTeam) -> Result<Team> {
        caller.ensure_admin("only admins can create teams")?;

        let id = match new.id {
            Some(id) => {
                let id = id.trim().to_string();
                validate_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_simple().to_string(),
        };
        let team_name = validate_name(&new.team_name)?;
        validate_people(new.leader.as_ref(), &new.members)?;

        let now = Utc::now();
        let team = Team {
            team_name_lower: team_name.to_lowercase(),
            team_name,
            id,
            college_name: new.college_name,
            leader: new.leader,
            members: new.members,
            track: new.track,
            project_title: new.project_title,
            qr_token: None,
            qr_generated_at: None,
            attendance: AttendanceState::default(),
            version: 0,
            created_at: now,
            last_modified: now,
        };

        let team = self.teams.insert(team).await?;
        info!(team_id = %team.id, uid = %caller.uid, "Team created");
        Ok(team)
    }

    pub async fn get(&self, id: &str) -> Result<Team> {
        self.teams
            .get(id)
            .await?
            .ok_or_else(|| AttendanceError::TeamNotFound(id.to_string()))
    }

    /// Merge `patch` into the profile. Roster changes are refused while the
    /// team is checked in, since recorded presence refers to the old roster.
    /// The store re-tests that in the write itself.
    pub async fn update_profile(&self, caller: &Identity, id: &str, mut patch: TeamProfilePatch) -> Result<Team> {
        caller.ensure_admin("only admins can edit teams")?;
        if patch.is_empty() {
            return Err(AttendanceError::Validation("no profile fields to update".to_string()));
        }
        if let Some(name) = &patch.team_name {
            patch.team_name = Some(validate_name(name)?);
        }

        if patch.touches_roster() {
            let current = self.get(id).await?;
            let leader = match &patch.leader {
                Some(leader) => leader.as_ref(),
                None => current.leader.as_ref(),
            };
            let members = patch.members.as_deref().unwrap_or(&current.members);
            validate_people(leader, members)?;
        }

        let team = match self.teams.update_profile(id, &patch, Utc::now()).await? {
            ProfileOutcome::Updated(team) => team,
            ProfileOutcome::NotFound => return Err(AttendanceError::TeamNotFound(id.to_string())),
            ProfileOutcome::CheckedIn => {
                return Err(AttendanceError::Validation(
                    "reset this team's attendance before changing its roster".to_string(),
                ));
            }
        };
        info!(team_id = %id, uid = %caller.uid, "Team profile updated");
        Ok(team)
    }

    pub async fn delete(&self, caller: &Identity, id: &str) -> Result<()> {
        caller.ensure_admin("only admins can delete teams")?;
        if !self.teams.delete(id).await? {
            return Err(AttendanceError::TeamNotFound(id.to_string()));
        }
        info!(team_id = %id, uid = %caller.uid, "Team deleted");
        Ok(())
    }

    /// Issue a fresh `"<id>_<millis>"` check-in token, returned with its issue time.
    pub async fn regenerate_qr(&self, caller: &Identity, id: &str) -> Result<(String, DateTime<Utc>)> {
        caller.ensure_admin("only admins can issue QR tokens")?;
        let now = Utc::now();
        let token = format!("{}_{}", id, now.timestamp_millis());
        if !self.teams.set_qr_token(id, &token, now).await? {
            return Err(AttendanceError::TeamNotFound(id.to_string()));
        }
        info!(team_id = %id, "QR token regenerated");
        Ok((token, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::store::memory::MemoryTeamStore;

    fn caller(role: Role) -> Identity {
        Identity {
            uid: "u1".to_string(),
            display_name: "Chief".to_string(),
            role,
            approved: true,
        }
    }

    fn person(name: &str, gender: &str) -> Person {
        Person {
            name: name.to_string(),
            dept: "ECE".to_string(),
            gender: gender.to_string(),
        }
    }

    fn new_team(members: usize) -> NewTeam {
        NewTeam {
            id: None,
            team_name: "  Byte Busters ".to_string(),
            college_name: "KNCET".to_string(),
            leader: Some(Leader {
                name: "Asha".to_string(),
                email: "asha@kncet.edu".to_string(),
                phone: String::new(),
                gender: "Female".to_string(),
            }),
            members: (0..members).map(|i| person(&format!("M{}", i), "Male")).collect(),
            track: "Open".to_string(),
            project_title: String::new(),
        }
    }

    #[actix_web::test]
    async fn create_assigns_id_and_search_key() {
        let service = TeamService::new(Arc::new(MemoryTeamStore::default()));
        let team = service.create(&caller(Role::Admin), new_team(3)).await.unwrap();

        assert_eq!(team.id.len(), 32);
        assert_eq!(team.team_name, "Byte Busters");
        assert_eq!(team.team_name_lower, "byte busters");
        assert_eq!(team.headcount(), 4);
        let view = team.view();
        assert_eq!(view.member_count, 3);
        assert_eq!(view.boys_count, 3);
        assert_eq!(view.girls_count, 1);
        assert_eq!(view.summary.attendance_status, None);
    }

    #[actix_web::test]
    async fn create_enforces_limits_and_roles() {
        let service = TeamService::new(Arc::new(MemoryTeamStore::default()));

        let err = service.create(&caller(Role::Admin), new_team(5)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::Validation(_)));

        let err = service.create(&caller(Role::Coordinator), new_team(1)).await.unwrap_err();
        assert!(matches!(err, AttendanceError::PermissionDenied(_)));

        let mut blank = new_team(1);
        blank.team_name = "   ".to_string();
        let err = service.create(&caller(Role::Admin), blank).await.unwrap_err();
        assert!(matches!(err, AttendanceError::Validation(_)));

        for reserved in ["all", "Stats", "stream"] {
            let mut shadowed = new_team(1);
            shadowed.id = Some(reserved.to_string());
            let err = service.create(&caller(Role::Admin), shadowed).await.unwrap_err();
            assert!(matches!(err, AttendanceError::Validation(_)));
        }

        let mut dup = new_team(1);
        dup.id = Some("T-1".to_string());
        service.create(&caller(Role::Admin), dup.clone()).await.unwrap();
        let err = service.create(&caller(Role::Admin), dup).await.unwrap_err();
        assert!(matches!(err, AttendanceError::Validation(_)));
    }

    #[actix_web::test]
    async fn roster_edits_wait_for_reset() {
        let store = Arc::new(MemoryTeamStore::default());
        let service = TeamService::new(store.clone());
        let admin = caller(Role::Admin);
        let mut new = new_team(2);
        new.id = Some("T-1".to_string());
        service.create(&admin, new).await.unwrap();

        let rename = TeamProfilePatch {
            team_name: Some("Null Pointers".to_string()),
            ..Default::default()
        };
        let renamed = service.update_profile(&admin, "T-1", rename).await.unwrap();
        assert_eq!(renamed.team_name_lower, "null pointers");

        store.reset("T-1", Utc::now()).await.unwrap();
        let mut team = store.get("T-1").await.unwrap().unwrap();
        team.attendance.checked_in = true;
        store.delete("T-1").await.unwrap();
        store.insert(team).await.unwrap();

        let add = TeamProfilePatch {
            members: Some(vec![person("New", "Female")]),
            ..Default::default()
        };
        let err = service.update_profile(&admin, "T-1", add).await.unwrap_err();
        assert!(matches!(err, AttendanceError::Validation(_)));
    }

    #[actix_web::test]
    async fn qr_token_embeds_the_team_id() {
        let service = TeamService::new(Arc::new(MemoryTeamStore::default()));
        let admin = caller(Role::Admin);
        let mut new = new_team(0);
        new.id = Some("T-9".to_string());
        service.create(&admin, new).await.unwrap();

        let (token, issued_at) = service.regenerate_qr(&admin, "T-9").await.unwrap();
        assert!(token.starts_with("T-9_"));
        let team = service.get("T-9").await.unwrap();
        assert_eq!(team.qr_token, Some(token));
        assert_eq!(team.qr_generated_at, Some(issued_at));

        let err = service.regenerate_qr(&admin, "missing").await.unwrap_err();
        assert!(matches!(err, AttendanceError::TeamNotFound(_)));
    }

    #[actix_web::test]
    async fn delete_reports_missing_teams() {
        let service = TeamService::new(Arc::new(MemoryTeamStore::default()));
        let err = service.delete(&caller(Role::Admin), "nope").await.unwrap_err();
        assert!(matches!(err, AttendanceError::TeamNotFound(_)));
    }
}
