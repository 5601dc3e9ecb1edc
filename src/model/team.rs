use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::attendance::{AttendanceRecord, Holder, MarkedBy};

/// Most members a team may register besides its leader.
pub const MAX_MEMBERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Leader {
    #[schema(example = "Asha Raman")]
    pub name: String,
    #[serde(default)]
    #[schema(example = "asha@college.edu")]
    pub email: String,
    #[serde(default)]
    #[schema(example = "+919876543210")]
    pub phone: String,
    #[serde(default)]
    #[schema(example = "Female")]
    pub gender: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[schema(example = "Vikram S")]
    pub name: String,
    #[serde(default)]
    #[schema(example = "CSE")]
    pub dept: String,
    #[serde(default)]
    #[schema(example = "Male")]
    pub gender: String,
}

/// One person on a team's roster.
///
/// On the wire this is `"leader"` or `"m<index>"`, the keys staff clients
/// have always sent; internally it is never handled as a bare string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PersonKey {
    Leader,
    Member(usize),
}

impl fmt::Display for PersonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonKey::Leader => f.write_str("leader"),
            PersonKey::Member(index) => write!(f, "m{}", index),
        }
    }
}

impl FromStr for PersonKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "leader" {
            return Ok(PersonKey::Leader);
        }
        s.strip_prefix('m')
            .filter(|digits| is_canonical_index(digits))
            .and_then(|digits| digits.parse::<usize>().ok())
            .map(PersonKey::Member)
            .ok_or_else(|| format!("unknown roster key '{}'", s))
    }
}

/// Decimal digits with no leading zero, so every index has one spelling.
fn is_canonical_index(digits: &str) -> bool {
    let all_digits = !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
    all_digits && (digits == "0" || !digits.starts_with('0'))
}

impl Serialize for PersonKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PersonKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RosterEntry {
    #[schema(value_type = String, example = "m0")]
    pub person: PersonKey,
    pub present: bool,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum AttendanceStatus {
    Present,
    Partial,
    Absent,
}

/// Status as a pure function of the two counts.
///
/// An empty team is always `ABSENT`.
pub fn derive_status(present_count: u32, total: u32) -> AttendanceStatus {
    if total == 0 || present_count == 0 {
        AttendanceStatus::Absent
    } else if present_count >= total {
        AttendanceStatus::Present
    } else {
        AttendanceStatus::Partial
    }
}

/// Attendance fields embedded in a team record.
///
/// Counts and status are not stored: they are always recomputed from
/// `roster`, which is the only attendance value written by a mark.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttendanceState {
    pub roster: Vec<RosterEntry>,
    pub checked_in: bool,
    pub marked_by: Option<MarkedBy>,
    pub marked_at: Option<DateTime<Utc>>,
    pub round: Option<String>,
    pub locked: bool,
    pub audit_log: Vec<AttendanceRecord>,
}

impl AttendanceState {
    pub fn present_count(&self) -> u32 {
        self.roster.iter().filter(|entry| entry.present).count() as u32
    }

    /// Current holder of the lock, if the team is locked.
    pub fn holder(&self) -> Option<Holder> {
        if !self.locked {
            return None;
        }
        match (&self.marked_by, self.marked_at, &self.round) {
            (Some(marked_by), Some(marked_at), Some(round)) => Some(Holder {
                uid: marked_by.uid.clone(),
                name: marked_by.name.clone(),
                marked_at,
                round: round.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Team {
    pub id: String,
    pub team_name: String,
    pub team_name_lower: String,
    pub college_name: String,
    pub leader: Option<Leader>,
    pub members: Vec<Person>,
    pub track: String,
    pub project_title: String,
    pub qr_token: Option<String>,
    pub qr_generated_at: Option<DateTime<Utc>>,
    pub attendance: AttendanceState,
    /// Bumped on every write that touches the record; the compare-and-swap token.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Team {
    /// Everyone who can be marked, in roster order: leader first.
    pub fn people(&self) -> Vec<PersonKey> {
        let leader = self.leader.as_ref().map(|_| PersonKey::Leader);
        leader
            .into_iter()
            .chain((0..self.members.len()).map(PersonKey::Member))
            .collect()
    }

    /// Number of people counted for attendance (leader included).
    pub fn headcount(&self) -> u32 {
        self.people().len() as u32
    }

    pub fn present_count(&self) -> u32 {
        if self.headcount() == 0 {
            return 0;
        }
        self.attendance.present_count().min(self.headcount())
    }

    pub fn absent_count(&self) -> u32 {
        if !self.attendance.checked_in {
            return 0;
        }
        self.headcount() - self.present_count()
    }

    /// `None` until the team has been marked at least once since creation or reset.
    pub fn status(&self) -> Option<AttendanceStatus> {
        self.attendance
            .checked_in
            .then(|| derive_status(self.present_count(), self.headcount()))
    }

    pub fn gender_count(&self, gender: &str) -> u32 {
        let leader = self
            .leader
            .iter()
            .filter(|l| l.gender.eq_ignore_ascii_case(gender))
            .count();
        let members = self
            .members
            .iter()
            .filter(|m| m.gender.eq_ignore_ascii_case(gender))
            .count();
        (leader + members) as u32
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey {
            name: self.team_name_lower.clone(),
            id: self.id.clone(),
        }
    }

    pub fn summary(&self) -> TeamSummary {
        TeamSummary {
            id: self.id.clone(),
            team_name: self.team_name.clone(),
            college_name: self.college_name.clone(),
            track: self.track.clone(),
            total_members: self.headcount(),
            present_count: self.present_count(),
            absent_count: self.absent_count(),
            attendance_status: self.status(),
            checked_in: self.attendance.checked_in,
            locked: self.attendance.locked,
            marked_by: self.attendance.marked_by.clone(),
            marked_at: self.attendance.marked_at,
            round: self.attendance.round.clone(),
        }
    }

    pub fn public_view(&self) -> PublicTeamView {
        PublicTeamView {
            id: self.id.clone(),
            team_name: self.team_name.clone(),
            college_name: self.college_name.clone(),
            track: self.track.clone(),
            project_title: self.project_title.clone(),
            leader_name: self.leader.as_ref().map(|l| l.name.clone()),
            members: self.members.clone(),
            total_members: self.headcount(),
            present_count: self.present_count(),
            attendance_status: self.status(),
        }
    }

    pub fn view(&self) -> TeamView {
        TeamView {
            summary: self.summary(),
            team_name_lower: self.team_name_lower.clone(),
            leader: self.leader.clone(),
            members: self.members.clone(),
            member_count: self.members.len() as u32,
            boys_count: self.gender_count("Male"),
            girls_count: self.gender_count("Female"),
            project_title: self.project_title.clone(),
            qr_token: self.qr_token.clone(),
            qr_generated_at: self.qr_generated_at,
            roster: self.attendance.roster.clone(),
            audit_log: self.attendance.audit_log.clone(),
            created_at: self.created_at,
            last_modified: self.last_modified,
        }
    }
}

/// What anyone holding a team's QR link may see.
///
/// Leader contact details, the roster and the audit log stay staff-only.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicTeamView {
    pub id: String,
    pub team_name: String,
    pub college_name: String,
    pub track: String,
    pub project_title: String,
    pub leader_name: Option<String>,
    pub members: Vec<Person>,
    pub total_members: u32,
    pub present_count: u32,
    pub attendance_status: Option<AttendanceStatus>,
}

/// Position of a team in the directory ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct SortKey {
    #[schema(example = "byte busters")]
    pub name: String,
    #[schema(example = "T-014")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TeamSummary {
    pub id: String,
    pub team_name: String,
    pub college_name: String,
    pub track: String,
    pub total_members: u32,
    pub present_count: u32,
    pub absent_count: u32,
    pub attendance_status: Option<AttendanceStatus>,
    pub checked_in: bool,
    pub locked: bool,
    pub marked_by: Option<MarkedBy>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub marked_at: Option<DateTime<Utc>>,
    pub round: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TeamView {
    #[serde(flatten)]
    pub summary: TeamSummary,
    pub team_name_lower: String,
    pub leader: Option<Leader>,
    pub members: Vec<Person>,
    pub member_count: u32,
    pub boys_count: u32,
    pub girls_count: u32,
    pub project_title: String,
    pub qr_token: Option<String>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub qr_generated_at: Option<DateTime<Utc>>,
    pub roster: Vec<RosterEntry>,
    pub audit_log: Vec<AttendanceRecord>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub last_modified: DateTime<Utc>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn derive_status_covers_every_band() {
        assert_eq!(derive_status(0, 4), AttendanceStatus::Absent);
        assert_eq!(derive_status(4, 4), AttendanceStatus::Present);
        assert_eq!(derive_status(1, 4), AttendanceStatus::Partial);
        assert_eq!(derive_status(3, 4), AttendanceStatus::Partial);
        for present in 0..5 {
            assert_eq!(derive_status(present, 0), AttendanceStatus::Absent);
        }
    }

    #[test]
    fn person_key_round_trips_wire_form() {
        assert_eq!("leader".parse::<PersonKey>(), Ok(PersonKey::Leader));
        assert_eq!("m3".parse::<PersonKey>(), Ok(PersonKey::Member(3)));
        assert_eq!(PersonKey::Member(12).to_string(), "m12");
        assert!("m".parse::<PersonKey>().is_err());
        assert!("m-1".parse::<PersonKey>().is_err());
        assert!("member0".parse::<PersonKey>().is_err());
        assert_eq!("m0".parse::<PersonKey>(), Ok(PersonKey::Member(0)));
        assert_eq!("m10".parse::<PersonKey>(), Ok(PersonKey::Member(10)));
        assert!("m01".parse::<PersonKey>().is_err());
        assert!("m00".parse::<PersonKey>().is_err());
    }

    #[test]
    fn people_lists_leader_before_members() {
        let team = team_with_leader("t1", "Alpha", 2);
        assert_eq!(
            team.people(),
            vec![PersonKey::Leader, PersonKey::Member(0), PersonKey::Member(1)]
        );
        assert_eq!(team.headcount(), 3);
        assert_eq!(team.gender_count("female"), 2);
    }

    #[test]
    fn public_view_hides_contact_details() {
        let mut team = team_with_leader("t1", "Alpha", 2);
        team.qr_token = Some("t1_1700000000000".to_string());
        let public = serde_json::to_value(team.public_view()).unwrap();

        assert_eq!(public["leaderName"], "Lead");
        assert_eq!(public["totalMembers"], 3);
        assert!(public["attendanceStatus"].is_null());
        let text = public.to_string();
        assert!(!text.contains("lead@college.edu"));
        assert!(!text.contains("t1_1700000000000"));
        assert!(public.get("auditLog").is_none());
    }

    #[test]
    fn unmarked_team_has_no_status() {
        let team = team("t1", "Alpha", 3);
        let summary = team.summary();
        assert_eq!(summary.attendance_status, None);
        assert_eq!(summary.present_count, 0);
        assert_eq!(summary.absent_count, 0);
        assert!(!summary.checked_in);
    }
}
