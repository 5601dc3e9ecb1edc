use crate::api::attendance::{MarkAttendanceReq, MarkCountReq};
use crate::api::notifications::PostNotificationReq;
use crate::api::teams::{QrTokenResponse, UpdateTeam};
use crate::api::users::{ApprovalReq, RoleReq};
use crate::model::attendance::{AttendanceRecord, Holder, MarkedBy};
use crate::model::notification::{Notification, NotificationKind};
use crate::model::role::Role;
use crate::model::settings::{Settings, SettingsPatch};
use crate::model::team::{
    AttendanceStatus, Leader, Person, PublicTeamView, RosterEntry, SortKey, TeamSummary, TeamView,
};
use crate::model::user::{Identity, User};
use crate::models::{MessageResponse, ResetTargetReq};
use crate::services::attendance_engine::{MarkOutcome, ResetFailure, ResetOutcome, UnlockOutcome};
use crate::services::directory::{DirectoryPage, DirectoryStats, StatusFilter};
use crate::services::teams::NewTeam;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Team Attendance API",
        version = "1.0.0",
        description = r#"
## Live Team Attendance

Tracks attendance for competition teams during a one-day event.

### Key Features
- **Attendance marking**
  - Per-person roster marks that lock the team for the current session
  - Admin override and unlock, with an append-only audit log
- **Live directory**
  - Name-ordered, cursor-paginated team list with status filters
  - Server-sent event streams for teams and settings
- **Event settings**
  - Attendance window and active session
- **Announcements**
  - Admin notifications pushed live to every staff screen

### Security
Every endpoint except the public team page expects a **JWT Bearer token** from
the identity provider.
New accounts start as unapproved coordinators until an admin approves them.
"#,
    ),
    paths(
        crate::api::attendance::mark_attendance,
        crate::api::attendance::mark_count,
        crate::api::attendance::unlock,
        crate::api::attendance::reset,

        crate::api::teams::list_teams,
        crate::api::teams::all_teams,
        crate::api::teams::stats,
        crate::api::teams::stream_teams,
        crate::api::teams::create_team,
        crate::api::teams::get_team,
        crate::api::teams::update_team,
        crate::api::teams::delete_team,
        crate::api::teams::regenerate_qr,
        crate::api::teams::public_team,

        crate::api::settings::get_settings,
        crate::api::settings::update_settings,
        crate::api::settings::stream_settings,

        crate::api::notifications::list_notifications,
        crate::api::notifications::post_notification,
        crate::api::notifications::stream_notifications,

        crate::api::users::me,
        crate::api::users::list_users,
        crate::api::users::set_approval,
        crate::api::users::set_role
    ),
    components(
        schemas(
            MarkAttendanceReq,
            MarkCountReq,
            MarkOutcome,
            UnlockOutcome,
            ResetTargetReq,
            ResetOutcome,
            ResetFailure,
            AttendanceStatus,
            AttendanceRecord,
            MarkedBy,
            Holder,
            RosterEntry,
            Leader,
            Person,
            NewTeam,
            UpdateTeam,
            TeamSummary,
            TeamView,
            PublicTeamView,
            QrTokenResponse,
            SortKey,
            StatusFilter,
            DirectoryPage,
            DirectoryStats,
            Settings,
            SettingsPatch,
            Notification,
            NotificationKind,
            PostNotificationReq,
            Identity,
            User,
            Role,
            ApprovalReq,
            RoleReq,
            MessageResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Attendance", description = "Mark, unlock and reset attendance"),
        (name = "Teams", description = "Team directory and profiles"),
        (name = "Settings", description = "Attendance window and sessions"),
        (name = "Notifications", description = "Announcements to staff"),
        (name = "Users", description = "Staff accounts and approval"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
