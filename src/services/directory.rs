//! Live, filterable, paginated listing over the team store.

use std::sync::Arc;

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::error::{AttendanceError, Result};
use crate::model::team::{AttendanceStatus, SortKey, Team, TeamSummary, TeamView};
use crate::store::{ScanQuery, TeamChange, TeamStore};

const RECENT_MARKS: usize = 5;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StatusFilter {
    #[default]
    All,
    Present,
    Partial,
    Absent,
    NotMarked,
}

impl StatusFilter {
    pub fn admits(&self, team: &Team) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::NotMarked => !team.attendance.checked_in,
            StatusFilter::Present => team.status() == Some(AttendanceStatus::Present),
            StatusFilter::Partial => team.status() == Some(AttendanceStatus::Partial),
            StatusFilter::Absent => team.status() == Some(AttendanceStatus::Absent),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryQuery {
    prefix: Option<String>,
    pub filter: StatusFilter,
}

impl DirectoryQuery {
    /// Blank prefixes are ignored; the rest are matched case-insensitively.
    pub fn new(search: Option<&str>, filter: StatusFilter) -> Self {
        let prefix = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        Self { prefix, filter }
    }

    fn is_filtered(&self) -> bool {
        self.filter != StatusFilter::All
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryPage {
    pub items: Vec<TeamSummary>,
    /// Sort key of the last item, present only when `has_more` is set.
    pub next_cursor: Option<SortKey>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryStats {
    pub total_teams: u32,
    pub present: u32,
    pub partial: u32,
    pub absent: u32,
    pub not_marked: u32,
    pub total_members: u32,
    pub total_present: u32,
    pub recent: Vec<TeamSummary>,
}

#[derive(Clone)]
pub struct DirectorySync {
    teams: Arc<dyn TeamStore>,
    page_size: usize,
}

impl DirectorySync {
    pub fn new(teams: Arc<dyn TeamStore>, page_size: usize) -> Self {
        Self {
            teams,
            page_size: page_size.max(1),
        }
    }

    /// First page of the listing, or the whole filtered set when a status
    /// filter is active.
    pub async fn query(&self, query: &DirectoryQuery) -> Result<DirectoryPage> {
        if query.is_filtered() {
            return self.filtered(query).await;
        }
        self.page_after(query, None).await
    }

    pub async fn load_more(&self, query: &DirectoryQuery, cursor: SortKey) -> Result<DirectoryPage> {
        if query.is_filtered() {
            return Err(AttendanceError::Validation(format!(
                "pagination is disabled while the '{}' filter is active",
                query.filter
            )));
        }
        self.page_after(query, Some(cursor)).await
    }

    /// Every team, unfiltered and unpaginated. Meant for exports and reports.
    pub async fn get_all(&self) -> Result<Vec<TeamView>> {
        let teams = self.teams.scan(&ScanQuery::default()).await?;
        Ok(teams.iter().map(Team::view).collect())
    }

    pub async fn stats(&self) -> Result<DirectoryStats> {
        let teams = self.teams.scan(&ScanQuery::default()).await?;
        let mut stats = DirectoryStats {
            total_teams: teams.len() as u32,
            ..Default::default()
        };

        for team in &teams {
            stats.total_members += team.headcount();
            stats.total_present += team.present_count();
            match team.status() {
                None => stats.not_marked += 1,
                Some(AttendanceStatus::Present) => stats.present += 1,
                Some(AttendanceStatus::Partial) => stats.partial += 1,
                Some(AttendanceStatus::Absent) => stats.absent += 1,
            }
        }

        let mut marked: Vec<&Team> = teams.iter().filter(|t| t.attendance.marked_at.is_some()).collect();
        marked.sort_by(|a, b| b.attendance.marked_at.cmp(&a.attendance.marked_at));
        stats.recent = marked.into_iter().take(RECENT_MARKS).map(Team::summary).collect();

        Ok(stats)
    }

    /// Live view of `query`. The first item is the current snapshot; each
    /// later item is a fresh snapshot taken after one or more store changes.
    pub fn subscribe(&self, query: DirectoryQuery) -> DirectorySubscription {
        DirectorySubscription {
            changes: self.teams.subscribe(),
            sync: self.clone(),
            query,
            primed: false,
        }
    }

    async fn filtered(&self, query: &DirectoryQuery) -> Result<DirectoryPage> {
        // status is derived, so there is no index to page over
        let scan = ScanQuery {
            prefix: query.prefix.clone(),
            ..Default::default()
        };
        let items = self
            .teams
            .scan(&scan)
            .await?
            .iter()
            .filter(|team| query.filter.admits(team))
            .map(Team::summary)
            .collect();
        Ok(DirectoryPage {
            items,
            next_cursor: None,
            has_more: false,
        })
    }

    async fn page_after(&self, query: &DirectoryQuery, after: Option<SortKey>) -> Result<DirectoryPage> {
        let scan = ScanQuery {
            prefix: query.prefix.clone(),
            after,
            limit: Some(self.page_size + 1),
        };
        let mut teams = self.teams.scan(&scan).await?;
        let has_more = teams.len() > self.page_size;
        teams.truncate(self.page_size);

        Ok(DirectoryPage {
            next_cursor: if has_more { teams.last().map(Team::sort_key) } else { None },
            items: teams.iter().map(Team::summary).collect(),
            has_more,
        })
    }
}

pub struct DirectorySubscription {
    changes: broadcast::Receiver<TeamChange>,
    sync: DirectorySync,
    query: DirectoryQuery,
    primed: bool,
}

impl DirectorySubscription {
    /// `None` once the store has shut down.
    pub async fn next(&mut self) -> Option<Result<DirectoryPage>> {
        if !self.primed {
            self.primed = true;
            return Some(self.sync.query(&self.query).await);
        }

        match self.changes.recv().await {
            Ok(change) => {
                debug!(?change, "Directory change observed");
                self.drain();
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Directory subscriber lagged, taking a fresh snapshot");
                self.drain();
            }
            Err(RecvError::Closed) => return None,
        }
        Some(self.sync.query(&self.query).await)
    }

    /// Collapse a burst of changes into one snapshot.
    fn drain(&mut self) {
        loop {
            match self.changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<DirectoryPage>> {
        stream::unfold(self, |mut sub| async move {
            let next = sub.next().await?;
            Some((next, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::model::role::Role;
    use crate::model::team::fixtures::team;
    use crate::model::user::Identity;
    use crate::services::attendance_engine::{AttendanceEngine, ResetTarget, RetryPolicy};
    use crate::services::settings_registry::SettingsRegistry;
    use crate::store::memory::{MemorySettingsStore, MemoryTeamStore};

    fn admin() -> Identity {
        Identity {
            uid: "admin".to_string(),
            display_name: "Admin".to_string(),
            role: Role::Admin,
            approved: true,
        }
    }

    fn everyone(team: &Team, present: bool) -> HashMap<String, bool> {
        team.people().into_iter().map(|k| (k.to_string(), present)).collect()
    }

    async fn fixture(count: usize) -> (Arc<MemoryTeamStore>, AttendanceEngine, DirectorySync) {
        let store = Arc::new(MemoryTeamStore::default());
        for i in 0..count {
            store
                .insert(team(&format!("T-{:03}", i), &format!("Team {:03}", i), 2))
                .await
                .unwrap();
        }
        let settings = Arc::new(
            SettingsRegistry::init(Arc::new(MemorySettingsStore::default()))
                .await
                .unwrap(),
        );
        let engine = AttendanceEngine::new(store.clone(), settings, RetryPolicy::default());
        let directory = DirectorySync::new(store.clone(), 20);
        (store, engine, directory)
    }

    #[test]
    fn filter_parses_wire_names() {
        assert_eq!("not-marked".parse::<StatusFilter>(), Ok(StatusFilter::NotMarked));
        assert_eq!("all".parse::<StatusFilter>(), Ok(StatusFilter::All));
        assert_eq!(StatusFilter::Partial.to_string(), "partial");
        assert!("marked".parse::<StatusFilter>().is_err());
    }

    #[actix_web::test]
    async fn not_marked_filter_returns_whole_set_unpaginated() {
        let (store, engine, directory) = fixture(100).await;
        for i in (0..100).step_by(3) {
            let id = format!("T-{:03}", i);
            let t = store.get(&id).await.unwrap().unwrap();
            engine.mark_attendance(&id, &admin(), &everyone(&t, true)).await.unwrap();
        }

        let page = directory
            .query(&DirectoryQuery::new(None, StatusFilter::NotMarked))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 66);
        assert!(page.items.iter().all(|s| !s.checked_in));
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);

        let present = directory
            .query(&DirectoryQuery::new(None, StatusFilter::Present))
            .await
            .unwrap();
        assert_eq!(present.items.len(), 34);
    }

    #[actix_web::test]
    async fn cursor_pagination_walks_the_name_order() {
        let (store, _engine, directory) = fixture(45).await;
        let query = DirectoryQuery::new(None, StatusFilter::All);

        let first = directory.query(&query).await.unwrap();
        assert_eq!(first.items.len(), 20);
        assert!(first.has_more);
        assert_eq!(first.items[0].team_name, "Team 000");

        // a tail insert lands in a later page, not a duplicate
        store.insert(team("T-999", "Zulu", 2)).await.unwrap();

        let second = directory
            .load_more(&query, first.next_cursor.clone().unwrap())
            .await
            .unwrap();
        assert_eq!(second.items[0].team_name, "Team 020");
        let third = directory
            .load_more(&query, second.next_cursor.clone().unwrap())
            .await
            .unwrap();
        assert_eq!(third.items.len(), 6);
        assert!(!third.has_more);
        assert_eq!(third.items.last().unwrap().team_name, "Zulu");
    }

    #[actix_web::test]
    async fn prefix_search_is_case_insensitive() {
        let (store, _engine, directory) = fixture(3).await;
        store.insert(team("x1", "Byte Busters", 3)).await.unwrap();
        store.insert(team("x2", "byteforce", 1)).await.unwrap();

        let page = directory
            .query(&DirectoryQuery::new(Some("  BYTE "), StatusFilter::All))
            .await
            .unwrap();
        let names: Vec<_> = page.items.iter().map(|s| s.team_name.as_str()).collect();
        assert_eq!(names, vec!["Byte Busters", "byteforce"]);
    }

    #[actix_web::test]
    async fn load_more_refuses_filtered_queries() {
        let (_store, _engine, directory) = fixture(1).await;
        let cursor = SortKey {
            name: "team 000".to_string(),
            id: "T-000".to_string(),
        };
        let err = directory
            .load_more(&DirectoryQuery::new(None, StatusFilter::Absent), cursor)
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::Validation(_)));
    }

    #[actix_web::test]
    async fn subscribers_observe_mark_and_reset() {
        let (store, engine, directory) = fixture(2).await;
        let mut sub = directory.subscribe(DirectoryQuery::default());

        let initial = sub.next().await.unwrap().unwrap();
        assert!(initial.items.iter().all(|s| !s.checked_in));

        let t = store.get("T-000").await.unwrap().unwrap();
        engine.mark_attendance("T-000", &admin(), &everyone(&t, true)).await.unwrap();
        let marked = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(marked.items[0].checked_in);
        assert!(marked.items[0].locked);

        engine.reset(&ResetTarget::All, &admin()).await.unwrap();
        let cleared = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(cleared.items.iter().all(|s| !s.checked_in && !s.locked));
        assert!(cleared.items.iter().all(|s| s.attendance_status.is_none()));
    }

    #[actix_web::test]
    async fn stats_count_every_band_and_recent_marks() {
        let (store, engine, directory) = fixture(8).await;
        for i in 0..7 {
            let id = format!("T-{:03}", i);
            let t = store.get(&id).await.unwrap().unwrap();
            engine.mark_attendance(&id, &admin(), &everyone(&t, i % 2 == 0)).await.unwrap();
        }

        let stats = directory.stats().await.unwrap();
        assert_eq!(stats.total_teams, 8);
        assert_eq!(stats.present, 4);
        assert_eq!(stats.absent, 3);
        assert_eq!(stats.partial, 0);
        assert_eq!(stats.not_marked, 1);
        assert_eq!(stats.total_members, 16);
        assert_eq!(stats.total_present, 8);
        assert_eq!(stats.recent.len(), 5);
    }
}
