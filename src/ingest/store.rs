//! Persistence port for ingested records.

use super::records::{Ruleset, Score, User, UserStatistics};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[async_trait]
pub trait Store: Send + Sync {
    /// Create a placeholder row for `id`. Returns `false` if the user already existed.
    async fn create_user(&self, id: u64) -> Result<bool>;

    /// Overwrite profile fields and clear any restriction.
    async fn update_user(&self, user: &User) -> Result<()>;

    async fn restrict_user(&self, id: u64) -> Result<()>;

    /// Returns `false` if a score with the same id was already stored.
    async fn insert_score(&self, score: &Score) -> Result<bool>;

    async fn record_stats(&self, user_id: u64, ruleset: Ruleset, stats: &UserStatistics)
        -> Result<()>;

    /// Ids of all unrestricted users.
    async fn known_users(&self) -> Result<Vec<u64>>;

    /// `(user, ruleset)` pairs with scores newer than the user's last refresh, oldest first.
    async fn pending_updates(&self) -> Result<Vec<(u64, Ruleset)>>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredUser {
    pub username: String,
    pub safe_name: String,
    pub country: String,
    pub restricted: bool,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Tables {
    users: BTreeMap<u64, StoredUser>,
    scores: HashMap<u64, Score>,
    stats: HashMap<(u64, Ruleset), UserStatistics>,
}

/// In-process [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn user(&self, id: u64) -> Option<StoredUser> {
        self.tables().users.get(&id).cloned()
    }

    pub fn score(&self, id: u64) -> Option<Score> {
        self.tables().scores.get(&id).cloned()
    }

    pub fn score_count(&self) -> usize {
        self.tables().scores.len()
    }

    pub fn stats(&self, user_id: u64, ruleset: Ruleset) -> Option<UserStatistics> {
        self.tables().stats.get(&(user_id, ruleset)).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, id: u64) -> Result<bool> {
        let mut tables = self.tables();
        if tables.users.contains_key(&id) {
            return Ok(false);
        }
        tables.users.insert(id, StoredUser::default());
        Ok(true)
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut tables = self.tables();
        let row = tables.users.entry(user.id).or_default();
        row.username = user.username.clone();
        row.safe_name = user.safe_name();
        row.country = user.country_code.clone();
        row.restricted = false;
        row.last_update = Some(Utc::now());
        Ok(())
    }

    async fn restrict_user(&self, id: u64) -> Result<()> {
        self.tables().users.entry(id).or_default().restricted = true;
        Ok(())
    }

    async fn insert_score(&self, score: &Score) -> Result<bool> {
        let mut tables = self.tables();
        if tables.scores.contains_key(&score.id) {
            return Ok(false);
        }
        tables.scores.insert(score.id, score.clone());
        Ok(true)
    }

    async fn record_stats(
        &self,
        user_id: u64,
        ruleset: Ruleset,
        stats: &UserStatistics,
    ) -> Result<()> {
        self.tables().stats.insert((user_id, ruleset), stats.clone());
        Ok(())
    }

    async fn known_users(&self) -> Result<Vec<u64>> {
        Ok(self
            .tables()
            .users
            .iter()
            .filter(|(_, u)| !u.restricted)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn pending_updates(&self) -> Result<Vec<(u64, Ruleset)>> {
        let tables = self.tables();
        let mut oldest: HashMap<(u64, Ruleset), DateTime<Utc>> = HashMap::new();
        for score in tables.scores.values() {
            let Some(user) = tables.users.get(&score.user_id) else {
                continue;
            };
            if user.restricted || user.last_update.is_some_and(|t| score.ended_at <= t) {
                continue;
            }
            let Some(ruleset) = score.ruleset() else {
                continue;
            };
            let at = oldest.entry((score.user_id, ruleset)).or_insert(score.ended_at);
            if score.ended_at < *at {
                *at = score.ended_at;
            }
        }
        let mut pending: Vec<_> = oldest.into_iter().collect();
        pending.sort_by_key(|((id, ruleset), at)| (*at, *id, *ruleset));
        Ok(pending.into_iter().map(|(key, _)| key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn score(id: u64, user_id: u64, ruleset_id: u8, minute: u32) -> Score {
        Score {
            id,
            user_id,
            beatmap_id: 1,
            ruleset_id,
            total_score: 0,
            accuracy: 1.0,
            max_combo: 0,
            pp: None,
            rank: "A".into(),
            passed: true,
            is_perfect_combo: false,
            mods: vec![],
            statistics: Default::default(),
            ended_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_and_restrict() {
        let store = MemoryStore::new();
        assert!(store.create_user(1).await.unwrap());
        assert!(!store.create_user(1).await.unwrap());
        store.create_user(2).await.unwrap();
        store.restrict_user(2).await.unwrap();
        assert_eq!(store.known_users().await.unwrap(), vec![1]);

        let user = User {
            id: 2,
            username: "Back Again".into(),
            ..Default::default()
        };
        store.update_user(&user).await.unwrap();
        assert!(!store.user(2).unwrap().restricted);
        assert_eq!(store.user(2).unwrap().safe_name, "back_again");
    }

    #[tokio::test]
    async fn test_insert_score_is_idempotent() {
        let store = MemoryStore::new();
        assert!(store.insert_score(&score(1, 1, 0, 0)).await.unwrap());
        assert!(!store.insert_score(&score(1, 1, 0, 0)).await.unwrap());
        assert_eq!(store.score_count(), 1);
    }

    #[tokio::test]
    async fn test_pending_updates_oldest_first() {
        let store = MemoryStore::new();
        for id in [1, 2, 3] {
            store.create_user(id).await.unwrap();
        }
        store.insert_score(&score(10, 1, 0, 30)).await.unwrap();
        store.insert_score(&score(11, 1, 0, 5)).await.unwrap();
        store.insert_score(&score(12, 2, 3, 10)).await.unwrap();
        store.insert_score(&score(13, 3, 1, 1)).await.unwrap();
        store.restrict_user(3).await.unwrap();

        assert_eq!(
            store.pending_updates().await.unwrap(),
            vec![(1, Ruleset::Osu), (2, Ruleset::Mania)]
        );
    }
}
