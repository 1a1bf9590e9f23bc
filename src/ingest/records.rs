//! Wire shapes of the upstream API. Only the fields ingest uses are modelled.

use crate::queue::OpMask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Ruleset {
    #[default]
    Osu,
    Taiko,
    Fruits,
    Mania,
}

impl Ruleset {
    pub const ALL: [Ruleset; 4] = [Ruleset::Osu, Ruleset::Taiko, Ruleset::Fruits, Ruleset::Mania];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.name() == name)
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Ruleset::Osu => "osu",
            Ruleset::Taiko => "taiko",
            Ruleset::Fruits => "fruits",
            Ruleset::Mania => "mania",
        }
    }

    /// Work-queue bit for this ruleset.
    pub fn bit(self) -> OpMask {
        OpMask::bit(self.id())
    }

    pub fn in_mask(mask: OpMask) -> impl Iterator<Item = Ruleset> {
        mask.iter().filter_map(Ruleset::from_id)
    }
}

impl fmt::Display for Ruleset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreStatistics {
    pub miss: u32,
    pub meh: u32,
    pub ok: u32,
    pub good: u32,
    pub great: u32,
    pub perfect: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mod {
    pub acronym: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub id: u64,
    pub user_id: u64,
    pub beatmap_id: u64,
    pub ruleset_id: u8,
    #[serde(default)]
    pub total_score: u64,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub max_combo: u32,
    #[serde(default)]
    pub pp: Option<f64>,
    #[serde(default)]
    pub rank: String,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub is_perfect_combo: bool,
    #[serde(default)]
    pub mods: Vec<Mod>,
    #[serde(default)]
    pub statistics: ScoreStatistics,
    pub ended_at: DateTime<Utc>,
}

impl Score {
    pub fn ruleset(&self) -> Option<Ruleset> {
        Ruleset::from_id(self.ruleset_id)
    }

    /// Mod acronyms joined with commas, e.g. `HD,DT`.
    pub fn mod_string(&self) -> String {
        self.mods
            .iter()
            .map(|m| m.acronym.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// One page of the global score feed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoresPage {
    #[serde(default)]
    pub scores: Vec<Score>,
    #[serde(default)]
    pub cursor_string: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserLevel {
    pub current: u32,
    pub progress: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserStatistics {
    pub global_rank: Option<u32>,
    pub country_rank: Option<u32>,
    pub pp: f64,
    pub hit_accuracy: f64,
    pub play_count: u64,
    pub play_time: u64,
    pub ranked_score: u64,
    pub total_score: u64,
    pub total_hits: u64,
    pub maximum_combo: u32,
    pub replays_watched_by_others: u64,
    pub is_ranked: bool,
    pub level: UserLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub follower_count: u64,
    #[serde(default)]
    pub badges: Vec<serde_json::Value>,
    #[serde(default)]
    pub user_achievements: Vec<serde_json::Value>,
    /// Statistics for the ruleset the user was requested with.
    #[serde(default)]
    pub statistics: Option<UserStatistics>,
    /// Present on the bulk endpoint, keyed by ruleset name.
    #[serde(default)]
    pub statistics_rulesets: Option<HashMap<String, UserStatistics>>,
}

impl User {
    /// Lowercased username with spaces replaced by underscores.
    pub fn safe_name(&self) -> String {
        self.username.to_lowercase().replace(' ', "_")
    }

    /// Ranked per-ruleset statistics with non-zero pp, as returned by the bulk endpoint.
    pub fn ranked_statistics(&self) -> impl Iterator<Item = (Ruleset, &UserStatistics)> {
        self.statistics_rulesets
            .iter()
            .flatten()
            .filter(|(_, s)| s.is_ranked && s.pp > 0.0)
            .filter_map(|(name, s)| Ruleset::from_name(name).map(|r| (r, s)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsersPage {
    #[serde(default)]
    pub users: Vec<User>,
}
