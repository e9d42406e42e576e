use crate::live_scores::Snapshot;

/// Keywords that mark amateur, youth and reserve football.
pub const DEFAULT_EXCLUDED_KEYWORDS: &[&str] = &[
    "amateur",
    "youth",
    "reserve",
    "friendly",
    "u23",
    "u21",
    "u19",
    "u17",
    "liga de reservas",
    "division b",
    "m-league",
    "liga pro",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotAllowed,
    ExcludedCompetition,
    Keyword(String),
}

/// Competition allow/deny text classifier.
///
/// Entries match case-insensitively, either the competition name alone or
/// "region/competition". An empty allow-list allows everything not excluded.
#[derive(Debug, Clone, Default)]
pub struct CompetitionFilter {
    allowed: Vec<String>,
    excluded: Vec<String>,
    excluded_keywords: Vec<String>,
}

impl CompetitionFilter {
    pub fn new(allowed: &[String], excluded: &[String], excluded_keywords: &[String]) -> Self {
        CompetitionFilter {
            allowed: normalize(allowed),
            excluded: normalize(excluded),
            excluded_keywords: normalize(excluded_keywords),
        }
    }

    pub fn screen(&self, snap: &Snapshot) -> Option<Rejection> {
        let competition = snap.competition.trim().to_lowercase();
        let qualified = format!("{}/{}", snap.region.trim().to_lowercase(), competition);
        let matches = |entry: &String| *entry == competition || *entry == qualified;

        if self.excluded.iter().any(matches) {
            return Some(Rejection::ExcludedCompetition);
        }
        if !self.allowed.is_empty() && !self.allowed.iter().any(matches) {
            return Some(Rejection::NotAllowed);
        }

        let text = format!(
            "{} {} {} {}",
            snap.competition, snap.region, snap.home_team, snap.away_team
        )
        .to_lowercase()
        .replace('\n', " ");
        self.excluded_keywords
            .iter()
            .find(|k| text.contains(k.as_str()))
            .map(|k| Rejection::Keyword(k.clone()))
    }
}

fn normalize(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
