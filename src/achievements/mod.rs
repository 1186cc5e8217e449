//! Achievement definitions and the evaluator that unlocks them.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    content::WorldMeta,
    progression::ExerciseOutcome,
    store::Progress,
};

const DEFAULT_DEFINITIONS: &str = include_str!("definitions.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementCategory {
    Progress,
    Streak,
    Skill,
    Secret,
}

/// What has to be true for an achievement to unlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    ExerciseCount { value: u32 },
    LevelCount { value: u32 },
    WorldComplete { value: u32 },
    StreakDays { value: u32 },
    TotalXp { value: u32 },
    /// The level just finished used no hints at all.
    NoHintsLevel {
        #[serde(default)]
        value: u32,
    },
    /// The level just finished earned three stars.
    FirstTryLevel {
        #[serde(default)]
        value: u32,
    },
    /// At least `value` levels completed with three stars.
    PerfectLevels { value: u32 },
    /// The level just finished took at most `value` seconds.
    SpeedLevel { value: u64 },
    /// Evaluated between 22:00 and 05:00 local time.
    NightOwl {
        #[serde(default)]
        value: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub category: AchievementCategory,
    pub condition: Condition,
    #[serde(default)]
    pub secret: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub category: AchievementCategory,
    pub unlocked_at: DateTime<Utc>,
}

impl AchievementDefinition {
    fn unlock_at(&self, now: DateTime<Utc>) -> Achievement {
        Achievement {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            icon: self.icon.clone(),
            category: self.category,
            unlocked_at: now,
        }
    }
}

/// The built-in definition set.
pub fn default_definitions() -> Result<Vec<AchievementDefinition>> {
    parse_definitions(DEFAULT_DEFINITIONS)
}

pub fn parse_definitions(text: &str) -> Result<Vec<AchievementDefinition>> {
    serde_json::from_str(text).context("parsing achievement definitions")
}

/// Aggregated counts derived from persisted progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed_exercises: u32,
    pub completed_levels: u32,
    pub three_star_levels: u32,
    pub completed_worlds: u32,
    pub current_streak: u32,
    pub total_xp: u32,
    pub levels: Vec<LevelSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSummary {
    pub level_id: String,
    pub completed: bool,
    pub stars: u8,
    pub hints_used: u32,
    pub best_time: Option<u64>,
}

impl ProgressSnapshot {
    pub fn from_progress(progress: &Progress, worlds: &[WorldMeta]) -> Self {
        let levels = &progress.level_progress;
        let completed = |id: &String| levels.get(id).is_some_and(|lp| lp.is_completed());
        Self {
            completed_exercises: levels
                .values()
                .flat_map(|lp| &lp.exercise_progress)
                .filter(|ep| ep.completed)
                .count() as u32,
            completed_levels: levels.values().filter(|lp| lp.is_completed()).count() as u32,
            three_star_levels: levels
                .values()
                .filter(|lp| lp.is_completed() && lp.stars == 3)
                .count() as u32,
            completed_worlds: worlds
                .iter()
                .filter(|w| !w.level_ids.is_empty() && w.level_ids.iter().all(|id| completed(id)))
                .count() as u32,
            current_streak: progress.streak.current,
            total_xp: progress.total_xp,
            levels: levels
                .values()
                .map(|lp| LevelSummary {
                    level_id: lp.level_id.clone(),
                    completed: lp.is_completed(),
                    stars: lp.stars,
                    hints_used: lp.exercise_progress.iter().map(|ep| ep.hints_used).sum(),
                    best_time: lp.best_time,
                })
                .collect(),
        }
    }
}

/// Transient facts about the run being evaluated.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// Local wall-clock time of the evaluation.
    pub now: DateTime<FixedOffset>,
    pub stars: Option<u8>,
    pub elapsed_seconds: Option<u64>,
    pub exercise_outcomes: Option<Vec<ExerciseOutcome>>,
}

impl EvaluationContext {
    pub fn at(now: DateTime<FixedOffset>) -> Self {
        Self { now, stars: None, elapsed_seconds: None, exercise_outcomes: None }
    }

    /// Context after finishing a level.
    pub fn after_level(
        now: DateTime<FixedOffset>,
        stars: u8,
        elapsed_seconds: u64,
        exercise_outcomes: Vec<ExerciseOutcome>,
    ) -> Self {
        Self {
            now,
            stars: Some(stars),
            elapsed_seconds: Some(elapsed_seconds),
            exercise_outcomes: Some(exercise_outcomes),
        }
    }
}

impl Condition {
    pub fn is_met(&self, snapshot: &ProgressSnapshot, ctx: &EvaluationContext) -> bool {
        match *self {
            Condition::ExerciseCount { value } => snapshot.completed_exercises >= value,
            Condition::LevelCount { value } => snapshot.completed_levels >= value,
            Condition::WorldComplete { value } => snapshot.completed_worlds >= value,
            Condition::StreakDays { value } => snapshot.current_streak >= value,
            Condition::TotalXp { value } => snapshot.total_xp >= value,
            Condition::NoHintsLevel { .. } => no_hints_level(ctx),
            Condition::FirstTryLevel { .. } => ctx.stars == Some(3),
            Condition::PerfectLevels { value } => snapshot.three_star_levels >= value,
            Condition::SpeedLevel { value } => ctx.elapsed_seconds.is_some_and(|s| s <= value),
            Condition::NightOwl { .. } => night_owl(ctx.now.hour()),
        }
    }
}

fn no_hints_level(ctx: &EvaluationContext) -> bool {
    ctx.exercise_outcomes
        .as_ref()
        .is_some_and(|outcomes| outcomes.iter().all(|o| o.hints_used == 0))
}

fn night_owl(hour: u32) -> bool {
    hour >= 22 || hour < 5
}

/// Definitions newly satisfied by `snapshot`, in definition order.
///
/// Ids in `unlocked` are skipped, and each id is emitted at most once even if
/// the definition list repeats it.
pub fn evaluate(
    snapshot: &ProgressSnapshot,
    unlocked: &HashSet<String>,
    definitions: &[AchievementDefinition],
    ctx: &EvaluationContext,
) -> Vec<Achievement> {
    let now = ctx.now.with_timezone(&Utc);
    let mut seen = HashSet::new();
    definitions
        .iter()
        .filter(|def| !unlocked.contains(&def.id) && seen.insert(def.id.as_str()))
        .filter(|def| def.condition.is_met(snapshot, ctx))
        .map(|def| def.unlock_at(now))
        .collect()
}

impl Progress {
    /// Evaluate every definition against this progress and unlock the new ones,
    /// granting their XP in the same step. Returns what was unlocked.
    pub fn check_achievements(
        &mut self,
        definitions: &[AchievementDefinition],
        worlds: &[WorldMeta],
        ctx: &EvaluationContext,
    ) -> Vec<Achievement> {
        let snapshot = ProgressSnapshot::from_progress(self, worlds);
        let unlocked: HashSet<String> = self.achievements.iter().map(|a| a.id.clone()).collect();
        let fresh = evaluate(&snapshot, &unlocked, definitions, ctx);
        for achievement in &fresh {
            self.unlock(achievement.clone());
        }
        fresh
    }
}
