//! Learner progress and its persistence.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::PathBuf,
    sync::Mutex,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    achievements::Achievement,
    config::Config,
    progression::{ExerciseOutcome, StreakData, XpRewards},
};

/// Key under which the learner's progress is stored.
pub const PROGRESS_KEY: &str = "pyquest-progress";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
    Locked,
    #[default]
    Available,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseProgress {
    pub exercise_id: String,
    pub completed: bool,
    pub attempts: u32,
    pub hints_used: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_submission: Option<String>,
}

impl ExerciseProgress {
    pub fn outcome(&self) -> ExerciseOutcome {
        ExerciseOutcome::new(self.hints_used, self.attempts)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub level_id: String,
    pub status: LevelStatus,
    pub stars: u8,
    pub xp_earned: u32,
    pub attempts: u32,
    /// Fastest completion, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub exercise_progress: Vec<ExerciseProgress>,
}

impl LevelProgress {
    pub fn is_completed(&self) -> bool {
        self.status == LevelStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(rename = "totalXP")]
    pub total_xp: u32,
    pub current_world: u32,
    pub current_level: u32,
    pub streak: StreakData,
    pub level_progress: BTreeMap<String, LevelProgress>,
    pub achievements: Vec<Achievement>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            total_xp: 0,
            current_world: 1,
            current_level: 1,
            streak: StreakData::default(),
            level_progress: BTreeMap::new(),
            achievements: Vec::new(),
        }
    }
}

impl Progress {
    pub fn add_xp(&mut self, amount: u32) {
        self.total_xp = self.total_xp.saturating_add(amount);
    }

    /// Create tracking for a level the first time it is opened.
    pub fn init_level(&mut self, level_id: &str, exercise_ids: &[&str]) {
        self.level_progress.entry(level_id.to_string()).or_insert_with(|| LevelProgress {
            level_id: level_id.to_string(),
            exercise_progress: exercise_ids
                .iter()
                .map(|id| ExerciseProgress { exercise_id: id.to_string(), ..Default::default() })
                .collect(),
            ..Default::default()
        });
    }

    /// Mark an exercise done without granting XP. Exercises the level was not
    /// initialised with are appended. Returns false for an unknown level.
    pub fn record_exercise(
        &mut self,
        level_id: &str,
        exercise_id: &str,
        outcome: ExerciseOutcome,
        last_submission: Option<String>,
    ) -> bool {
        let Some(level) = self.level_progress.get_mut(level_id) else {
            return false;
        };
        let ep = match level.exercise_progress.iter().position(|ep| ep.exercise_id == exercise_id) {
            Some(i) => &mut level.exercise_progress[i],
            None => {
                level.exercise_progress.push(ExerciseProgress {
                    exercise_id: exercise_id.to_string(),
                    ..Default::default()
                });
                let last = level.exercise_progress.len() - 1;
                &mut level.exercise_progress[last]
            }
        };
        ep.completed = true;
        ep.attempts = outcome.attempts;
        ep.hints_used = outcome.hints_used;
        ep.last_submission = last_submission;
        if level.status != LevelStatus::Completed {
            level.status = LevelStatus::InProgress;
        }
        true
    }

    /// Mark an exercise done and grant its XP. Returns the XP granted.
    pub fn complete_exercise(
        &mut self,
        level_id: &str,
        exercise_id: &str,
        outcome: ExerciseOutcome,
        last_submission: Option<String>,
    ) -> u32 {
        if !self.record_exercise(level_id, exercise_id, outcome, last_submission) {
            return 0;
        }
        let xp = crate::progression::calculate_exercise_xp(outcome).total;
        self.add_xp(xp);
        xp
    }

    /// Mark a level completed with its star rating. Returns the XP granted.
    pub fn complete_level(&mut self, level_id: &str, stars: u8, now: DateTime<Utc>) -> u32 {
        let Some(level) = self.level_progress.get_mut(level_id) else {
            return 0;
        };
        level.status = LevelStatus::Completed;
        level.stars = stars;
        level.completed_at = Some(now);
        let xp = if stars == 3 { XpRewards::LEVEL_THREE_STARS } else { XpRewards::LEVEL_COMPLETE };
        level.xp_earned = level.xp_earned.saturating_add(xp);
        self.add_xp(xp);
        xp
    }

    /// Keep the faster of the stored and the new time.
    pub fn save_best_time(&mut self, level_id: &str, seconds: u64) {
        if let Some(level) = self.level_progress.get_mut(level_id) {
            if level.best_time.map_or(true, |best| seconds < best) {
                level.best_time = Some(seconds);
            }
        }
    }

    pub fn is_unlocked(&self, achievement_id: &str) -> bool {
        self.achievements.iter().any(|a| a.id == achievement_id)
    }

    /// Record an unlocked achievement and grant its XP, only the first time.
    pub fn unlock(&mut self, achievement: Achievement) -> bool {
        if self.is_unlocked(&achievement.id) {
            return false;
        }
        self.achievements.push(achievement);
        self.add_xp(XpRewards::ACHIEVEMENT_UNLOCK);
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Key/value persistence for progress.
pub trait ProgressStore {
    fn get(&self, key: &str) -> Result<Option<Progress>>;
    fn set(&self, key: &str, progress: &Progress) -> Result<()>;
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    storage_path: PathBuf,
}

impl FileProgressStore {
    pub fn new(storage_path: impl Into<PathBuf>) -> Result<Self> {
        let storage_path = storage_path.into();
        fs::create_dir_all(&storage_path)
            .with_context(|| format!("creating progress directory: {}", storage_path.display()))?;
        Ok(Self { storage_path })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.data_path())
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.storage_path.join(format!("{key}.json"))
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let p = self.file_path(key);
        if p.exists() {
            fs::remove_file(&p).with_context(|| format!("removing {}", p.display()))?;
        }
        Ok(())
    }
}

impl ProgressStore for FileProgressStore {
    fn get(&self, key: &str) -> Result<Option<Progress>> {
        let p = self.file_path(key);
        if !p.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&p).with_context(|| format!("reading {}", p.display()))?;
        let progress = serde_json::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        Ok(Some(progress))
    }

    fn set(&self, key: &str, progress: &Progress) -> Result<()> {
        let p = self.file_path(key);
        // Readers only ever see a complete file
        let tmp = p.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(progress)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &p).with_context(|| format!("replacing {}", p.display()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    entries: Mutex<HashMap<String, Progress>>,
}

impl ProgressStore for MemoryProgressStore {
    fn get(&self, key: &str) -> Result<Option<Progress>> {
        let entries = self.entries.lock().map_err(|_| anyhow::anyhow!("progress store poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, progress: &Progress) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| anyhow::anyhow!("progress store poisoned"))?;
        entries.insert(key.to_string(), progress.clone());
        Ok(())
    }
}
