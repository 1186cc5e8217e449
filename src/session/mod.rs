//! One play-through of a level, from first exercise to the completion report.

use chrono::{DateTime, FixedOffset, Utc};

use crate::{
    achievements::{Achievement, AchievementDefinition, EvaluationContext},
    content::{LevelMeta, WorldMeta},
    grader::ChallengeOutcome,
    progression::{
        calculate_level_xp, calculate_stars, newly_reached_milestone, ExerciseOutcome, LevelResult,
        StreakMilestone, XpBreakdown,
    },
    store::{LevelStatus, Progress},
};

#[derive(Debug, Clone)]
pub struct LevelSession {
    meta: LevelMeta,
    started_at: DateTime<Utc>,
    outcomes: Vec<(String, ExerciseOutcome, Option<String>)>,
    bonus_objectives_passed: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport {
    pub stars: u8,
    pub xp: XpBreakdown,
    pub achievements: Vec<Achievement>,
    pub milestone: Option<StreakMilestone>,
    pub elapsed_seconds: u64,
}

impl LevelSession {
    pub fn start(meta: LevelMeta, started_at: DateTime<Utc>) -> Self {
        Self { meta, started_at, outcomes: Vec::new(), bonus_objectives_passed: 0 }
    }

    pub fn level_id(&self) -> &str {
        &self.meta.id
    }

    /// Record a solved exercise. A later record for the same exercise replaces the earlier one.
    pub fn record_exercise(&mut self, exercise_id: &str, outcome: ExerciseOutcome, submission: Option<String>) {
        self.outcomes.retain(|(id, _, _)| id != exercise_id);
        self.outcomes.push((exercise_id.to_string(), outcome, submission));
    }

    pub fn record_challenge(&mut self, outcome: &ChallengeOutcome) {
        if outcome.passed() {
            self.bonus_objectives_passed = outcome.bonus_objectives_passed();
        }
    }

    pub fn outcomes(&self) -> Vec<ExerciseOutcome> {
        self.outcomes.iter().map(|(_, o, _)| *o).collect()
    }

    /// Apply the finished level to `progress`: exercises, stars, streak, best
    /// time, the streak-multiplied XP total and any achievements it unlocks.
    pub fn finish(
        self,
        progress: &mut Progress,
        definitions: &[AchievementDefinition],
        worlds: &[WorldMeta],
        now: DateTime<FixedOffset>,
    ) -> LevelReport {
        let now_utc = now.with_timezone(&Utc);
        let outcomes = self.outcomes();
        let stars = calculate_stars(&outcomes);
        let elapsed_seconds = u64::try_from((now_utc - self.started_at).num_seconds()).unwrap_or(0);

        let exercise_ids: Vec<&str> = self.meta.exercise_ids.iter().map(String::as_str).collect();
        progress.init_level(&self.meta.id, &exercise_ids);
        for (exercise_id, outcome, submission) in self.outcomes {
            progress.record_exercise(&self.meta.id, &exercise_id, outcome, submission);
        }
        if let Some(level) = progress.level_progress.get_mut(&self.meta.id) {
            level.status = LevelStatus::Completed;
            level.stars = level.stars.max(stars);
            level.attempts += 1;
            level.completed_at = Some(now_utc);
        }

        let previous_streak = progress.streak.current;
        progress.streak.record_activity(now.date_naive());
        let milestone = newly_reached_milestone(previous_streak, progress.streak.current);
        progress.save_best_time(&self.meta.id, elapsed_seconds);

        let xp = calculate_level_xp(&LevelResult {
            stars,
            is_boss: self.meta.is_boss,
            bonus_objectives_passed: self.bonus_objectives_passed,
            exercise_outcomes: outcomes.clone(),
            streak_days: progress.streak.current,
        });
        if let Some(level) = progress.level_progress.get_mut(&self.meta.id) {
            level.xp_earned = level.xp_earned.saturating_add(xp.total);
        }
        progress.add_xp(xp.total);

        let ctx = EvaluationContext::after_level(now, stars, elapsed_seconds, outcomes);
        let achievements = progress.check_achievements(definitions, worlds, &ctx);

        LevelReport { stars, xp, achievements, milestone, elapsed_seconds }
    }
}
