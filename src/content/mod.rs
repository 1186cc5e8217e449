//! Static course content: worlds, levels, exercises and their test cases.

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::grader::{Challenge, TestCase};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseContent {
    pub id: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelContent {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_boss: bool,
    #[serde(default)]
    pub exercises: Vec<ExerciseContent>,
    #[serde(default)]
    pub challenge: Option<Challenge>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldContent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub levels: Vec<LevelContent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMeta {
    pub id: String,
    pub world_id: String,
    pub is_boss: bool,
    pub exercise_ids: Vec<String>,
}

/// A world as the progress layer sees it: the levels that must all be completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldMeta {
    pub id: String,
    pub level_ids: Vec<String>,
}

/// Read-only access to course content.
pub trait ContentProvider {
    fn test_cases(&self, exercise_id: &str) -> Option<Vec<TestCase>>;
    fn level_meta(&self, level_id: &str) -> Option<LevelMeta>;
    fn worlds(&self) -> Vec<WorldMeta>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentLibrary {
    pub worlds: Vec<WorldContent>,
    #[serde(skip)]
    exercises: HashMap<String, (usize, usize, usize)>,
}

impl ContentLibrary {
    pub fn new(worlds: Vec<WorldContent>) -> Self {
        let mut library = Self { worlds, exercises: HashMap::new() };
        library.index();
        library
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let parsed: ContentLibrary = serde_json::from_str(text).context("parsing content")?;
        Ok(Self::new(parsed.worlds))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading content file: {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("loading content from {}", path.display()))
    }

    fn index(&mut self) {
        self.exercises.clear();
        for (w, world) in self.worlds.iter().enumerate() {
            for (l, level) in world.levels.iter().enumerate() {
                for (e, exercise) in level.exercises.iter().enumerate() {
                    self.exercises.insert(exercise.id.clone(), (w, l, e));
                }
            }
        }
    }

    pub fn level(&self, level_id: &str) -> Option<(&WorldContent, &LevelContent)> {
        self.worlds
            .iter()
            .find_map(|w| w.levels.iter().find(|l| l.id == level_id).map(|l| (w, l)))
    }
}

impl ContentProvider for ContentLibrary {
    fn test_cases(&self, exercise_id: &str) -> Option<Vec<TestCase>> {
        let &(w, l, e) = self.exercises.get(exercise_id)?;
        Some(self.worlds[w].levels[l].exercises[e].test_cases.clone())
    }

    fn level_meta(&self, level_id: &str) -> Option<LevelMeta> {
        let (world, level) = self.level(level_id)?;
        Some(LevelMeta {
            id: level.id.clone(),
            world_id: world.id.clone(),
            is_boss: level.is_boss,
            exercise_ids: level.exercises.iter().map(|e| e.id.clone()).collect(),
        })
    }

    fn worlds(&self) -> Vec<WorldMeta> {
        self.worlds
            .iter()
            .map(|w| WorldMeta { id: w.id.clone(), level_ids: w.levels.iter().map(|l| l.id.clone()).collect() })
            .collect()
    }
}
