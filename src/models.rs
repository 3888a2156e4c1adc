use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub type TaskId = u64;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Sort rank used by the display order; lower sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }

    /// Visual cue for presentation layers.
    pub fn color(self) -> &'static str {
        match self {
            Priority::High => "#f44336",
            Priority::Medium => "#ff9800",
            Priority::Low => "#4CAF50",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "high" | "h" => Ok(Priority::High),
            "medium" | "m" => Ok(Priority::Medium),
            "low" | "l" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

// Stored files may carry anything in the priority slot (null, numbers, typos);
// all of it reads as Medium.
impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(match raw.as_ref().and_then(Value::as_str) {
            Some("High") => Priority::High,
            Some("Medium") => Priority::Medium,
            Some("Low") => Priority::Low,
            _ => {
                log::warn!("models: unknown priority {raw:?}, using Medium");
                Priority::Medium
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    #[default]
    All,
    Active,
    Completed,
}

impl Filter {
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Filter::All => true,
            Filter::Active => !task.completed,
            Filter::Completed => task.completed,
        }
    }
}

impl FromStr for Filter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "all" => Ok(Filter::All),
            "active" => Ok(Filter::Active),
            "completed" | "done" => Ok(Filter::Completed),
            other => Err(format!("unknown filter: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub completed: bool,
    #[serde(default, with = "timestamp")]
    pub created_at: NaiveDateTime,
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(flag)) => Ok(flag),
        None | Some(Value::Null) => Ok(false),
        Some(other) => {
            log::warn!("models: non-boolean completed flag {other}, using false");
            Ok(false)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub struct Stats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
}

/// On-disk layout of the task file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TasksFile {
    #[serde(default)]
    pub next_id: TaskId,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Settings {
    #[serde(default)]
    pub default_priority: Priority,
    #[serde(default)]
    pub default_filter: Filter,
    #[serde(default = "default_backup_keep")]
    pub backup_keep: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_priority: Priority::Medium,
            default_filter: Filter::All,
            backup_keep: default_backup_keep(),
        }
    }
}

fn default_backup_keep() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SettingsFile {
    pub schema_version: u32,
    pub settings: Settings,
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    /// `null` reads as the epoch like a missing field; a malformed string is an error.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).map_err(|err| {
                serde::de::Error::custom(format!("created_at {raw:?}: {err}"))
            }),
            None => Ok(NaiveDateTime::default()),
        }
    }
}
