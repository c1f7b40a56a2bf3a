use indexmap::IndexMap;
use thiserror::Error;

pub const DEFAULT_LEVELS: [&str; 6] = ["none", "default", "toolbox", "olive", "oper", "debug"];

const RESERVED_SNAPSHOT: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriorityError {
    #[error("[QY406] unknown priority level '{0}'")]
    UnknownLevel(String),
    #[error("[QY406] no priority snapshot tagged '{0}'")]
    UnknownSnapshot(String),
    #[error("[QY406] the '{0}' priority snapshot cannot be overwritten")]
    Reserved(String),
}

/// Ordered priority levels, lowest first. Every mutation bumps `version` so
/// callers can tell whether a ranking they cached is stale.
#[derive(Clone, Debug)]
pub struct PriorityTable {
    levels: Vec<String>,
    snapshots: IndexMap<String, Vec<String>>,
    version: u64,
}

impl PriorityTable {
    pub fn new() -> Self {
        let levels: Vec<String> = DEFAULT_LEVELS.iter().map(ToString::to_string).collect();
        let mut snapshots = IndexMap::new();
        snapshots.insert(RESERVED_SNAPSHOT.to_string(), levels.clone());
        Self {
            levels,
            snapshots,
            version: 0,
        }
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Rank of `level`; higher wins ties between matching candidates.
    pub fn value(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|name| name == level)
    }

    fn position(&self, level: &str) -> Result<usize, PriorityError> {
        self.value(level)
            .ok_or_else(|| PriorityError::UnknownLevel(level.to_string()))
    }

    pub fn up(&mut self, level: &str) -> Result<(), PriorityError> {
        let idx = self.position(level)?;
        if idx + 1 < self.levels.len() {
            self.levels.swap(idx, idx + 1);
        }
        self.version += 1;
        Ok(())
    }

    pub fn down(&mut self, level: &str) -> Result<(), PriorityError> {
        let idx = self.position(level)?;
        if idx > 0 {
            self.levels.swap(idx, idx - 1);
        }
        self.version += 1;
        Ok(())
    }

    pub fn top(&mut self, level: &str) -> Result<(), PriorityError> {
        let idx = self.position(level)?;
        let name = self.levels.remove(idx);
        self.levels.push(name);
        self.version += 1;
        Ok(())
    }

    pub fn bottom(&mut self, level: &str) -> Result<(), PriorityError> {
        let idx = self.position(level)?;
        let name = self.levels.remove(idx);
        self.levels.insert(0, name);
        self.version += 1;
        Ok(())
    }

    /// Appends levels above every existing one; known names are moved.
    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if let Some(idx) = self.value(&name) {
                self.levels.remove(idx);
            }
            self.levels.push(name);
        }
        self.version += 1;
    }

    pub fn freeze(&mut self, tag: &str) -> Result<(), PriorityError> {
        if tag == RESERVED_SNAPSHOT {
            return Err(PriorityError::Reserved(tag.to_string()));
        }
        self.snapshots.insert(tag.to_string(), self.levels.clone());
        Ok(())
    }

    pub fn restore(&mut self, tag: &str) -> Result<(), PriorityError> {
        let levels = self
            .snapshots
            .get(tag)
            .cloned()
            .ok_or_else(|| PriorityError::UnknownSnapshot(tag.to_string()))?;
        self.levels = levels;
        self.version += 1;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.levels = self
            .snapshots
            .get(RESERVED_SNAPSHOT)
            .cloned()
            .unwrap_or_else(|| DEFAULT_LEVELS.iter().map(ToString::to_string).collect());
        self.version += 1;
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self::new()
    }
}
