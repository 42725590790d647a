//! Watering programs persisted as one JSON document in storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

use crate::http::response::StatusCode;
use crate::storage::{Storage, StorageError};

/// Fields every program body must carry.
pub const REQUIRED_FIELDS: [&str; 4] = ["name", "start", "days", "zones"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramZone {
    pub zone: String,
    /// Seconds
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    /// Time of day, `HH:MM`
    pub start: String,
    pub days: Vec<String>,
    pub zones: Vec<ProgramZone>,
}

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid program: {0}")]
    Invalid(String),

    #[error("program name does not match the URL")]
    NameMismatch,

    #[error("program already exists: {0}")]
    Exists(String),

    #[error("program not found: {0}")]
    NotFound(String),

    #[error("stored programs are unreadable: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProgramError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProgramError::MissingField(_) | ProgramError::Invalid(_) | ProgramError::NameMismatch => {
                StatusCode::BadRequest
            }
            ProgramError::Exists(_) => StatusCode::Conflict,
            ProgramError::NotFound(_) => StatusCode::NotFound,
            ProgramError::Corrupt(_) | ProgramError::Storage(_) => StatusCode::InternalServerError,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProgramError::MissingField(_) => "MISSING_FIELD",
            ProgramError::Invalid(_) => "INVALID_PROGRAM",
            ProgramError::NameMismatch => "NAME_MISMATCH",
            ProgramError::Exists(_) => "PROGRAM_EXISTS",
            ProgramError::NotFound(_) => "PROGRAM_NOT_FOUND",
            ProgramError::Corrupt(_) => "STORAGE_CORRUPT",
            ProgramError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// Validate a request body and decode it into a [`Program`].
///
/// Presence of every required field is checked before anything else, so a
/// partial body always reports the first missing field by name.
pub fn parse_program(body: &[u8]) -> Result<Program, ProgramError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| ProgramError::Invalid(e.to_string()))?;
    let Some(fields) = value.as_object() else {
        return Err(ProgramError::Invalid("expected a JSON object".to_string()));
    };

    if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !fields.contains_key(**f)) {
        return Err(ProgramError::MissingField(*missing));
    }

    let program: Program = serde_json::from_value(value).map_err(|e| ProgramError::Invalid(e.to_string()))?;
    if program.name.trim().is_empty() {
        return Err(ProgramError::Invalid("name must not be empty".to_string()));
    }
    if !is_time_of_day(&program.start) {
        return Err(ProgramError::Invalid(format!("start must be HH:MM, got {:?}", program.start)));
    }
    Ok(program)
}

fn is_time_of_day(s: &str) -> bool {
    let Some((h, m)) = s.split_once(':') else {
        return false;
    };
    let in_range = |v: &str, max: u8| v.len() == 2 && v.parse::<u8>().is_ok_and(|n| n <= max);
    in_range(h, 23) && in_range(m, 59)
}

/// CRUD over the programs document.
///
/// Every mutation is a read-modify-write of the whole file under one lock;
/// a rejected request never touches storage.
pub struct ProgramStore {
    storage: Arc<dyn Storage>,
    path: String,
    lock: Mutex<()>,
}

impl ProgramStore {
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// All programs; an absent document is an empty list.
    pub fn list(&self) -> Result<Vec<Program>, ProgramError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.load()
    }

    pub fn get(&self, name: &str) -> Result<Program, ProgramError> {
        self.list()?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ProgramError::NotFound(name.to_string()))
    }

    pub fn create(&self, program: Program) -> Result<(), ProgramError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut programs = self.load()?;
        if programs.iter().any(|p| p.name == program.name) {
            return Err(ProgramError::Exists(program.name));
        }

        info!(program = %program.name, "program created");
        programs.push(program);
        self.save(&programs)
    }

    /// Replace the named program, or add it. Returns true when added.
    pub fn upsert(&self, program: Program) -> Result<bool, ProgramError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut programs = self.load()?;

        let created = match programs.iter_mut().find(|p| p.name == program.name) {
            Some(existing) => {
                *existing = program;
                false
            }
            None => {
                programs.push(program);
                true
            }
        };

        self.save(&programs)?;
        Ok(created)
    }

    pub fn remove(&self, name: &str) -> Result<(), ProgramError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut programs = self.load()?;

        let before = programs.len();
        programs.retain(|p| p.name != name);
        if programs.len() == before {
            return Err(ProgramError::NotFound(name.to_string()));
        }

        info!(program = %name, "program removed");
        self.save(&programs)
    }

    fn load(&self) -> Result<Vec<Program>, ProgramError> {
        self.storage.ensure_mounted()?;
        if !self.storage.exists(&self.path) {
            return Ok(Vec::new());
        }
        let bytes = self.storage.read_file(&self.path)?;
        serde_json::from_slice(&bytes).map_err(ProgramError::Corrupt)
    }

    fn save(&self, programs: &[Program]) -> Result<(), ProgramError> {
        let bytes = serde_json::to_vec_pretty(programs).map_err(ProgramError::Corrupt)?;
        self.storage.write_file(&self.path, &bytes)?;
        debug!(path = %self.path, count = programs.len(), "programs saved");
        Ok(())
    }
}
