use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::publish::GradeDraft;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub teacher_name: String,
    /// Open grade drafts keyed by exam id. Dropped when the workspace changes.
    pub drafts: HashMap<String, GradeDraft>,
}

impl AppState {
    pub fn new(teacher_name: impl Into<String>) -> Self {
        Self {
            workspace: None,
            db: None,
            teacher_name: teacher_name.into(),
            drafts: HashMap::new(),
        }
    }

    pub fn open_workspace(&mut self, path: PathBuf, conn: Connection) {
        self.workspace = Some(path);
        self.db = Some(conn);
        self.drafts.clear();
    }
}
