use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

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
    pub db_file_name: String,
}

impl AppState {
    pub fn new(db_file_name: impl Into<String>) -> Self {
        Self {
            workspace: None,
            db: None,
            db_file_name: db_file_name.into(),
        }
    }
}
