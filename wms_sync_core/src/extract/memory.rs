use super::{RemoteSession, RemoteSource};
use crate::models::Record;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// In-process source returning a fixed row set for every query.
#[derive(Clone, Default)]
pub struct MemorySource {
    rows: Arc<Mutex<Vec<Record>>>,
    executed: Arc<Mutex<Vec<String>>>,
    refuse_connections: bool,
    fail_queries: bool,
}

impl MemorySource {
    pub fn new(rows: Vec<Record>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(rows)),
            ..Self::default()
        }
    }

    pub fn refuse_connections(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    pub fn fail_queries(mut self) -> Self {
        self.fail_queries = true;
        self
    }

    /// Replace the rows served from now on.
    pub fn set_rows(&self, rows: Vec<Record>) {
        if let Ok(mut guard) = self.rows.lock() {
            *guard = rows;
        }
    }

    /// Every statement and query seen so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteSource for MemorySource {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        if self.refuse_connections {
            return Err(Error::Connection("memory source refuses connections".to_string()));
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl RemoteSession for MemorySource {
    async fn execute(&self, statement: &str) -> Result<()> {
        if let Ok(mut log) = self.executed.lock() {
            log.push(statement.to_string());
        }
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Record>> {
        if let Ok(mut log) = self.executed.lock() {
            log.push(sql.to_string());
        }
        if self.fail_queries {
            return Err(Error::Query("SQL0204N name is an undefined name".to_string()));
        }
        self.rows
            .lock()
            .map(|g| g.clone())
            .map_err(|_| Error::BackendMessage("memory source poisoned".to_string()))
    }
}
