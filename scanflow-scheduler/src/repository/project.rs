//! Project membership

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::error::Result;

/// Which user belongs to which project
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn is_member(&self, user: &str, project_id: &str) -> Result<bool>;

    async fn add_member(&self, user: &str, project_id: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryProjectStore {
    memberships: RwLock<HashMap<String, HashSet<String>>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn is_member(&self, user: &str, project_id: &str) -> Result<bool> {
        Ok(self
            .memberships
            .read()
            .await
            .get(user)
            .is_some_and(|projects| projects.contains(project_id)))
    }

    async fn add_member(&self, user: &str, project_id: &str) -> Result<()> {
        self.memberships
            .write()
            .await
            .entry(user.to_string())
            .or_default()
            .insert(project_id.to_string());
        Ok(())
    }
}
