//! # Dashboards
//!
//! Saved panel layouts. Each panel keeps the query it was last edited with,
//! so opening the editor on a panel resumes where the user left off.
//!
//! When a backing file is configured the full list is written to it as
//! pretty JSON after every mutation, and read back on startup.

use std::path::PathBuf;

use fq_core::QueryModel;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub panels: Vec<Panel>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub query: QueryModel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDashboardRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub panels: Vec<Panel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDashboardRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub panels: Option<Vec<Panel>>,
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Dashboard not found: {0}")]
    NotFound(String),

    #[error("Panel {panel} not found in dashboard {dashboard}")]
    PanelNotFound { dashboard: String, panel: String },

    #[error("dashboard storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("dashboard file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DashboardResult<T> = Result<T, DashboardError>;

pub struct DashboardManager {
    dashboards: RwLock<Vec<Dashboard>>,
    path: Option<PathBuf>,
}

impl DashboardManager {
    /// A manager that keeps dashboards in memory only.
    pub fn new() -> Self {
        Self {
            dashboards: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// A manager backed by `path`. A missing file starts an empty list.
    pub async fn open(path: impl Into<PathBuf>) -> DashboardResult<Self> {
        let path = path.into();
        let dashboards = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            path = %path.display(),
            count = dashboards.len(),
            "Loaded dashboards"
        );
        Ok(Self {
            dashboards: RwLock::new(dashboards),
            path: Some(path),
        })
    }

    pub async fn list(&self) -> Vec<Dashboard> {
        self.dashboards.read().await.clone()
    }

    pub async fn create(&self, req: CreateDashboardRequest) -> DashboardResult<Dashboard> {
        let now = chrono::Utc::now().to_rfc3339();
        let dashboard = Dashboard {
            id: format!("dash-{}", uuid::Uuid::new_v4().as_simple()),
            name: req.name,
            description: req.description,
            panels: with_panel_ids(req.panels),
            created_at: now.clone(),
            updated_at: now,
        };

        let mut dashboards = self.dashboards.write().await;
        let mut next = dashboards.clone();
        next.push(dashboard.clone());
        self.commit(&mut dashboards, next).await?;
        Ok(dashboard)
    }

    pub async fn get(&self, id: &str) -> Option<Dashboard> {
        self.dashboards
            .read()
            .await
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub async fn update(&self, id: &str, req: UpdateDashboardRequest) -> DashboardResult<Dashboard> {
        let mut dashboards = self.dashboards.write().await;
        let mut next = dashboards.clone();
        let dashboard = find_mut(&mut next, id)?;
        if let Some(name) = req.name {
            dashboard.name = name;
        }
        if req.description.is_some() {
            dashboard.description = req.description;
        }
        if let Some(panels) = req.panels {
            dashboard.panels = with_panel_ids(panels);
        }
        dashboard.updated_at = chrono::Utc::now().to_rfc3339();
        let updated = dashboard.clone();

        self.commit(&mut dashboards, next).await?;
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> DashboardResult<()> {
        let mut dashboards = self.dashboards.write().await;
        let idx = dashboards
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| DashboardError::NotFound(id.to_string()))?;
        let mut next = dashboards.clone();
        next.remove(idx);
        self.commit(&mut dashboards, next).await
    }

    /// The query saved on a panel.
    pub async fn panel_query(&self, id: &str, panel_id: &str) -> DashboardResult<QueryModel> {
        let dashboards = self.dashboards.read().await;
        let dashboard = dashboards
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| DashboardError::NotFound(id.to_string()))?;
        dashboard
            .panels
            .iter()
            .find(|p| p.id == panel_id)
            .map(|p| p.query.clone())
            .ok_or_else(|| DashboardError::PanelNotFound {
                dashboard: id.to_string(),
                panel: panel_id.to_string(),
            })
    }

    /// Store `query` on a panel, adding the panel if the dashboard lacks it.
    pub async fn save_panel_query(
        &self,
        id: &str,
        panel_id: &str,
        query: QueryModel,
    ) -> DashboardResult<Dashboard> {
        let mut dashboards = self.dashboards.write().await;
        let mut next = dashboards.clone();
        let dashboard = find_mut(&mut next, id)?;
        match dashboard.panels.iter_mut().find(|p| p.id == panel_id) {
            Some(panel) => panel.query = query,
            None => dashboard.panels.push(Panel {
                id: panel_id.to_string(),
                title: panel_id.to_string(),
                query,
            }),
        }
        dashboard.updated_at = chrono::Utc::now().to_rfc3339();
        let updated = dashboard.clone();

        self.commit(&mut dashboards, next).await?;
        Ok(updated)
    }

    /// Write `next` to the backing file, then make it the current list.
    /// A failed write leaves `current` untouched.
    async fn commit(
        &self,
        current: &mut Vec<Dashboard>,
        next: Vec<Dashboard>,
    ) -> DashboardResult<()> {
        self.persist(&next).await?;
        *current = next;
        Ok(())
    }

    async fn persist(&self, dashboards: &[Dashboard]) -> DashboardResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(dashboards)?;
        tokio::fs::write(path, json).await.map_err(|e| {
            tracing::error!(path = %path.display(), "Failed to persist dashboards: {}", e);
            DashboardError::Io(e)
        })
    }
}

impl Default for DashboardManager {
    fn default() -> Self {
        Self::new()
    }
}

fn find_mut<'a>(dashboards: &'a mut [Dashboard], id: &str) -> DashboardResult<&'a mut Dashboard> {
    dashboards
        .iter_mut()
        .find(|d| d.id == id)
        .ok_or_else(|| DashboardError::NotFound(id.to_string()))
}

fn with_panel_ids(panels: Vec<Panel>) -> Vec<Panel> {
    panels
        .into_iter()
        .map(|mut p| {
            if p.id.trim().is_empty() {
                p.id = format!("panel-{}", uuid::Uuid::new_v4().as_simple());
            }
            p
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_req(name: &str) -> CreateDashboardRequest {
        serde_json::from_value(json!({
            "name": name,
            "panels": [
                { "id": "p1", "title": "Users", "query": { "collectionPath": "users", "limit": 10 } },
                { "title": "Raw", "query": { "query": "select * from users" } },
            ],
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let manager = DashboardManager::new();
        let dash = manager.create(create_req("Team")).await.unwrap();

        assert!(dash.id.starts_with("dash-"));
        assert_eq!(dash.panels[0].id, "p1");
        assert!(dash.panels[1].id.starts_with("panel-"));
        assert_eq!(dash.created_at, dash.updated_at);
        assert_eq!(manager.get(&dash.id).await, Some(dash));
    }

    #[tokio::test]
    async fn test_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dashboards.json");

        let manager = DashboardManager::open(&path).await.unwrap();
        assert!(manager.list().await.is_empty());
        let dash = manager.create(create_req("Team")).await.unwrap();
        manager
            .save_panel_query(&dash.id, "p1", QueryModel::structured("orders"))
            .await
            .unwrap();

        let reloaded = DashboardManager::open(&path).await.unwrap();
        let listed = reloaded.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(
            reloaded.panel_query(&dash.id, "p1").await.unwrap(),
            QueryModel::structured("orders")
        );
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let manager = DashboardManager::new();
        let dash = manager.create(create_req("Team")).await.unwrap();

        let updated = manager
            .update(
                &dash.id,
                UpdateDashboardRequest {
                    name: Some("Ops".into()),
                    description: None,
                    panels: Some(Vec::new()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Ops");
        assert!(updated.panels.is_empty());

        manager.delete(&dash.id).await.unwrap();
        assert!(manager.get(&dash.id).await.is_none());
        assert!(matches!(
            manager.delete(&dash.id).await,
            Err(DashboardError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_panel_lookup_errors() {
        let manager = DashboardManager::new();
        let dash = manager.create(create_req("Team")).await.unwrap();

        assert!(matches!(
            manager.panel_query("missing", "p1").await,
            Err(DashboardError::NotFound(_))
        ));
        assert!(matches!(
            manager.panel_query(&dash.id, "nope").await,
            Err(DashboardError::PanelNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_adds_missing_panel() {
        let manager = DashboardManager::new();
        let dash = manager.create(create_req("Team")).await.unwrap();
        let saved = manager
            .save_panel_query(&dash.id, "p9", QueryModel::free_form("select * from orders"))
            .await
            .unwrap();
        assert_eq!(saved.panels.len(), 3);
        assert_eq!(saved.panels[2].id, "p9");
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboards.json");
        let manager = DashboardManager::open(&path).await.unwrap();
        let dash = manager.create(create_req("Team")).await.unwrap();

        // a directory in place of the file makes every write fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(matches!(
            manager.create(create_req("Other")).await,
            Err(DashboardError::Io(_))
        ));
        assert_eq!(manager.list().await, vec![dash.clone()]);

        assert!(manager
            .save_panel_query(&dash.id, "p1", QueryModel::structured("orders"))
            .await
            .is_err());
        assert!(manager
            .update(
                &dash.id,
                UpdateDashboardRequest {
                    name: Some("Ops".into()),
                    description: None,
                    panels: None,
                },
            )
            .await
            .is_err());
        assert!(manager.delete(&dash.id).await.is_err());

        assert_eq!(manager.get(&dash.id).await, Some(dash));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboards.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            DashboardManager::open(&path).await,
            Err(DashboardError::Json(_))
        ));
    }
}
