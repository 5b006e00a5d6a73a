// Project directory - resolves the account's domain and per-region projects

use std::collections::HashMap;

use serde::Deserialize;

use super::client::SignedClient;
use crate::error::CloudError;

const PROJECTS_PATH: &str = "/v3/auth/projects";

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub id: String,
    /// Project name equals the region name
    pub name: String,
    #[serde(default)]
    pub domain_id: String,
}

#[derive(Debug, Deserialize)]
struct ProjectsResponse {
    #[serde(default)]
    projects: Vec<Project>,
}

/// Domain id plus region -> project id, as resolved once per account.
#[derive(Debug, Clone, Default)]
pub struct ProjectDirectory {
    pub domain_id: String,
    pub projects: HashMap<String, String>,
}

impl ProjectDirectory {
    pub fn from_projects(projects: Vec<Project>) -> Result<Self, CloudError> {
        let domain_id = projects
            .iter()
            .map(|p| p.domain_id.as_str())
            .find(|id| !id.is_empty())
            .ok_or_else(|| CloudError::Decode("No project carries a domain_id".to_string()))?
            .to_string();

        let projects = projects.into_iter().map(|p| (p.name, p.id)).collect();
        Ok(Self { domain_id, projects })
    }

    pub fn project_id(&self, region: &str) -> Result<&str, CloudError> {
        self.projects
            .get(region)
            .map(String::as_str)
            .ok_or_else(|| CloudError::InvalidRequest(format!("No project found for region {}", region)))
    }
}

pub struct ProjectClient {
    client: SignedClient,
}

impl ProjectClient {
    pub fn new(client: SignedClient) -> Self {
        Self { client }
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, CloudError> {
        let response: ProjectsResponse = self.client.get(PROJECTS_PATH, &[]).await?;
        Ok(response.projects)
    }

    pub async fn resolve(&self) -> Result<ProjectDirectory, CloudError> {
        ProjectDirectory::from_projects(self.list_projects().await?)
    }
}
