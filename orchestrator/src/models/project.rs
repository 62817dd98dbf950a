//! Project models

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::models::deployment::Environment;
use crate::storage::repository::Record;

/// Build/deploy script template and default target of a project.
///
/// Read-only to the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub owner_id: String,

    /// Repository URL, exported to scripts as `DEPLOY_REPO`
    #[serde(default)]
    pub repository: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default)]
    pub build_script: Option<String>,

    #[serde(default)]
    pub deploy_script: String,

    #[serde(default)]
    pub rollback_script: Option<String>,

    #[serde(default = "default_environment")]
    pub default_environment: Environment,

    #[serde(default)]
    pub host_id: Option<String>,

    /// Probed with an HTTP GET during the verifying phase
    #[serde(default)]
    pub health_check_url: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_environment() -> Environment {
    Environment::Dev
}

#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub owner_id: Option<String>,
}

impl Record for Project {
    /// Projects are configuration input; updates replace the whole record
    type Patch = Project;
    type Filter = ProjectFilter;

    const KIND: &'static str = "project";

    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, patch: Project) -> Result<(), OrchestratorError> {
        if patch.id != self.id {
            return Err(OrchestratorError::ValidationError(format!(
                "project id mismatch: {} != {}",
                patch.id, self.id
            )));
        }
        *self = patch;
        Ok(())
    }

    fn matches(&self, filter: &ProjectFilter) -> bool {
        filter.owner_id.as_ref().is_none_or(|o| *o == self.owner_id)
    }
}
