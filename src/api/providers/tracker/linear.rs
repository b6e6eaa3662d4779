//! Linear tracker provider implementation

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, warn};

use super::{TaskState, TaskUpdate, TrackerProvider, TrackerTask};
use crate::api::error::ApiError;

const LINEAR_API_URL: &str = "https://api.linear.app/graphql";
const PROVIDER_NAME: &str = "linear";

/// Linear API provider
pub struct LinearProvider {
    api_key: String,
    team_id: String,
    client: Client,
}

impl LinearProvider {
    /// Create a new Linear provider
    pub fn new(api_key: String, team_id: String) -> Self {
        Self {
            api_key,
            team_id,
            client: Client::new(),
        }
    }

    /// Create from environment variables
    ///
    /// Required environment variables:
    /// - FOREMAN_LINEAR_API_KEY: Your Linear API key (lin_api_...)
    /// - FOREMAN_LINEAR_TEAM_ID: The team the run's tasks are created in
    pub fn from_env() -> Result<Self, ApiError> {
        let api_key = env::var("FOREMAN_LINEAR_API_KEY").ok();
        let team_id = env::var("FOREMAN_LINEAR_TEAM_ID").ok();

        match (api_key, team_id) {
            (Some(key), Some(team)) if !key.is_empty() && !team.is_empty() => {
                Ok(Self::new(key, team))
            }
            _ => Err(ApiError::not_configured(PROVIDER_NAME)),
        }
    }

    /// Execute a GraphQL query
    async fn graphql<T: for<'de> Deserialize<'de>>(
        &self,
        query: &str,
        variables: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        #[derive(Serialize)]
        struct GraphQLRequest<'a> {
            query: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            variables: Option<serde_json::Value>,
        }

        #[derive(Deserialize)]
        struct GraphQLResponse<T> {
            data: Option<T>,
            errors: Option<Vec<GraphQLError>>,
        }

        #[derive(Deserialize)]
        struct GraphQLError {
            message: String,
        }

        let request = GraphQLRequest { query, variables };

        debug!("Linear GraphQL query: {}", query);

        let response = self
            .client
            .post(LINEAR_API_URL)
            .header("Authorization", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::network(PROVIDER_NAME, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return match status.as_u16() {
                401 => Err(ApiError::unauthorized(PROVIDER_NAME)),
                403 => Err(ApiError::forbidden(PROVIDER_NAME)),
                429 => Err(ApiError::rate_limited(PROVIDER_NAME, None)),
                _ => Err(ApiError::http(PROVIDER_NAME, status.as_u16(), body)),
            };
        }

        let gql_response: GraphQLResponse<T> = response
            .json()
            .await
            .map_err(|e| ApiError::http(PROVIDER_NAME, 0, format!("Parse error: {}", e)))?;

        if let Some(errors) = gql_response.errors {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(ApiError::http(PROVIDER_NAME, 0, messages.join("; ")));
        }

        gql_response
            .data
            .ok_or_else(|| ApiError::http(PROVIDER_NAME, 0, "No data in response".to_string()))
    }

    /// Resolve a workflow state name for this team, matching by name pattern.
    async fn resolve_state_id(&self, state: TaskState) -> Result<Option<String>, ApiError> {
        #[derive(Deserialize)]
        struct StatesResponse {
            team: TeamStates,
        }

        #[derive(Deserialize)]
        struct TeamStates {
            states: StateNodes,
        }

        #[derive(Deserialize)]
        struct StateNodes {
            nodes: Vec<WorkflowState>,
        }

        #[derive(Deserialize)]
        struct WorkflowState {
            id: String,
            name: String,
        }

        let query = r#"
            query($teamId: String!) {
                team(id: $teamId) {
                    states {
                        nodes {
                            id
                            name
                        }
                    }
                }
            }
        "#;

        let variables = serde_json::json!({ "teamId": self.team_id });
        let response: StatesResponse = self.graphql(query, Some(variables)).await?;

        let patterns: &[&str] = match state {
            TaskState::Todo => &["todo", "backlog"],
            TaskState::Started => &["in progress", "started"],
            TaskState::Done => &["done", "completed", "merged"],
            TaskState::Failed => &["canceled", "cancelled"],
        };

        let found = response.team.states.nodes.into_iter().find(|s| {
            let name = s.name.to_lowercase();
            patterns.iter().any(|p| name.contains(p))
        });

        if found.is_none() {
            warn!(?state, "no matching workflow state on Linear team");
        }

        Ok(found.map(|s| s.id))
    }
}

// Linear GraphQL response types
#[derive(Debug, Deserialize)]
struct ProjectCreateResponse {
    #[serde(rename = "projectCreate")]
    project_create: ProjectCreatePayload,
}

#[derive(Debug, Deserialize)]
struct ProjectCreatePayload {
    success: bool,
    project: Option<LinearProject>,
}

#[derive(Debug, Deserialize)]
struct LinearProject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IssueCreateResponse {
    #[serde(rename = "issueCreate")]
    issue_create: IssueCreatePayload,
}

#[derive(Debug, Deserialize)]
struct IssueCreatePayload {
    success: bool,
    issue: Option<LinearIssue>,
}

#[derive(Debug, Deserialize)]
struct LinearIssue {
    id: String,
    identifier: String,
    title: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct IssueUpdateResponse {
    #[serde(rename = "issueUpdate")]
    issue_update: IssueUpdatePayload,
}

#[derive(Debug, Deserialize)]
struct IssueUpdatePayload {
    success: bool,
}

#[async_trait]
impl TrackerProvider for LinearProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.team_id.is_empty()
    }

    async fn create_project(&self, name: &str) -> Result<String, ApiError> {
        let query = r#"
            mutation($name: String!, $teamIds: [String!]!) {
                projectCreate(input: { name: $name, teamIds: $teamIds }) {
                    success
                    project {
                        id
                    }
                }
            }
        "#;

        let variables = serde_json::json!({
            "name": name,
            "teamIds": [self.team_id],
        });

        let response: ProjectCreateResponse = self.graphql(query, Some(variables)).await?;

        if !response.project_create.success {
            return Err(ApiError::http(
                PROVIDER_NAME,
                0,
                "projectCreate reported failure".to_string(),
            ));
        }

        response
            .project_create
            .project
            .map(|p| p.id)
            .ok_or_else(|| ApiError::http(PROVIDER_NAME, 0, "No project in response".to_string()))
    }

    async fn create_task(
        &self,
        title: &str,
        description: &str,
        project_id: &str,
    ) -> Result<TrackerTask, ApiError> {
        let query = r#"
            mutation($title: String!, $description: String, $teamId: String!, $projectId: String) {
                issueCreate(input: {
                    title: $title,
                    description: $description,
                    teamId: $teamId,
                    projectId: $projectId
                }) {
                    success
                    issue {
                        id
                        identifier
                        title
                        url
                    }
                }
            }
        "#;

        let variables = serde_json::json!({
            "title": title,
            "description": description,
            "teamId": self.team_id,
            "projectId": project_id,
        });

        let response: IssueCreateResponse = self.graphql(query, Some(variables)).await?;

        if !response.issue_create.success {
            return Err(ApiError::http(
                PROVIDER_NAME,
                0,
                "issueCreate reported failure".to_string(),
            ));
        }

        let issue = response
            .issue_create
            .issue
            .ok_or_else(|| ApiError::http(PROVIDER_NAME, 0, "No issue in response".to_string()))?;

        Ok(TrackerTask {
            id: issue.id,
            identifier: Some(issue.identifier),
            title: issue.title,
            url: Some(issue.url),
        })
    }

    async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<(), ApiError> {
        let state_id = match update.state {
            Some(state) => self.resolve_state_id(state).await?,
            None => None,
        };

        // Nothing resolvable to change is a successful no-op.
        if state_id.is_none() && update.description.is_none() {
            return Ok(());
        }

        let query = r#"
            mutation($id: String!, $stateId: String, $description: String) {
                issueUpdate(id: $id, input: { stateId: $stateId, description: $description }) {
                    success
                }
            }
        "#;

        let variables = serde_json::json!({
            "id": task_id,
            "stateId": state_id,
            "description": update.description,
        });

        let response: IssueUpdateResponse = self.graphql(query, Some(variables)).await?;

        if !response.issue_update.success {
            return Err(ApiError::http(
                PROVIDER_NAME,
                0,
                "issueUpdate reported failure".to_string(),
            ));
        }

        Ok(())
    }

    async fn test_connection(&self) -> Result<bool, ApiError> {
        let query = r#"
            query {
                viewer {
                    id
                }
            }
        "#;

        #[derive(Deserialize)]
        struct ViewerResponse {
            #[allow(dead_code)]
            viewer: Viewer,
        }

        #[derive(Deserialize)]
        struct Viewer {
            #[allow(dead_code)]
            id: String,
        }

        match self.graphql::<ViewerResponse>(query, None).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_auth_error() => {
                warn!("Linear authentication failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
