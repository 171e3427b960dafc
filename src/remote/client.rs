use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;

use super::api_types::{
  ApiCompletion, ApiNewSubtask, ApiNewTask, ApiSubtask, ApiSubtaskPatch, ApiTask, ApiTaskPatch,
  SUBTASK_COLUMNS, TASK_COLUMNS,
};
use super::gateway::{GatewayError, GatewayResult, Health, RemoteGateway};
use super::types::{Subtask, SubtaskId, SubtaskPatch, Task, TaskId, TaskPatch};

const TASKS: &str = "todos";
const SUBTASKS: &str = "subtasks";

/// Gateway over the store's PostgREST-style HTTP interface.
#[derive(Clone)]
pub struct RestGateway {
  http: Client,
  base: Url,
}

impl RestGateway {
  /// Build a gateway from configuration, reading the API key from the
  /// environment. Fails fast when the URL or key is missing.
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_key(config, &api_key)
  }

  pub fn with_key(config: &Config, api_key: &str) -> Result<Self> {
    let base = config.remote.rest_base()?;

    let api_key = api_key.trim();
    if api_key.is_empty() {
      return Err(eyre!("Store API key is empty"));
    }

    let mut headers = HeaderMap::new();
    headers.insert(
      "apikey",
      HeaderValue::from_str(api_key).map_err(|e| eyre!("Invalid API key: {}", e))?,
    );
    headers.insert(
      AUTHORIZATION,
      HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|e| eyre!("Invalid API key: {}", e))?,
    );

    let http = Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.remote.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base })
  }

  fn table(&self, name: &str) -> GatewayResult<Url> {
    self
      .base
      .join(name)
      .map_err(|e| GatewayError::Connectivity(format!("bad endpoint for {}: {}", name, e)))
  }

  async fn send(&self, request: RequestBuilder) -> GatewayResult<Response> {
    let response = request
      .send()
      .await
      .map_err(|e| GatewayError::Connectivity(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(GatewayError::Server {
      status: status.as_u16(),
      message,
    })
  }

  async fn rows<T: DeserializeOwned>(&self, request: RequestBuilder) -> GatewayResult<Vec<T>> {
    self
      .send(request)
      .await?
      .json::<Vec<T>>()
      .await
      .map_err(|e| GatewayError::Decode(e.to_string()))
  }

  async fn list_tasks(&self, completed: bool, order: &str) -> GatewayResult<Vec<Task>> {
    let request = self.http.get(self.table(TASKS)?).query(&[
      ("select", TASK_COLUMNS),
      ("completed", if completed { "eq.true" } else { "eq.false" }),
      ("order", order),
    ]);

    let rows: Vec<ApiTask> = self.rows(request).await?;
    Ok(rows.into_iter().map(ApiTask::into_task).collect())
  }

  /// Insert one row and return the stored representation.
  async fn insert<B, T>(&self, table: &str, body: &B) -> GatewayResult<T>
  where
    B: serde::Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let request = self
      .http
      .post(self.table(table)?)
      .header("Prefer", "return=representation")
      .json(body);

    self
      .rows::<T>(request)
      .await?
      .into_iter()
      .next()
      .ok_or(GatewayError::MissingRow("inserted row"))
  }

  async fn patch<B>(&self, table: &str, id: &str, body: &B) -> GatewayResult<()>
  where
    B: serde::Serialize + ?Sized,
  {
    let request = self
      .http
      .patch(self.table(table)?)
      .query(&[("id", format!("eq.{}", id))])
      .json(body);

    self.send(request).await.map(|_| ())
  }

  async fn delete(&self, table: &str, id: &str) -> GatewayResult<()> {
    let request = self
      .http
      .delete(self.table(table)?)
      .query(&[("id", format!("eq.{}", id))]);

    self.send(request).await.map(|_| ())
  }
}

#[async_trait]
impl RemoteGateway for RestGateway {
  async fn test_connectivity(&self) -> Health {
    let url = match self.table(TASKS) {
      Ok(url) => url,
      Err(e) => {
        warn!(error = %e, "connectivity probe could not be built");
        return Health::Unhealthy;
      }
    };

    let request = self.http.get(url).query(&[("select", "id"), ("limit", "1")]);
    match self.send(request).await {
      Ok(_) => Health::Healthy,
      Err(e) => {
        warn!(error = %e, "connectivity probe failed");
        Health::Unhealthy
      }
    }
  }

  async fn list_active_tasks(&self) -> GatewayResult<Vec<Task>> {
    debug!("fetching active tasks");
    self.list_tasks(false, "created_at.desc").await
  }

  async fn list_completed_tasks(&self) -> GatewayResult<Vec<Task>> {
    debug!("fetching completed tasks");
    self.list_tasks(true, "completed_at.desc").await
  }

  async fn list_subtasks(&self, task_id: &TaskId) -> GatewayResult<Vec<Subtask>> {
    debug!(task = %task_id, "fetching subtasks");
    let request = self.http.get(self.table(SUBTASKS)?).query(&[
      ("select", SUBTASK_COLUMNS.to_string()),
      ("todo_id", format!("eq.{}", task_id)),
    ]);

    let rows: Vec<ApiSubtask> = self.rows(request).await?;
    Ok(rows.into_iter().map(ApiSubtask::into_subtask).collect())
  }

  async fn create_task(&self, text: &str, due_date: Option<NaiveDate>) -> GatewayResult<Task> {
    let body = ApiNewTask {
      text,
      date: due_date,
      completed: false,
      important: false,
    };
    let row: ApiTask = self.insert(TASKS, &body).await?;
    Ok(row.into_task())
  }

  async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> GatewayResult<()> {
    self.patch(TASKS, &id.0, &ApiTaskPatch::from(patch)).await
  }

  async fn delete_task(&self, id: &TaskId) -> GatewayResult<()> {
    self.delete(TASKS, &id.0).await
  }

  async fn set_completed(
    &self,
    id: &TaskId,
    completed: bool,
  ) -> GatewayResult<Option<DateTime<Utc>>> {
    let completed_at = completed.then(Utc::now);
    let body = ApiCompletion {
      completed,
      completed_at,
    };
    self.patch(TASKS, &id.0, &body).await?;
    Ok(completed_at)
  }

  async fn create_subtask(&self, task_id: &TaskId, text: &str) -> GatewayResult<Subtask> {
    let body = ApiNewSubtask {
      todo_id: &task_id.0,
      text,
      completed: false,
    };
    let row: ApiSubtask = self.insert(SUBTASKS, &body).await?;
    Ok(row.into_subtask())
  }

  async fn update_subtask(&self, id: &SubtaskId, patch: &SubtaskPatch) -> GatewayResult<()> {
    self.patch(SUBTASKS, &id.0, &ApiSubtaskPatch::from(patch)).await
  }

  async fn delete_subtask(&self, id: &SubtaskId) -> GatewayResult<()> {
    self.delete(SUBTASKS, &id.0).await
  }
}
