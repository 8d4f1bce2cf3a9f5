//! Client for the local task server: job polling, chunk relay, result
//! reporting. Chunk and result delivery is best-effort; transport failures
//! are logged and never retried.

use std::sync::Arc;

use async_trait::async_trait;
use relay::{ChunkSink, Job, JobOutcome, TaskServer};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct JobEnvelope {
	status: String,
	#[serde(default)]
	job: Option<JobPayload>,
}

#[derive(Debug, Deserialize)]
struct JobPayload {
	task_id: String,
	prompt: String,
}

#[derive(Debug, Serialize)]
struct ChunkBody {
	task_id: String,
	chunk: String,
}

#[derive(Debug, Serialize)]
struct ReportBody<'a> {
	task_id: &'a str,
	status: &'a str,
	content: &'a str,
}

pub struct TaskServerClient {
	http: reqwest::Client,
	base: String,
}

impl TaskServerClient {
	pub fn new(base: impl Into<String>) -> Self {
		Self { http: reqwest::Client::new(), base: base.into() }
	}
}

#[async_trait]
impl TaskServer for TaskServerClient {
	async fn next_job(&self) -> Option<Job> {
		let url = format!("{}/get_prompt_job", self.base);
		let response = match self.http.get(&url).send().await {
			Ok(response) => response,
			Err(err) => {
				warn!(target = "relay.server", error = %err, "job poll failed");
				return None;
			}
		};
		let envelope: JobEnvelope = match response.json().await {
			Ok(envelope) => envelope,
			Err(err) => {
				warn!(target = "relay.server", error = %err, "job poll returned malformed body");
				return None;
			}
		};
		if envelope.status != "success" {
			return None;
		}
		envelope.job.map(|payload| Job { task_id: payload.task_id, prompt: payload.prompt })
	}

	async fn report(&self, task_id: &str, outcome: JobOutcome) {
		let (status, content) = match &outcome {
			JobOutcome::Completed(text) => ("completed", text.as_str()),
			JobOutcome::Failed(cause) => ("failed", cause.as_str()),
		};
		let url = format!("{}/report_result", self.base);
		let body = ReportBody { task_id, status, content };
		match self.http.post(&url).json(&body).send().await {
			Ok(_) => debug!(target = "relay.server", %task_id, status, "result reported"),
			Err(err) => warn!(target = "relay.server", %task_id, error = %err, "result report failed"),
		}
	}

	fn chunk_sink(&self, task_id: &str) -> Arc<dyn ChunkSink> {
		Arc::new(ChunkRelay {
			http: self.http.clone(),
			url: format!("{}/stream_chunk", self.base),
			task_id: task_id.to_string(),
		})
	}
}

/// Fire-and-forget relay of stream chunks for one task.
pub struct ChunkRelay {
	http: reqwest::Client,
	url: String,
	task_id: String,
}

impl ChunkSink for ChunkRelay {
	fn deliver(&self, chunk: &str) {
		let http = self.http.clone();
		let url = self.url.clone();
		let body = ChunkBody { task_id: self.task_id.clone(), chunk: chunk.to_string() };
		tokio::spawn(async move {
			if let Err(err) = http.post(&url).json(&body).send().await {
				warn!(target = "relay.server", task_id = %body.task_id, error = %err, "chunk relay failed");
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn job_envelope_parses_the_server_wire_shape() {
		let envelope: JobEnvelope =
			serde_json::from_str(r#"{"status":"success","job":{"task_id":"t-9","prompt":"hi"}}"#).expect("parse");
		assert_eq!(envelope.status, "success");
		let job = envelope.job.expect("job");
		assert_eq!(job.task_id, "t-9");
		assert_eq!(job.prompt, "hi");
	}

	#[test]
	fn job_envelope_tolerates_an_idle_server() {
		let envelope: JobEnvelope = serde_json::from_str(r#"{"status":"empty"}"#).expect("parse");
		assert_eq!(envelope.status, "empty");
		assert!(envelope.job.is_none());
	}

	#[test]
	fn chunk_body_serializes_the_expected_fields() {
		let body = ChunkBody { task_id: "t-1".to_string(), chunk: "partial text".to_string() };
		let value = serde_json::to_value(&body).expect("serialize");
		assert_eq!(value["task_id"], "t-1");
		assert_eq!(value["chunk"], "partial text");
	}

	#[test]
	fn report_body_serializes_the_expected_fields() {
		let body = serde_json::to_value(ReportBody { task_id: "t-1", status: "completed", content: "text" })
			.expect("serialize");
		assert_eq!(body["task_id"], "t-1");
		assert_eq!(body["status"], "completed");
		assert_eq!(body["content"], "text");
	}
}
