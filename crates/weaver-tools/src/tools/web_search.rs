//! Web search capability backed by the Tavily API

use crate::registry::{Capability, ExecutionError};
use futures::future::join_all;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{error, warn};

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

pub struct WebSearchCapability {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl WebSearchCapability {
    pub fn new(api_key: Option<String>) -> Self {
        if api_key.is_none() {
            warn!("TAVILY_API_KEY is not configured; web_search will report an error when invoked");
        }
        Self {
            client: Client::new(),
            api_key,
            base_url: TAVILY_API_URL.to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("TAVILY_API_KEY").ok())
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn search_one(&self, api_key: &str, query: &str, num_results: u64) -> Value {
        let body = json!({
            "api_key": api_key,
            "query": query,
            "max_results": num_results,
            "include_images": true,
            "include_answer": true,
            "search_depth": "advanced",
        });

        let result = async {
            let response = self
                .client
                .post(&self.base_url)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            response.json::<Value>().await
        }
        .await;

        match result {
            Ok(v) => v,
            Err(e) => {
                error!("Error during search for query '{}': {}", query, e);
                json!({ "query": query, "error": e.to_string() })
            }
        }
    }
}

#[async_trait::async_trait]
impl Capability for WebSearchCapability {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for up-to-date information. Supports single or multiple queries for concurrent searching."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "description": "A single search query or a list of queries to execute concurrently",
                    "anyOf": [
                        { "type": "string" },
                        { "type": "array", "items": { "type": "string" } }
                    ]
                },
                "num_results": {
                    "type": "integer",
                    "description": "The number of search results to return per query",
                    "default": 10
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ExecutionError> {
        let api_key = match &self.api_key {
            Some(k) => k.clone(),
            None => return Ok(json!({ "error": "Tavily API key not configured." })),
        };

        let num_results = args["num_results"].as_u64().unwrap_or(10);

        match args.get("query") {
            Some(Value::String(query)) => Ok(self.search_one(&api_key, query, num_results).await),
            Some(Value::Array(queries)) => {
                let queries: Vec<&str> = queries.iter().filter_map(|q| q.as_str()).collect();
                if queries.is_empty() {
                    return Ok(json!({
                        "error": "At least one search query is required for batch search."
                    }));
                }
                let tasks = queries
                    .iter()
                    .map(|q| self.search_one(&api_key, q, num_results));
                let results: Vec<Value> = join_all(tasks).await;
                Ok(json!({ "status": "success", "results": results }))
            }
            _ => Err(ExecutionError::new("Missing required parameter: query")),
        }
    }
}
