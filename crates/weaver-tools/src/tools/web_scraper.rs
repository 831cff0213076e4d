//! Web scraper capability backed by the Firecrawl API

use crate::registry::{Capability, ExecutionError};
use futures::future::join_all;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, warn};

const FIRECRAWL_DEFAULT_URL: &str = "https://api.firecrawl.dev";

pub struct WebScraperCapability {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl WebScraperCapability {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        if api_key.is_none() {
            warn!("FIRECRAWL_API_KEY is not configured; web_scraper will report an error when invoked");
        }
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| FIRECRAWL_DEFAULT_URL.to_string()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("FIRECRAWL_API_KEY").ok(),
            std::env::var("FIRECRAWL_URL").ok(),
        )
    }

    async fn scrape_one(&self, api_key: &str, url: &str, include_html: bool) -> Value {
        let mut formats = vec!["markdown"];
        if include_html {
            formats.push("html");
        }
        let payload = json!({ "url": url, "formats": formats });

        let result = async {
            let response = self
                .client
                .post(format!("{}/v1/scrape", self.base_url))
                .bearer_auth(api_key)
                .timeout(Duration::from_secs(30))
                .json(&payload)
                .send()
                .await?
                .error_for_status()?;
            response.json::<Value>().await
        }
        .await;

        match result {
            Ok(data) => {
                let mut entry = json!({
                    "url": url,
                    "title": data["data"]["metadata"]["title"].as_str().unwrap_or(""),
                    "content": data["data"]["markdown"].as_str().unwrap_or(""),
                });
                if include_html {
                    entry["html"] = data["data"]["html"].clone();
                }
                entry
            }
            Err(e) => {
                error!("Error scraping URL {}: {}", url, e);
                json!({ "url": url, "error": e.to_string() })
            }
        }
    }
}

#[async_trait::async_trait]
impl Capability for WebScraperCapability {
    fn name(&self) -> &str {
        "web_scraper"
    }

    fn description(&self) -> &str {
        "Extracts the content from a list of web pages."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "urls": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "A list of URLs to scrape"
                },
                "include_html": {
                    "type": "boolean",
                    "description": "Whether to include the raw HTML in the output",
                    "default": false
                }
            },
            "required": ["urls"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ExecutionError> {
        let api_key = match &self.api_key {
            Some(k) => k.clone(),
            None => return Ok(json!({ "error": "Firecrawl API key not configured." })),
        };

        let urls: Vec<&str> = args["urls"]
            .as_array()
            .map(|a| a.iter().filter_map(|u| u.as_str()).collect())
            .unwrap_or_default();
        if urls.is_empty() {
            return Ok(json!({ "error": "At least one URL is required." }));
        }

        let include_html = args["include_html"].as_bool().unwrap_or(false);

        let tasks = urls
            .iter()
            .map(|url| self.scrape_one(&api_key, url, include_html));
        let results: Vec<Value> = join_all(tasks).await;
        Ok(json!({ "status": "success", "scraped_content": results }))
    }
}
