//! Memory abilities
//!
//! `add_to_memory` indexes a workspace file or a web page; `read_from_memory`
//! looks a document back up. Both return plain notices rather than errors
//! when there is nothing to do, so the model can correct itself.

use async_trait::async_trait;
use regex::Regex;
use sdk::ability::arg_str_opt;
use sdk::{
    Ability, AbilityArgs, AbilityContext, AbilityError, AbilityOutput, AbilityParameter,
    AbilitySpec,
};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::memory::{MemoryQuery, MemoryStore, Metadata};
use crate::workspace::TaskWorkspace;

/// Longest document returned inline by `read_from_memory`
pub const MAX_OUT_SIZE: usize = 150;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const TOO_LONG: &str = "This document is too long to return here. Use 'read_file' for files or narrow the search with 'qall'.";
const NOTHING_FOUND: &str = "Nothing found in memory";
const NO_ADD_ARGS: &str =
    "No url or file_name arguments passed. Please specify one of the arguments.";
const NO_READ_ARGS: &str = "No arguments found. Please specify one of those arguments";

fn metadata(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

fn markup_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
                .expect("static regex"),
            Regex::new(r"(?s)<[^>]+>").expect("static regex"),
            Regex::new(r"\s+").expect("static regex"),
        ]
    })
}

/// Reduce an HTML page to its visible text
pub fn html_to_text(html: &str) -> String {
    let [blocks, tags, space] = markup_patterns();
    let text = blocks.replace_all(html, " ");
    let text = tags.replace_all(&text, " ");
    space.replace_all(&text, " ").trim().to_string()
}

pub struct AddToMemoryAbility {
    workspace: TaskWorkspace,
    memory: Arc<dyn MemoryStore>,
    http: reqwest::Client,
}

impl AddToMemoryAbility {
    pub fn new(workspace: TaskWorkspace, memory: Arc<dyn MemoryStore>) -> Self {
        Self {
            workspace,
            memory,
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn add_file(&self, ctx: &AbilityContext, file_name: &str) -> Result<String, AbilityError> {
        let path = self
            .workspace
            .resolve(&ctx.task_id, file_name)
            .map_err(|e| AbilityError::InvalidArgument(e.to_string()))?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| AbilityError::Execution(format!("Failed to read file: {}", e)))?;
        let content = String::from_utf8_lossy(&bytes);

        self.memory
            .add(
                &ctx.task_id,
                &content,
                metadata(&[("filename", file_name), ("type", "file")]),
            )
            .await
            .map_err(|e| AbilityError::Execution(format!("Failed to store document: {}", e)))?;

        info!("Added file '{}' to memory for task {}", file_name, ctx.task_id);
        Ok(format!("File {} added to memory", file_name))
    }

    async fn add_url(&self, ctx: &AbilityContext, url: &str) -> Result<String, AbilityError> {
        debug!("Fetching {} for task {}", url, ctx.task_id);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AbilityError::Execution(format!("Failed to fetch {}: {}", url, e)))?;
        let html = response
            .text()
            .await
            .map_err(|e| AbilityError::Execution(format!("Failed to read {}: {}", url, e)))?;

        self.memory
            .add(
                &ctx.task_id,
                &html_to_text(&html),
                metadata(&[("url", url), ("type", "website")]),
            )
            .await
            .map_err(|e| AbilityError::Execution(format!("Failed to store document: {}", e)))?;

        info!("Added url '{}' to memory for task {}", url, ctx.task_id);
        Ok(format!("Added {} to memory", url))
    }
}

#[async_trait]
impl Ability for AddToMemoryAbility {
    fn spec(&self) -> AbilitySpec {
        AbilitySpec::new(
            "add_to_memory",
            "Store a workspace file or a web page in long-term memory",
        )
        .with_param(AbilityParameter::optional(
            "file_name",
            "string",
            "Workspace file to store",
        ))
        .with_param(AbilityParameter::optional(
            "url",
            "string",
            "Web page to fetch and store",
        ))
        .returns("string")
    }

    async fn run(
        &self,
        ctx: &AbilityContext,
        args: &AbilityArgs,
    ) -> Result<AbilityOutput, AbilityError> {
        let notice = if let Some(file_name) = arg_str_opt(args, "file_name") {
            self.add_file(ctx, file_name).await?
        } else if let Some(url) = arg_str_opt(args, "url") {
            self.add_url(ctx, url).await?
        } else {
            NO_ADD_ARGS.to_string()
        };
        Ok(AbilityOutput::Text(notice))
    }
}

pub struct ReadFromMemoryAbility {
    memory: Arc<dyn MemoryStore>,
}

impl ReadFromMemoryAbility {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self { memory }
    }

    /// First present argument decides the lookup
    fn query_for(args: &AbilityArgs) -> Option<MemoryQuery> {
        if let Some(name) = arg_str_opt(args, "file_name") {
            Some(MemoryQuery::field("filename", name))
        } else if let Some(url) = arg_str_opt(args, "url") {
            Some(MemoryQuery::field("url", url))
        } else if let Some(role) = arg_str_opt(args, "chat_role") {
            Some(MemoryQuery::field("role", role))
        } else if let Some(id) = arg_str_opt(args, "doc_id") {
            Some(MemoryQuery::Id(id.to_string()))
        } else {
            arg_str_opt(args, "qall").map(|q| MemoryQuery::Text(q.to_string()))
        }
    }
}

#[async_trait]
impl Ability for ReadFromMemoryAbility {
    fn spec(&self) -> AbilitySpec {
        AbilitySpec::new(
            "read_from_memory",
            "Look up a stored document by file name, url, chat role, document id or free text",
        )
        .with_param(AbilityParameter::optional("file_name", "string", "Stored file name"))
        .with_param(AbilityParameter::optional("url", "string", "Stored url"))
        .with_param(AbilityParameter::optional(
            "chat_role",
            "string",
            "Role of a stored chat message",
        ))
        .with_param(AbilityParameter::optional("doc_id", "string", "Document id"))
        .with_param(AbilityParameter::optional(
            "qall",
            "string",
            "Free-text search across everything stored",
        ))
        .returns("string")
    }

    async fn run(
        &self,
        ctx: &AbilityContext,
        args: &AbilityArgs,
    ) -> Result<AbilityOutput, AbilityError> {
        let Some(query) = Self::query_for(args) else {
            return Ok(AbilityOutput::text(NO_READ_ARGS));
        };

        let documents = self
            .memory
            .query(&ctx.task_id, &query)
            .await
            .map_err(|e| AbilityError::Execution(format!("Memory lookup failed: {}", e)))?;

        let notice = match documents.first() {
            None => NOTHING_FOUND.to_string(),
            Some(doc) if doc.content.chars().count() > MAX_OUT_SIZE => TOO_LONG.to_string(),
            Some(doc) => doc.content.clone(),
        };
        Ok(AbilityOutput::Text(notice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _temp: TempDir,
        ctx: AbilityContext,
        add: AddToMemoryAbility,
        read: ReadFromMemoryAbility,
    }

    async fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let workspace = TaskWorkspace::new(temp.path());
        let dir = workspace.ensure("t1").await.unwrap();
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        Fixture {
            ctx: AbilityContext::new("t1", dir),
            add: AddToMemoryAbility::new(workspace, Arc::clone(&memory)),
            read: ReadFromMemoryAbility::new(memory),
            _temp: temp,
        }
    }

    fn args(value: Value) -> AbilityArgs {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_add_file_then_read_by_name() {
        let f = fixture().await;
        std::fs::write(f.ctx.workspace.join("notes.txt"), "the answer is 42").unwrap();

        let out = f
            .add
            .run(&f.ctx, &args(json!({"file_name": "notes.txt"})))
            .await
            .unwrap();
        assert_eq!(out.into_text(), "File notes.txt added to memory");

        let out = f
            .read
            .run(&f.ctx, &args(json!({"file_name": "notes.txt"})))
            .await
            .unwrap();
        assert_eq!(out.into_text(), "the answer is 42");
    }

    #[tokio::test]
    async fn test_long_document_not_returned() {
        let f = fixture().await;
        std::fs::write(f.ctx.workspace.join("big.txt"), "x".repeat(MAX_OUT_SIZE + 1)).unwrap();
        f.add
            .run(&f.ctx, &args(json!({"file_name": "big.txt"})))
            .await
            .unwrap();

        let out = f
            .read
            .run(&f.ctx, &args(json!({"file_name": "big.txt"})))
            .await
            .unwrap();
        assert_eq!(out.into_text(), TOO_LONG);
    }

    #[tokio::test]
    async fn test_read_notices() {
        let f = fixture().await;
        let out = f.read.run(&f.ctx, &AbilityArgs::new()).await.unwrap();
        assert_eq!(out.into_text(), NO_READ_ARGS);

        let out = f
            .read
            .run(&f.ctx, &args(json!({"qall": "anything"})))
            .await
            .unwrap();
        assert_eq!(out.into_text(), NOTHING_FOUND);

        let out = f.add.run(&f.ctx, &AbilityArgs::new()).await.unwrap();
        assert_eq!(out.into_text(), NO_ADD_ARGS);
    }

    #[tokio::test]
    async fn test_add_url_strips_markup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><head><style>p{}</style></head><body><p>Rust  is</p> fast</body></html>",
            ))
            .mount(&server)
            .await;

        let f = fixture().await;
        let url = format!("{}/page", server.uri());
        let out = f.add.run(&f.ctx, &args(json!({"url": url}))).await.unwrap();
        assert_eq!(out.into_text(), format!("Added {} to memory", url));

        let out = f.read.run(&f.ctx, &args(json!({"url": url}))).await.unwrap();
        assert_eq!(out.into_text(), "Rust is fast");
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<script>var x = 1;</script><h1>Title</h1>\n<p>Body</p>"),
            "Title Body"
        );
    }
}
