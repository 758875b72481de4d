//! File toolkit, scoped to a base directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::fs;

use crate::error::{AgentError, Result};
use crate::tool::{Tool, Toolkit};

pub fn files_toolkit(base_dir: impl Into<PathBuf>) -> Toolkit {
    let base_dir = base_dir.into();
    let mut toolkit = Toolkit::new("files");
    toolkit.register(ReadFileTool {
        base_dir: base_dir.clone(),
    });
    toolkit.register(SaveFileTool {
        base_dir: base_dir.clone(),
    });
    toolkit.register(ListFilesTool { base_dir });
    toolkit
}

/// Rejects traversal outside the base directory.
fn resolve(base_dir: &Path, name: &str) -> Result<PathBuf> {
    if name.contains("..") || name.starts_with('/') {
        return Err(AgentError::Run(format!("path `{name}` escapes the base directory")));
    }
    Ok(base_dir.join(name))
}

fn name_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"file_name": {"type": "string"}},
        "required": ["file_name"]
    })
}

fn get_str<'a>(input: &'a Value, field: &str, tool_name: &str) -> Result<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::Run(format!("missing `{field}` for {tool_name}")))
}

struct ReadFileTool {
    base_dir: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the working directory."
    }

    fn parameters(&self) -> Option<Value> {
        Some(name_schema())
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let name = get_str(&input, "file_name", "read_file")?;
        let path = resolve(&self.base_dir, name)?;
        let contents = fs::read_to_string(&path).await?;
        Ok(json!({"file_name": name, "contents": contents}))
    }
}

struct SaveFileTool {
    base_dir: PathBuf,
}

#[async_trait]
impl Tool for SaveFileTool {
    fn name(&self) -> &str {
        "save_file"
    }

    fn description(&self) -> &str {
        "Write text to a file in the working directory, creating it if needed."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "file_name": {"type": "string"},
                "contents": {"type": "string"}
            },
            "required": ["file_name", "contents"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let name = get_str(&input, "file_name", "save_file")?;
        let contents = get_str(&input, "contents", "save_file")?;
        let path = resolve(&self.base_dir, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, contents).await?;
        Ok(json!({"file_name": name, "saved": true}))
    }
}

struct ListFilesTool {
    base_dir: PathBuf,
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the files in the working directory."
    }

    async fn call(&self, _input: Value) -> Result<Value> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(json!({"files": names}))
    }
}
