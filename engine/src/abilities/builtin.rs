//! Workspace file abilities and `finish`

use async_trait::async_trait;
use sdk::ability::{arg_str, arg_str_opt};
use sdk::{
    Ability, AbilityArgs, AbilityContext, AbilityError, AbilityOutput, AbilityParameter,
    AbilitySpec,
};
use tokio::fs;
use tracing::info;

use crate::workspace::TaskWorkspace;

fn resolve(
    workspace: &TaskWorkspace,
    ctx: &AbilityContext,
    path: &str,
) -> Result<std::path::PathBuf, AbilityError> {
    workspace
        .resolve(&ctx.task_id, path)
        .map_err(|e| AbilityError::InvalidArgument(e.to_string()))
}

/// Ends the task; the loop treats a successful run as the last step
pub struct FinishAbility;

#[async_trait]
impl Ability for FinishAbility {
    fn spec(&self) -> AbilitySpec {
        AbilitySpec::new(
            super::FINISH,
            "Use this to shut down once you have accomplished all of your goals, or when there are insurmountable problems that make it impossible for you to finish your task.",
        )
        .with_param(AbilityParameter::optional(
            "reason",
            "string",
            "A summary to the user of how the goals were accomplished",
        ))
    }

    async fn run(
        &self,
        ctx: &AbilityContext,
        args: &AbilityArgs,
    ) -> Result<AbilityOutput, AbilityError> {
        let reason = arg_str_opt(args, "reason").unwrap_or("Task finished");
        info!("Task {} finished: {}", ctx.task_id, reason);
        Ok(AbilityOutput::text(reason))
    }
}

pub struct ReadFileAbility {
    workspace: TaskWorkspace,
}

impl ReadFileAbility {
    pub fn new(workspace: TaskWorkspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Ability for ReadFileAbility {
    fn spec(&self) -> AbilitySpec {
        AbilitySpec::new("read_file", "Read a file from the task workspace")
            .with_param(AbilityParameter::required(
                "file_name",
                "string",
                "Name of the file, relative to the workspace",
            ))
            .returns("bytes")
    }

    async fn run(
        &self,
        ctx: &AbilityContext,
        args: &AbilityArgs,
    ) -> Result<AbilityOutput, AbilityError> {
        let path = resolve(&self.workspace, ctx, arg_str(args, "file_name")?)?;
        let bytes = fs::read(&path)
            .await
            .map_err(|e| AbilityError::Execution(format!("Failed to read file: {}", e)))?;
        Ok(AbilityOutput::Bytes(bytes))
    }
}

pub struct WriteFileAbility {
    workspace: TaskWorkspace,
}

impl WriteFileAbility {
    pub fn new(workspace: TaskWorkspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Ability for WriteFileAbility {
    fn spec(&self) -> AbilitySpec {
        AbilitySpec::new("write_file", "Write data to a file in the task workspace")
            .with_param(AbilityParameter::required(
                "file_name",
                "string",
                "Name of the file, relative to the workspace",
            ))
            .with_param(AbilityParameter::required(
                "data",
                "string",
                "Text to write",
            ))
    }

    async fn run(
        &self,
        ctx: &AbilityContext,
        args: &AbilityArgs,
    ) -> Result<AbilityOutput, AbilityError> {
        let file_name = arg_str(args, "file_name")?;
        let data = arg_str(args, "data")?;
        let path = resolve(&self.workspace, ctx, file_name)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data)
            .await
            .map_err(|e| AbilityError::Execution(format!("Failed to write file: {}", e)))?;

        Ok(AbilityOutput::Empty)
    }
}

pub struct ListFilesAbility {
    workspace: TaskWorkspace,
}

impl ListFilesAbility {
    pub fn new(workspace: TaskWorkspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Ability for ListFilesAbility {
    fn spec(&self) -> AbilitySpec {
        AbilitySpec::new("list_files", "List the files in a workspace directory")
            .with_param(AbilityParameter::optional(
                "path",
                "string",
                "Directory relative to the workspace; defaults to its root",
            ))
            .returns("string")
    }

    async fn run(
        &self,
        ctx: &AbilityContext,
        args: &AbilityArgs,
    ) -> Result<AbilityOutput, AbilityError> {
        let dir = resolve(&self.workspace, ctx, arg_str_opt(args, "path").unwrap_or("."))?;

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| AbilityError::Execution(format!("Failed to list directory: {}", e)))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        Ok(AbilityOutput::Text(names.join(",")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, TaskWorkspace, AbilityContext) {
        let temp = TempDir::new().unwrap();
        let workspace = TaskWorkspace::new(temp.path());
        let dir = workspace.ensure("t1").await.unwrap();
        (temp, workspace, AbilityContext::new("t1", dir))
    }

    fn args(value: serde_json::Value) -> AbilityArgs {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_temp, workspace, ctx) = setup().await;
        let write = WriteFileAbility::new(workspace.clone());
        let read = ReadFileAbility::new(workspace);

        let out = write
            .run(&ctx, &args(json!({"file_name": "out/report.txt", "data": "42"})))
            .await
            .unwrap();
        assert_eq!(out, AbilityOutput::Empty);

        let out = read
            .run(&ctx, &args(json!({"file_name": "out/report.txt"})))
            .await
            .unwrap();
        assert_eq!(out.into_text(), "42");
    }

    #[tokio::test]
    async fn test_list_files_sorted() {
        let (_temp, workspace, ctx) = setup().await;
        std::fs::write(ctx.workspace.join("b.txt"), "").unwrap();
        std::fs::write(ctx.workspace.join("a.txt"), "").unwrap();
        std::fs::create_dir(ctx.workspace.join("docs")).unwrap();

        let out = ListFilesAbility::new(workspace)
            .run(&ctx, &AbilityArgs::new())
            .await
            .unwrap();
        assert_eq!(out.into_text(), "a.txt,b.txt,docs/");
    }

    #[tokio::test]
    async fn test_read_missing_argument() {
        let (_temp, workspace, ctx) = setup().await;
        let err = ReadFileAbility::new(workspace)
            .run(&ctx, &AbilityArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AbilityError::MissingArgument(key) if key == "file_name"));
    }

    #[tokio::test]
    async fn test_read_outside_workspace_rejected() {
        let (_temp, workspace, ctx) = setup().await;
        let err = ReadFileAbility::new(workspace)
            .run(&ctx, &args(json!({"file_name": "../../etc/passwd"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AbilityError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_finish_echoes_reason() {
        let (_temp, _workspace, ctx) = setup().await;
        let out = FinishAbility
            .run(&ctx, &args(json!({"reason": "all done"})))
            .await
            .unwrap();
        assert_eq!(out.into_text(), "all done");
    }
}
