//! 工具参数类型与 JSON Schema 生成（schemars）
//!
//! 每个工具的参数都是带 `deny_unknown_fields` 的强类型结构体：Schema 由同一类型导出给模型，
//! 调用时也由同一类型校验，二者不会漂移。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// run_shell_command 参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RunShellCommandArgs {
    /// Shell command to run inside the sandbox, e.g. `npm install lucide-react --yes`
    pub command: String,
}

/// 单个待写入文件
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FileEntry {
    /// Relative path (e.g. `app/page.tsx`) or absolute path under /home/user
    pub path: String,
    /// Full file content
    pub content: String,
}

/// write_files 参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WriteFilesArgs {
    /// Files to create or overwrite, written in order
    pub files: Vec<FileEntry>,
}

/// read_files 参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReadFilesArgs {
    /// Paths of files to read
    pub files: Vec<String>,
}

/// clone_template 参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CloneTemplateArgs {
    /// GitHub repository URL to clone
    pub github_url: String,
    /// Optional project name, defaults to `vibe-project`
    #[serde(default)]
    pub project_name: Option<String>,
}

/// 生成内联（无 $ref）的参数 Schema，去掉模型不需要的顶层元信息
pub fn parameters_for<T: JsonSchema>() -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
    });
    let schema = settings.into_generator().into_root_schema_for::<T>();
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.remove("definitions");
    }
    value
}

/// 按参数类型解析并校验；错误文本直接返回给模型
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments for {tool}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_files_schema_is_inline() {
        let schema = parameters_for::<WriteFilesArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        let items = &schema["properties"]["files"]["items"];
        assert!(items["properties"].get("path").is_some());
        assert!(items["properties"].get("content").is_some());
        assert!(schema.to_string().find("$ref").is_none());
    }

    #[test]
    fn test_parse_args_rejects_unknown_and_missing_fields() {
        let err = parse_args::<RunShellCommandArgs>(
            "run_shell_command",
            serde_json::json!({"command": "ls", "cwd": "/"}),
        )
        .unwrap_err();
        assert!(err.starts_with("Invalid arguments for run_shell_command"));

        let err = parse_args::<WriteFilesArgs>("write_files", serde_json::json!({})).unwrap_err();
        assert!(err.contains("files"));
    }

    #[test]
    fn test_clone_template_project_name_optional() {
        let args: CloneTemplateArgs = parse_args(
            "clone_template",
            serde_json::json!({"github_url": "https://github.com/a/b"}),
        )
        .unwrap();
        assert_eq!(args.github_url, "https://github.com/a/b");
        assert!(args.project_name.is_none());
    }
}
