use schemars::JsonSchema;

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const EDIT_FILE: &str = "edit_file";
pub const LIST_DIRECTORY: &str = "list_directory";
pub const SEARCH_FILES: &str = "search_files";
pub const RUN_COMMAND: &str = "run_command";
pub const WEB_FETCH: &str = "web_fetch";

#[derive(Debug, JsonSchema)]
pub struct ReadFileParams {
    /// Path of the file to read, absolute or relative to the project root
    pub path: String,
}

#[derive(Debug, JsonSchema)]
pub struct WriteFileParams {
    /// Path of the file to create or overwrite
    pub path: String,
    /// Full new content of the file
    pub content: String,
}

#[derive(Debug, JsonSchema)]
pub struct EditFileParams {
    /// Path of the file to edit
    pub path: String,
    /// Exact text to replace; must occur exactly once, including whitespace
    pub old_text: String,
    /// Replacement text
    pub new_text: String,
}

#[derive(Debug, JsonSchema)]
pub struct ListDirectoryParams {
    /// Directory to list
    pub path: String,
}

#[derive(Debug, JsonSchema)]
pub struct SearchFilesParams {
    /// Regular expression to search for
    pub pattern: String,
    /// File or directory to search recursively
    pub path: String,
}

#[derive(Debug, JsonSchema)]
pub struct RunCommandParams {
    /// Shell command line to execute
    pub command: String,
    /// Directory to run the command in; defaults to the project root
    pub working_directory: Option<String>,
}

#[derive(Debug, JsonSchema)]
pub struct WebFetchParams {
    /// http or https URL to fetch
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ToolDef {
    pub id: &'static str,
    pub description: &'static str,
    pub schema: schemars::Schema,
}

/// Descriptors of every built-in tool, in a stable order.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDef> {
    vec![
        ToolDef {
            id: READ_FILE,
            description: "Read a UTF-8 text file. Binary files and files above the size limit are rejected.",
            schema: schemars::schema_for!(ReadFileParams),
        },
        ToolDef {
            id: WRITE_FILE,
            description: "Create or overwrite a file with the given content. Parent directories are created. Requires user approval.",
            schema: schemars::schema_for!(WriteFileParams),
        },
        ToolDef {
            id: EDIT_FILE,
            description: "Replace one exact occurrence of old_text with new_text in a file. Include enough context for the match to be unique.",
            schema: schemars::schema_for!(EditFileParams),
        },
        ToolDef {
            id: LIST_DIRECTORY,
            description: "List the non-hidden entries of a directory with their sizes.",
            schema: schemars::schema_for!(ListDirectoryParams),
        },
        ToolDef {
            id: SEARCH_FILES,
            description: "Search text files under a path for a regular expression. Returns path:line: text for the first match on each line.",
            schema: schemars::schema_for!(SearchFilesParams),
        },
        ToolDef {
            id: RUN_COMMAND,
            description: "Run a shell command and return its output. Dangerous commands are blocked; others may need user approval.",
            schema: schemars::schema_for!(RunCommandParams),
        },
        ToolDef {
            id: WEB_FETCH,
            description: "Fetch a public http(s) URL and return its content as text. HTML is converted to plain text.",
            schema: schemars::schema_for!(WebFetchParams),
        },
    ]
}

#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    #[must_use]
    pub fn from_definitions(tools: Vec<ToolDef>) -> Self {
        Self { tools }
    }

    /// Registry of the built-in tools.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_definitions(tool_definitions())
    }

    #[must_use]
    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.id == id)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.id).collect()
    }

    /// Function-calling list: `[{"type": "function", "function": {name, description, parameters}}]`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.tools
                .iter()
                .map(|tool| {
                    let mut parameters = tool.schema.as_value().clone();
                    if let Some(obj) = parameters.as_object_mut() {
                        obj.remove("$schema");
                        obj.remove("title");
                    }
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": tool.id,
                            "description": tool.description,
                            "parameters": parameters,
                        }
                    })
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required_of(def: &ToolDef) -> Vec<String> {
        def.schema
            .as_object()
            .and_then(|o| o.get("required"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn builtin_has_seven_tools_in_order() {
        let reg = ToolRegistry::builtin();
        assert_eq!(
            reg.names(),
            vec![
                "read_file",
                "write_file",
                "edit_file",
                "list_directory",
                "search_files",
                "run_command",
                "web_fetch"
            ]
        );
    }

    #[test]
    fn default_registry_is_empty() {
        assert!(ToolRegistry::default().tools().is_empty());
    }

    #[test]
    fn find_existing_and_missing() {
        let reg = ToolRegistry::builtin();
        assert!(reg.find("edit_file").is_some());
        assert!(reg.find("bash").is_none());
    }

    #[test]
    fn required_parameters_match_contract() {
        let reg = ToolRegistry::builtin();
        let mut edit = required_of(reg.find(EDIT_FILE).unwrap());
        edit.sort();
        assert_eq!(edit, vec!["new_text", "old_text", "path"]);
        assert_eq!(required_of(reg.find(RUN_COMMAND).unwrap()), vec!["command"]);
        assert_eq!(required_of(reg.find(WEB_FETCH).unwrap()), vec!["url"]);
    }

    #[test]
    fn to_json_is_function_list() {
        let json = ToolRegistry::builtin().to_json();
        let list = json.as_array().unwrap();
        assert_eq!(list.len(), 7);
        let first = &list[0];
        assert_eq!(first["type"], "function");
        assert_eq!(first["function"]["name"], "read_file");
        let params = &first["function"]["parameters"];
        assert_eq!(params["type"], "object");
        assert!(params.get("$schema").is_none());
        assert!(params["properties"]["path"].is_object());

        let run = &list[5]["function"]["parameters"];
        assert!(run["properties"]["working_directory"].is_object());
        assert_eq!(run["required"], serde_json::json!(["command"]));
    }
}
