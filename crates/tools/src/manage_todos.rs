//! manage_todos: the agent's explicit task breakdown.

use async_trait::async_trait;
use codeloop_core::{
    FieldType, Schema, SharedTodos, TodoDraft, TodoStatus, Tool, ToolEffect, ToolError,
    ValidatedInput,
};
use serde_json::{Value, json};
use tracing::debug;

const ACTIONS: &[&str] = &["add", "list", "update", "pop", "clear"];

pub struct ManageTodosTool {
    todos: SharedTodos,
}

impl ManageTodosTool {
    pub fn new(todos: SharedTodos) -> Self {
        Self { todos }
    }
}

fn item_schema() -> Schema {
    Schema::new()
        .required("content", FieldType::String, "What needs doing")
        .optional("id", FieldType::String, "Unique id; assigned when omitted")
        .optional("status", FieldType::String, "pending, in_progress or completed")
}

fn parse_status(input: &ValidatedInput, field: &str, raw: &str) -> Result<TodoStatus, ToolError> {
    TodoStatus::parse(raw)
        .ok_or_else(|| input.invalid(field, "must be one of pending, in_progress, completed"))
}

#[async_trait]
impl Tool for ManageTodosTool {
    fn name(&self) -> &str {
        "manage_todos"
    }

    fn description(&self) -> &str {
        "Track a multi-step plan. Actions: add (items), list, update (id, status), \
         pop (start the next pending item), clear. Only one item may be in_progress at a time."
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .one_of("action", ACTIONS, "Operation to perform")
            .array_of("items", item_schema(), false, "Items to add (action=add)")
            .optional("id", FieldType::String, "Item id (action=update)")
            .optional("status", FieldType::String, "New status (action=update)")
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("todos", FieldType::Array, "The whole list after the action")
            .required("message", FieldType::String, "What happened")
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::Internal
    }

    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let action = input.require_str("action")?;
        let mut todos = self.todos.lock().await;

        let message = match action {
            "add" => {
                let items = input
                    .array("items")
                    .filter(|items| !items.is_empty())
                    .ok_or_else(|| {
                        input.invalid("items", "must list at least one item for action=add")
                    })?;
                let mut drafts = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let status = match item.get("status").and_then(Value::as_str) {
                        Some(raw) => {
                            let field = format!("items[{i}].status");
                            Some(parse_status(&input, &field, raw)?)
                        }
                        None => None,
                    };
                    drafts.push(TodoDraft {
                        id: item.get("id").and_then(Value::as_str).map(String::from),
                        content: item
                            .get("content")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        status,
                    });
                }
                let added = todos.add_batch(drafts).map_err(|e| e.into_tool_error(self.name()))?;
                format!("Added {} item(s)", added.len())
            }
            "update" => {
                let id = input.require_str("id")?;
                let status = parse_status(&input, "status", input.require_str("status")?)?;
                let item = todos
                    .set_status(id, status)
                    .map_err(|e| e.into_tool_error(self.name()))?;
                format!("Todo {} is now {:?}", item.id, item.status)
            }
            "pop" => match todos
                .pop_first_pending()
                .map_err(|e| e.into_tool_error(self.name()))?
            {
                Some(item) => format!("Started todo {}: {}", item.id, item.content),
                None => "No pending todos".to_string(),
            },
            "clear" => {
                todos.clear();
                "Cleared all todos".to_string()
            }
            _ => {
                if todos.is_empty() {
                    "No todos".to_string()
                } else {
                    todos.render()
                }
            }
        };

        debug!(action, items = todos.list().len(), "Todos updated");
        Ok(json!({
            "todos": todos.list(),
            "message": message,
        }))
    }
}
