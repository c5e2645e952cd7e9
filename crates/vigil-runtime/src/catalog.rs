//! Browser tool catalog.
//!
//! The fixed set of tools the automation subprocess implements, with the
//! JSON-schema parameters advertised to the model.

use serde_json::json;
use vigil_core::constants::{SCREENSHOT_TOOL, SNAPSHOT_TOOL};
use vigil_core::tools::{ToolDefinition, ToolParameterSchema};

/// Bookkeeping argument the batch protocol adds to every tool call.
/// Stripped before dispatch.
pub const STEP_NUMBER_FIELD: &str = "step_number";

/// One browser tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BrowserTool {
    /// Open a URL.
    Navigate,
    /// Capture the accessibility snapshot of the page.
    Snapshot,
    /// Click an element.
    Click,
    /// Type into an element.
    Type,
    /// Choose options in a select element.
    SelectOption,
    /// Press a keyboard key.
    PressKey,
    /// Wait for time or text.
    WaitFor,
    /// Capture a screenshot.
    TakeScreenshot,
    /// Go back in history.
    NavigateBack,
}

impl BrowserTool {
    /// Every tool, in catalog order.
    pub const ALL: [Self; 9] = [
        Self::Navigate,
        Self::Snapshot,
        Self::Click,
        Self::Type,
        Self::SelectOption,
        Self::PressKey,
        Self::WaitFor,
        Self::TakeScreenshot,
        Self::NavigateBack,
    ];

    /// Wire name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Snapshot => SNAPSHOT_TOOL,
            Self::Click => "click",
            Self::Type => "type",
            Self::SelectOption => "select_option",
            Self::PressKey => "press_key",
            Self::WaitFor => "wait_for",
            Self::TakeScreenshot => SCREENSHOT_TOOL,
            Self::NavigateBack => "navigate_back",
        }
    }

    /// Look up a tool by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Whether a successful call may change what the page shows.
    #[must_use]
    pub fn changes_state(self) -> bool {
        matches!(
            self,
            Self::Navigate
                | Self::Click
                | Self::Type
                | Self::SelectOption
                | Self::PressKey
                | Self::NavigateBack
        )
    }

    /// Definition advertised to the model.
    #[must_use]
    pub fn definition(self) -> ToolDefinition {
        let element = json!({
            "type": "string",
            "description": "Human-readable element description used to obtain permission to interact with the element"
        });
        let reference = json!({
            "type": "string",
            "description": "Exact target element reference from the page snapshot"
        });
        let (description, parameters) = match self {
            Self::Navigate => (
                "Navigate to a URL",
                ToolParameterSchema::empty().property(
                    "url",
                    json!({"type": "string", "description": "The URL to navigate to"}),
                    true,
                ),
            ),
            Self::Snapshot => (
                "Capture an accessibility snapshot of the current page. Use it to find element references",
                ToolParameterSchema::empty(),
            ),
            Self::Click => (
                "Click an element on the page",
                ToolParameterSchema::empty()
                    .property("element", element, true)
                    .property("ref", reference, true),
            ),
            Self::Type => (
                "Type text into an editable element",
                ToolParameterSchema::empty()
                    .property("element", element, true)
                    .property("ref", reference, true)
                    .property("text", json!({"type": "string", "description": "Text to type"}), true)
                    .property(
                        "submit",
                        json!({"type": "boolean", "description": "Press Enter after typing"}),
                        false,
                    ),
            ),
            Self::SelectOption => (
                "Select one or more options in a dropdown",
                ToolParameterSchema::empty()
                    .property("element", element, true)
                    .property("ref", reference, true)
                    .property(
                        "values",
                        json!({"type": "array", "items": {"type": "string"}, "description": "Values to select"}),
                        true,
                    ),
            ),
            Self::PressKey => (
                "Press a key on the keyboard",
                ToolParameterSchema::empty().property(
                    "key",
                    json!({"type": "string", "description": "Key name such as `ArrowLeft`, `Enter` or a character"}),
                    true,
                ),
            ),
            Self::WaitFor => (
                "Wait for text to appear or for a number of seconds to pass",
                ToolParameterSchema::empty()
                    .property("time", json!({"type": "number", "description": "Seconds to wait"}), false)
                    .property("text", json!({"type": "string", "description": "Text to wait for"}), false),
            ),
            Self::TakeScreenshot => (
                "Take a screenshot of the current page",
                ToolParameterSchema::empty().property(
                    "filename",
                    json!({"type": "string", "description": "File name to save the screenshot to"}),
                    false,
                ),
            ),
            Self::NavigateBack => ("Go back to the previous page", ToolParameterSchema::empty()),
        };
        ToolDefinition {
            name: self.name().to_owned(),
            description: description.to_owned(),
            parameters,
        }
    }
}

/// The tool list offered on a model call.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCatalog {
    tools: Vec<ToolDefinition>,
}

impl ToolCatalog {
    /// Every browser tool.
    #[must_use]
    pub fn full() -> Self {
        Self {
            tools: BrowserTool::ALL.into_iter().map(BrowserTool::definition).collect(),
        }
    }

    /// This catalog minus the snapshot tool. Used when the caller
    /// supplies page state itself.
    #[must_use]
    pub fn without_snapshot(&self) -> Self {
        self.clone().without(SNAPSHOT_TOOL)
    }

    /// Batch variant of this catalog: no snapshot tool, and every schema
    /// requires [`STEP_NUMBER_FIELD`].
    #[must_use]
    pub fn for_batch(&self) -> Self {
        self.without_snapshot().with_step_numbers()
    }

    /// Drop the tool named `name`.
    #[must_use]
    pub fn without(mut self, name: &str) -> Self {
        self.tools.retain(|t| t.name != name);
        self
    }

    /// Add the required step-number field to every schema.
    #[must_use]
    pub fn with_step_numbers(mut self) -> Self {
        for tool in &mut self.tools {
            let params = std::mem::replace(&mut tool.parameters, ToolParameterSchema::empty());
            tool.parameters = params.property(
                STEP_NUMBER_FIELD,
                json!({"type": "integer", "description": "Number of the plan step this call belongs to"}),
                true,
            );
        }
        self
    }

    /// Definitions in catalog order.
    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Whether the catalog offers `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// Tool names in catalog order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Number of tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::full()
    }
}
