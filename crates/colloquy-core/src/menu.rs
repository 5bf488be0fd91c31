//! Menu - button layouts, pagination cursor and the builder seam.
//!
//! A menu is either a static layout or a [`MenuBuilder`] that is re-invoked on
//! every render. Builders receive a [`MenuControl`] through which they (or
//! their button handlers) settle the enclosing suspension.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::ConversationError;
use crate::message::KeyboardButton;

/// A button of a rendered menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    /// Callback data; unique within one menu instance
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub hidden: bool,
    /// Occupies a whole row
    #[serde(default)]
    pub full_width: bool,
    /// Value a static layout resolves with when pressed
    #[serde(default)]
    pub value: Option<Value>,
}

impl Button {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            hidden: false,
            full_width: false,
            value: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn full_width(mut self) -> Self {
        self.full_width = true;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }
}

/// A rendered menu: message text plus buttons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Menu {
    pub text: String,
    pub buttons: Vec<Button>,
}

impl Menu {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn button(mut self, button: Button) -> Self {
        self.buttons.push(button);
        self
    }

    pub fn find(&self, id: &str) -> Option<&Button> {
        self.buttons.iter().find(|b| b.id == id)
    }

    pub fn visible(&self) -> impl Iterator<Item = &Button> {
        self.buttons.iter().filter(|b| !b.hidden)
    }

    /// Keyboard rows: full-width buttons get their own row, the rest share one.
    pub fn keyboard(&self) -> Vec<Vec<KeyboardButton>> {
        let mut rows = Vec::new();
        let mut shared = Vec::new();
        for button in self.visible() {
            let key = KeyboardButton {
                id: button.id.clone(),
                text: button.text.clone(),
            };
            if button.full_width {
                rows.push(vec![key]);
            } else {
                shared.push(key);
            }
        }
        if !shared.is_empty() {
            rows.push(shared);
        }
        rows
    }
}

/// What a button press does to the live menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonReaction {
    /// Tear the menu down
    Close,
    /// Replace the menu with a final text
    CloseWith(String),
    /// Re-render in place
    Update,
    /// Leave the menu as it is
    Keep,
}

/// Signals a menu sends to the engine running it.
#[derive(Debug, Clone, PartialEq)]
pub enum MenuSignal {
    /// Settle the suspension; `None` means dismissed
    Resolve(Option<Value>),
    Reject(ConversationError),
}

/// Handle given to menu builders to settle the enclosing suspension.
#[derive(Debug, Clone)]
pub struct MenuControl {
    tx: mpsc::UnboundedSender<MenuSignal>,
}

impl MenuControl {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MenuSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `false` once the menu is gone.
    pub fn resolve(&self, value: Option<Value>) -> bool {
        self.tx.send(MenuSignal::Resolve(value)).is_ok()
    }

    pub fn reject(&self, error: ConversationError) -> bool {
        self.tx.send(MenuSignal::Reject(error)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Dynamic menu seam.
#[async_trait]
pub trait MenuBuilder: Send + Sync {
    /// Render the current page. `None` means the menu was rejected meanwhile
    /// and nothing should be shown.
    async fn build(&self, control: &MenuControl) -> Result<Option<Menu>, ConversationError>;

    /// React to a press of one of this menu's buttons.
    async fn on_press(&self, button_id: &str, control: &MenuControl) -> ButtonReaction;

    /// Release timers and other resources once the menu is gone.
    async fn teardown(&self) {}
}

/// Pagination cursor over a list of `item_count` items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuStatus {
    pub from_index: usize,
    pub to_index: usize,
    pub page_index: usize,
    pub page_count: usize,
    pub item_count: usize,
    pub page_size: usize,
    pub next_button_text: String,
    pub prev_button_text: String,
    pub close_button_text: String,
}

impl MenuStatus {
    /// Cursor on the first page. `page_size` must be non-zero.
    pub fn new(item_count: usize, page_size: usize) -> Result<Self, ConversationError> {
        if page_size == 0 {
            return Err(ConversationError::InvalidRequest(
                "Given page size was not valid: 0".to_string(),
            ));
        }
        Ok(Self {
            from_index: 0,
            to_index: page_size.min(item_count),
            page_index: 0,
            page_count: item_count.div_ceil(page_size),
            item_count,
            page_size,
            next_button_text: "➡️".to_string(),
            prev_button_text: "⬅️".to_string(),
            close_button_text: "❌".to_string(),
        })
    }

    pub fn with_button_texts(
        mut self,
        next: impl Into<String>,
        prev: impl Into<String>,
        close: impl Into<String>,
    ) -> Self {
        self.next_button_text = next.into();
        self.prev_button_text = prev.into();
        self.close_button_text = close.into();
        self
    }

    pub fn is_first_page(&self) -> bool {
        self.page_index == 0
    }

    pub fn is_last_page(&self) -> bool {
        self.page_index + 1 >= self.page_count
    }

    /// Move to `page_index`; out-of-range pages are ignored.
    pub fn go_to(&mut self, page_index: usize) -> bool {
        if page_index >= self.page_count {
            return false;
        }
        self.page_index = page_index;
        self.from_index = page_index * self.page_size;
        self.to_index = (self.from_index + self.page_size).min(self.item_count);
        true
    }

    pub fn next_page(&mut self) -> bool {
        self.go_to(self.page_index + 1)
    }

    pub fn prev_page(&mut self) -> bool {
        match self.page_index.checked_sub(1) {
            Some(prev) => self.go_to(prev),
            None => false,
        }
    }

    /// One-based page number.
    pub fn page_number(&self) -> usize {
        self.page_index + 1
    }

    /// Variables available to menu templates.
    pub fn template_data(&self) -> Value {
        json!({
            "fromIndex": self.from_index,
            "toIndex": self.to_index,
            "from": self.from_index + 1,
            "to": self.to_index,
            "pageIndex": self.page_index,
            "pageNumber": self.page_number(),
            "pageCount": self.page_count,
            "pageSize": self.page_size,
            "itemCount": self.item_count,
            "nextButtonText": self.next_button_text,
            "prevButtonText": self.prev_button_text,
            "closeButtonText": self.close_button_text,
        })
    }
}
