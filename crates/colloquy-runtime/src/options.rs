//! InlineOptions - a paginated list menu built on the menu engine.
//!
//! Items become full-width buttons keyed by their index; navigation buttons
//! use random tokens so they never collide with item keys.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use colloquy_core::{
    Button, ButtonReaction, ConversationError, Menu, MenuBuilder, MenuControl, MenuRequest,
    MenuStatus,
};

use crate::notify::render;
use crate::settings::MenuDefaults;

const TOKEN_LEN: usize = 8;

/// Menu text: a handlebars template over the page status, or a closure.
#[derive(Clone)]
pub enum MenuTemplate {
    Text(String),
    Computed(Arc<dyn Fn(&MenuStatus, &[Value]) -> String + Send + Sync>),
}

impl fmt::Debug for MenuTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

type ButtonText = Arc<dyn Fn(&Value, usize) -> String + Send + Sync>;
type OnSelected = Arc<dyn Fn(Value, usize) -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// Paginated list menu options.
pub struct InlineOptions {
    items: Vec<Value>,
    page_size: usize,
    template: MenuTemplate,
    button_text: Option<ButtonText>,
    on_selected: Option<OnSelected>,
    use_close_button: bool,
    next_text: String,
    prev_text: String,
    close_text: String,
    page_timeout: Option<Duration>,
    menu_timeout: Option<Duration>,
    close_on_timeout: Option<bool>,
    timeout_message: Option<String>,
}

impl InlineOptions {
    pub fn new<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Self::with_defaults(items, &MenuDefaults::default())
    }

    pub fn with_defaults<I>(items: I, defaults: &MenuDefaults) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
            page_size: defaults.page_size,
            template: MenuTemplate::Text(defaults.template.clone()),
            button_text: None,
            on_selected: None,
            use_close_button: defaults.use_close_button,
            next_text: defaults.next_text.clone(),
            prev_text: defaults.prev_text.clone(),
            close_text: defaults.close_text.clone(),
            page_timeout: None,
            menu_timeout: None,
            close_on_timeout: None,
            timeout_message: None,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Handlebars template rendered with the page status.
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = MenuTemplate::Text(template.into());
        self
    }

    /// Compute the text from the status and the items of the page.
    pub fn template_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&MenuStatus, &[Value]) -> String + Send + Sync + 'static,
    {
        self.template = MenuTemplate::Computed(Arc::new(f));
        self
    }

    pub fn button_text<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, usize) -> String + Send + Sync + 'static,
    {
        self.button_text = Some(Arc::new(f));
        self
    }

    /// Make the menu non-blocking: the suspension resumes at once and each
    /// selection is handed to `f`. Returning a text closes the menu with it.
    pub fn on_selected<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        self.on_selected = Some(Arc::new(move |item, index| f(item, index).boxed()));
        self
    }

    pub fn close_button(mut self, enabled: bool) -> Self {
        self.use_close_button = enabled;
        self
    }

    pub fn navigation_texts(
        mut self,
        next: impl Into<String>,
        prev: impl Into<String>,
        close: impl Into<String>,
    ) -> Self {
        self.next_text = next.into();
        self.prev_text = prev.into();
        self.close_text = close.into();
        self
    }

    /// Restarted on every page change.
    pub fn page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = Some(timeout);
        self
    }

    /// Runs once for the whole menu.
    pub fn menu_timeout(mut self, timeout: Duration) -> Self {
        self.menu_timeout = Some(timeout);
        self
    }

    pub fn close_on_timeout(mut self, close: bool) -> Self {
        self.close_on_timeout = Some(close);
        self
    }

    pub fn timeout_message(mut self, text: impl Into<String>) -> Self {
        self.timeout_message = Some(text.into());
        self
    }

    pub fn into_request(self) -> Result<MenuRequest, ConversationError> {
        let status = MenuStatus::new(self.items.len(), self.page_size)?.with_button_texts(
            self.next_text.clone(),
            self.prev_text.clone(),
            self.close_text.clone(),
        );
        for (field, text) in [
            ("next", &self.next_text),
            ("prev", &self.prev_text),
            ("close", &self.close_text),
        ] {
            if text.trim().is_empty() {
                return Err(ConversationError::InvalidRequest(format!(
                    "{field} button text must not be empty"
                )));
            }
        }

        let mut request = MenuRequest::builder(Arc::new(OptionsMenu {
            tokens: NavTokens::generate(),
            state: Mutex::new(OptionsState {
                status,
                page_timer: None,
                menu_timer: None,
            }),
            rejected: Arc::new(AtomicBool::new(false)),
            options: self.shared(),
        }));
        if let Some(close) = self.close_on_timeout {
            request = request.close_on_timeout(close);
        }
        if let Some(text) = self.timeout_message {
            request = request.timeout_message(text);
        }
        Ok(request)
    }

    fn shared(&self) -> SharedOptions {
        SharedOptions {
            items: self.items.clone(),
            template: self.template.clone(),
            button_text: self.button_text.clone(),
            on_selected: self.on_selected.clone(),
            use_close_button: self.use_close_button,
            page_timeout: self.page_timeout,
            menu_timeout: self.menu_timeout,
        }
    }
}

struct SharedOptions {
    items: Vec<Value>,
    template: MenuTemplate,
    button_text: Option<ButtonText>,
    on_selected: Option<OnSelected>,
    use_close_button: bool,
    page_timeout: Option<Duration>,
    menu_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NavTokens {
    next: String,
    prev: String,
    close: String,
}

impl NavTokens {
    fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut token = || -> String {
            (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(TOKEN_LEN)
                .map(char::from)
                .collect()
        };
        Self {
            next: token(),
            prev: token(),
            close: token(),
        }
    }
}

struct OptionsState {
    status: MenuStatus,
    page_timer: Option<JoinHandle<()>>,
    menu_timer: Option<JoinHandle<()>>,
}

struct OptionsMenu {
    tokens: NavTokens,
    state: Mutex<OptionsState>,
    rejected: Arc<AtomicBool>,
    options: SharedOptions,
}

impl OptionsMenu {
    fn start_timer(&self, timeout: Duration, control: &MenuControl) -> JoinHandle<()> {
        let control = control.clone();
        let rejected = self.rejected.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            rejected.store(true, Ordering::SeqCst);
            control.reject(ConversationError::Timeout);
        })
    }

    fn title(&self, item: &Value, index: usize) -> String {
        match (&self.options.button_text, item) {
            (Some(f), _) => f(item, index),
            (None, Value::String(text)) => text.clone(),
            (None, other) => other.to_string(),
        }
    }

    fn text(&self, status: &MenuStatus) -> Result<String, ConversationError> {
        let page = &self.options.items[status.from_index..status.to_index];
        match &self.options.template {
            MenuTemplate::Text(template) => {
                let mut data = status.template_data();
                if let Value::Object(map) = &mut data {
                    map.insert("items".to_string(), json!(page));
                }
                render(template, &data).map_err(|err| ConversationError::Menu(err.to_string()))
            }
            MenuTemplate::Computed(f) => Ok(f(status, page)),
        }
    }
}

#[async_trait]
impl MenuBuilder for OptionsMenu {
    async fn build(&self, control: &MenuControl) -> Result<Option<Menu>, ConversationError> {
        if self.rejected.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut state = self.state.lock().await;

        if let Some(timeout) = self.options.page_timeout {
            if let Some(timer) = state.page_timer.take() {
                timer.abort();
            }
            state.page_timer = Some(self.start_timer(timeout, control));
        }
        if state.menu_timer.is_none() {
            if let Some(timeout) = self.options.menu_timeout {
                state.menu_timer = Some(self.start_timer(timeout, control));
            }
        }
        if self.options.on_selected.is_some() {
            control.resolve(None);
        }

        let status = &state.status;
        let mut menu = Menu::new(self.text(status)?);
        for index in status.from_index..status.to_index {
            let title = self.title(&self.options.items[index], index);
            menu = menu.button(Button::new(index.to_string(), title).full_width());
        }
        menu = menu.button(
            Button::new(self.tokens.prev.clone(), status.prev_button_text.clone())
                .hidden(status.is_first_page()),
        );
        if self.options.use_close_button {
            menu = menu.button(Button::new(
                self.tokens.close.clone(),
                status.close_button_text.clone(),
            ));
        }
        menu = menu.button(
            Button::new(self.tokens.next.clone(), status.next_button_text.clone())
                .hidden(status.is_last_page()),
        );
        Ok(Some(menu))
    }

    async fn on_press(&self, button_id: &str, control: &MenuControl) -> ButtonReaction {
        if button_id == self.tokens.next {
            let moved = self.state.lock().await.status.next_page();
            return if moved { ButtonReaction::Update } else { ButtonReaction::Keep };
        }
        if button_id == self.tokens.prev {
            let moved = self.state.lock().await.status.prev_page();
            return if moved { ButtonReaction::Update } else { ButtonReaction::Keep };
        }
        if button_id == self.tokens.close {
            control.resolve(None);
            return ButtonReaction::Close;
        }

        let Some((index, item)) = button_id
            .parse::<usize>()
            .ok()
            .and_then(|index| self.options.items.get(index).map(|item| (index, item.clone())))
        else {
            return ButtonReaction::Keep;
        };

        match &self.options.on_selected {
            Some(on_selected) => match on_selected(item, index).await {
                Some(text) => ButtonReaction::CloseWith(text),
                None => ButtonReaction::Keep,
            },
            None => {
                control.resolve(Some(item));
                ButtonReaction::Close
            }
        }
    }

    async fn teardown(&self) {
        let mut state = self.state.lock().await;
        for timer in [state.page_timer.take(), state.menu_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::{MenuSignal, MenuSource};

    fn builder(options: InlineOptions) -> Arc<dyn MenuBuilder> {
        match options.into_request().unwrap().source {
            MenuSource::Builder(builder) => builder,
            MenuSource::Layout(_) => panic!("inline options always build dynamically"),
        }
    }

    fn nav(menu: &Menu) -> Vec<(String, bool)> {
        menu.buttons
            .iter()
            .filter(|b| b.id.parse::<usize>().is_err())
            .map(|b| (b.text.clone(), b.hidden))
            .collect()
    }

    #[tokio::test]
    async fn test_pages_expose_windows_and_hide_navigation_at_edges() {
        let items: Vec<String> = (1..=12).map(|i| format!("item {i}")).collect();
        let menu = builder(
            InlineOptions::new(items).template("{{from}}-{{to}} of {{itemCount}}"),
        );
        let (control, _signals) = MenuControl::channel();

        let first = menu.build(&control).await.unwrap().unwrap();
        assert_eq!(first.text, "1-5 of 12");
        assert_eq!(first.buttons[0].id, "0");
        assert_eq!(first.buttons[4].text, "item 5");
        assert_eq!(
            nav(&first),
            vec![
                ("⬅️".to_string(), true),
                ("❌".to_string(), false),
                ("➡️".to_string(), false)
            ]
        );

        let next_id = first.buttons.last().unwrap().id.clone();
        assert_eq!(menu.on_press(&next_id, &control).await, ButtonReaction::Update);
        let second = menu.build(&control).await.unwrap().unwrap();
        assert_eq!(second.text, "6-10 of 12");
        assert!(nav(&second).iter().all(|(_, hidden)| !hidden));

        assert_eq!(menu.on_press(&next_id, &control).await, ButtonReaction::Update);
        let third = menu.build(&control).await.unwrap().unwrap();
        assert_eq!(third.text, "11-12 of 12");
        assert_eq!(third.buttons.iter().filter(|b| b.full_width).count(), 2);
        assert_eq!(nav(&third)[2], ("➡️".to_string(), true));
        assert_eq!(menu.on_press(&next_id, &control).await, ButtonReaction::Keep);
    }

    #[tokio::test]
    async fn test_navigation_tokens_do_not_collide_with_items() {
        let menu = builder(InlineOptions::new(vec![Value::from(1), Value::from(2)]));
        let (control, _signals) = MenuControl::channel();
        let rendered = menu.build(&control).await.unwrap().unwrap();

        let mut ids: Vec<_> = rendered.buttons.iter().map(|b| b.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), rendered.buttons.len());
        assert_eq!(rendered.buttons[0].text, "1");
    }

    #[tokio::test]
    async fn test_item_press_resolves_with_item() {
        let menu = builder(InlineOptions::new(["tea", "coffee"]));
        let (control, mut signals) = MenuControl::channel();
        menu.build(&control).await.unwrap();

        assert_eq!(menu.on_press("1", &control).await, ButtonReaction::Close);
        assert_eq!(
            signals.recv().await,
            Some(MenuSignal::Resolve(Some(Value::from("coffee"))))
        );
        assert_eq!(menu.on_press("7", &control).await, ButtonReaction::Keep);
    }

    #[tokio::test]
    async fn test_on_selected_makes_menu_non_blocking() {
        let menu = builder(InlineOptions::new(["a", "b"]).on_selected(|item, _| async move {
            (item == "b").then(|| "Picked b".to_string())
        }));
        let (control, mut signals) = MenuControl::channel();
        menu.build(&control).await.unwrap();
        assert_eq!(signals.recv().await, Some(MenuSignal::Resolve(None)));

        assert_eq!(menu.on_press("0", &control).await, ButtonReaction::Keep);
        assert_eq!(
            menu.on_press("1", &control).await,
            ButtonReaction::CloseWith("Picked b".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_timeout_restarts_on_navigation() {
        let items: Vec<u32> = (0..10).collect();
        let menu = builder(
            InlineOptions::new(items)
                .page_size(3)
                .page_timeout(Duration::from_secs(10)),
        );
        let (control, mut signals) = MenuControl::channel();
        let first = menu.build(&control).await.unwrap().unwrap();
        let next_id = first.buttons.last().unwrap().id.clone();

        tokio::time::sleep(Duration::from_secs(8)).await;
        menu.on_press(&next_id, &control).await;
        menu.build(&control).await.unwrap();
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(signals.try_recv().is_err());

        assert_eq!(
            signals.recv().await,
            Some(MenuSignal::Reject(ConversationError::Timeout))
        );
        assert!(menu.build(&control).await.unwrap().is_none());
        menu.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_menu_timeout_ignores_navigation() {
        let items: Vec<u32> = (0..10).collect();
        let menu = builder(
            InlineOptions::new(items)
                .page_size(3)
                .menu_timeout(Duration::from_secs(10)),
        );
        let (control, mut signals) = MenuControl::channel();
        let started = tokio::time::Instant::now();
        let first = menu.build(&control).await.unwrap().unwrap();
        let next_id = first.buttons.last().unwrap().id.clone();

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(menu.on_press(&next_id, &control).await, ButtonReaction::Update);
        menu.build(&control).await.unwrap();

        assert_eq!(
            signals.recv().await,
            Some(MenuSignal::Reject(ConversationError::Timeout))
        );
        assert!(started.elapsed() < Duration::from_secs(11));
        menu.teardown().await;
    }

    #[test]
    fn test_zero_page_size_is_invalid() {
        assert!(matches!(
            InlineOptions::new(["x"]).page_size(0).into_request(),
            Err(ConversationError::InvalidRequest(_))
        ));
    }
}
