//! Host-side event subscriptions.

use crate::backend::NavigationType;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::rc::Weak;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebViewEventKind {
    LoadStarted,
    LoadFinished,
    WebMessage,
}

impl WebViewEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadStarted => "loadStarted",
            Self::LoadFinished => "loadFinished",
            Self::WebMessage => "webMessage",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebViewEvent {
    LoadStarted {
        url: String,
        navigation_type: NavigationType,
    },
    /// Raised after auto-loads for the new document have been applied.
    /// `error` is set when the load failed.
    LoadFinished {
        url: String,
        navigation_type: NavigationType,
        error: Option<String>,
    },
    /// A message the page emitted with `wxBridge.emit(name, data)`.
    WebMessage { name: String, data: Value },
}

impl WebViewEvent {
    pub fn kind(&self) -> WebViewEventKind {
        match self {
            Self::LoadStarted { .. } => WebViewEventKind::LoadStarted,
            Self::LoadFinished { .. } => WebViewEventKind::LoadFinished,
            Self::WebMessage { .. } => WebViewEventKind::WebMessage,
        }
    }
}

type Handler = Rc<RefCell<dyn FnMut(&WebViewEvent)>>;

struct Listener {
    id: u64,
    kind: WebViewEventKind,
    handler: Handler,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    listeners: Vec<Listener>,
}

#[derive(Default)]
pub(crate) struct EventHub {
    state: Rc<RefCell<HubState>>,
}

impl EventHub {
    pub(crate) fn subscribe<F>(&self, kind: WebViewEventKind, handler: F) -> Subscription
    where
        F: FnMut(&WebViewEvent) + 'static,
    {
        let mut state = self.state.borrow_mut();
        state.next_id = state.next_id.saturating_add(1);
        let id = state.next_id;
        state.listeners.push(Listener {
            id,
            kind,
            handler: Rc::new(RefCell::new(handler)),
        });

        Subscription {
            id,
            hub: Rc::downgrade(&self.state),
            active: true,
        }
    }

    /// Delivers `event` to every handler registered for its kind; returns how many ran.
    pub(crate) fn emit(&self, event: &WebViewEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .state
            .borrow()
            .listeners
            .iter()
            .filter(|listener| listener.kind == kind)
            .map(|listener| Rc::clone(&listener.handler))
            .collect();

        let mut delivered = 0_usize;
        for handler in handlers {
            let Ok(mut handler) = handler.try_borrow_mut() else {
                warn!(event = kind.as_str(), "handler re-entered; skipping nested delivery");
                continue;
            };
            (&mut *handler)(event);
            delivered = delivered.saturating_add(1);
        }
        delivered
    }

    pub(crate) fn listener_count(&self, kind: WebViewEventKind) -> usize {
        self.state
            .borrow()
            .listeners
            .iter()
            .filter(|listener| listener.kind == kind)
            .count()
    }
}

/// Handle for a registered event handler.
///
/// Dropping it removes the handler; [`Subscription::detach`] keeps the
/// handler registered for the container's lifetime.
#[must_use = "dropping a subscription removes its handler"]
pub struct Subscription {
    id: u64,
    hub: Weak<RefCell<HubState>>,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    pub fn detach(mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active && self.hub.strong_count() > 0
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(state) = self.hub.upgrade() {
            let mut state = state.borrow_mut();
            state.listeners.retain(|listener| listener.id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
