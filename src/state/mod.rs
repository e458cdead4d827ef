use crate::models::ProfileDraft;
use crate::session::{DraftObserver, FieldKey};
use leptos::prelude::*;
use std::collections::HashMap;

#[cfg(target_arch = "wasm32")]
use crate::{
    api::{ApiClient, HttpTransport},
    auth::{AuthRetryWrapper, Session},
    config::EditorConfig,
    session::EditSession,
    storage::SessionStorageTokenStore,
    sync::BrowserScheduler,
};
#[cfg(target_arch = "wasm32")]
use std::rc::Rc;

/// Reactive mirror of an edit session; the UI renders from these signals only.
#[derive(Clone, Copy)]
pub struct EditorSignals {
    pub draft: RwSignal<ProfileDraft>,

    /// Inline messages by field. Absent means the field is fine.
    pub field_errors: RwSignal<HashMap<FieldKey, String>>,

    /// Set once; the host routes to sign-in.
    pub session_expired: RwSignal<bool>,
}

impl EditorSignals {
    pub fn new() -> Self {
        Self {
            draft: RwSignal::new(ProfileDraft::default()),
            field_errors: RwSignal::new(HashMap::new()),
            session_expired: RwSignal::new(false),
        }
    }

    pub fn error_for(&self, key: &FieldKey) -> Option<String> {
        self.field_errors.with(|m| m.get(key).cloned())
    }
}

impl Default for EditorSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl DraftObserver for EditorSignals {
    fn draft_changed(&self, draft: &ProfileDraft) {
        self.draft.set(draft.clone());
    }

    fn field_error(&self, key: &FieldKey, message: Option<&str>) {
        self.field_errors.update(|m| match message {
            Some(msg) => {
                m.insert(key.clone(), msg.to_string());
            }
            None => {
                m.remove(key);
            }
        });
    }

    fn session_expired(&self) {
        self.session_expired.set(true);
    }
}

/// Wire the browser stack together and start loading the profile.
#[cfg(target_arch = "wasm32")]
pub fn open_editor(config: EditorConfig, signals: EditorSignals) -> EditSession {
    let transport = Rc::new(HttpTransport::new(config.api_url.clone()));
    let session = Session::new(Box::new(SessionStorageTokenStore));
    let api = ApiClient::new(Rc::new(AuthRetryWrapper::new(session, transport)));
    let editor = EditSession::new(api, Rc::new(BrowserScheduler), config, Rc::new(signals));

    let loader = editor.clone();
    leptos::task::spawn_local(async move {
        if let Err(e) = loader.load().await {
            tracing::warn!(error = %e, "editor failed to load");
        }
    });
    editor
}
