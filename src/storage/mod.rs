use crate::auth::Credentials;
use std::cell::RefCell;

/// Key under which the credential pair lives in `sessionStorage`.
pub const TOKEN_KEY: &str = "linkpage_tokens";

/// Where the session keeps its credentials between page loads of one tab.
pub trait TokenStore {
    fn load(&self) -> Option<Credentials>;
    fn save(&self, credentials: &Credentials);
    fn clear(&self);
}

#[derive(Default)]
pub struct MemoryTokenStore {
    credentials: RefCell<Option<Credentials>>,
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<Credentials> {
        self.credentials.borrow().clone()
    }

    fn save(&self, credentials: &Credentials) {
        *self.credentials.borrow_mut() = Some(credentials.clone());
    }

    fn clear(&self) {
        self.credentials.borrow_mut().take();
    }
}

/// Browser `sessionStorage`: tokens survive reloads but not the tab.
#[cfg(target_arch = "wasm32")]
#[derive(Default)]
pub struct SessionStorageTokenStore;

#[cfg(target_arch = "wasm32")]
fn session_storage() -> Option<web_sys::Storage> {
    web_sys::window().and_then(|w| w.session_storage().ok().flatten())
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn load_json_from_storage<T: for<'de> serde::Deserialize<'de>>(key: &str) -> Option<T> {
    let storage = session_storage()?;
    let json = storage.get_item(key).ok().flatten()?;
    serde_json::from_str(&json).ok()
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn save_json_to_storage<T: serde::Serialize>(key: &str, value: &T) {
    if let Ok(json) = serde_json::to_string(value) {
        if let Some(storage) = session_storage() {
            let _ = storage.set_item(key, &json);
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl TokenStore for SessionStorageTokenStore {
    fn load(&self) -> Option<Credentials> {
        load_json_from_storage(TOKEN_KEY)
    }

    fn save(&self, credentials: &Credentials) {
        save_json_to_storage(TOKEN_KEY, credentials);
    }

    fn clear(&self) {
        if let Some(storage) = session_storage() {
            let _ = storage.remove_item(TOKEN_KEY);
        }
    }
}
