//! The editing session: one live draft, kept in step with the backend.
//!
//! Every edit lands in the draft synchronously and is then handed to the
//! write coalescer under its `FieldKey`. Server answers come back through
//! `commit.rs`, which reconciles ids and canonical values, reverts failed
//! writes and tears the session down when credentials are gone.

mod commit;
mod field;

pub use field::{EntityRef, FieldKey, FieldName, FieldState};

use crate::api::{ApiClient, ApiError, CreateLinkRequest};
use crate::config::EditorConfig;
use crate::models::{EntityId, Link, LinkKind, ProfileDraft, SocialIcon};
use crate::normalize::{self, ValidationError};
use crate::reorder::{self, ReorderCoordinator, ReorderError};
use crate::sync::{Scheduler, WriteCoalescer};
use crate::util::new_temp_id;
use field::FieldTrack;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Reorder(#[from] ReorderError),
    #[error("session expired")]
    Expired,
    #[error("unknown link {0}")]
    UnknownLink(EntityId),
    #[error("unknown social icon {0}")]
    UnknownSocialIcon(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Receives every change the UI has to render.
///
/// Called with no session borrow held, so an observer may read the session back.
pub trait DraftObserver {
    fn draft_changed(&self, _draft: &ProfileDraft) {}

    /// `None` clears the message for `key`.
    fn field_error(&self, _key: &FieldKey, _message: Option<&str>) {}

    fn session_expired(&self) {}
}

pub struct NoopObserver;

impl DraftObserver for NoopObserver {}

#[derive(Default)]
struct SessionState {
    draft: ProfileDraft,
    tracks: HashMap<FieldKey, FieldTrack>,
    focused: Option<FieldKey>,
    links_order: ReorderCoordinator,
    reorder_waiting_for_create: bool,

    /// Temp id -> server id, once the create resolved.
    id_swaps: HashMap<String, u64>,
    /// Fields whose commit came due before their link had a server id.
    parked: HashMap<String, HashSet<FieldName>>,
    /// Links deleted while their create was still running.
    deleted_before_create: HashMap<String, (usize, Link)>,

    expired: bool,
    temp_seq: u64,
}

/// One editing session over the signed-in user's profile.
///
/// Expiry is terminal: signing in again on the same auth `Session` does not
/// revive it. The host builds a new `EditSession` (and calls `load`) after
/// re-authenticating.
#[derive(Clone)]
pub struct EditSession {
    state: Rc<RefCell<SessionState>>,
    api: ApiClient,
    coalescer: WriteCoalescer<FieldKey>,
    scheduler: Rc<dyn Scheduler>,
    config: Rc<EditorConfig>,
    observer: Rc<dyn DraftObserver>,
}

impl EditSession {
    pub fn new(
        api: ApiClient,
        scheduler: Rc<dyn Scheduler>,
        config: EditorConfig,
        observer: Rc<dyn DraftObserver>,
    ) -> Self {
        Self {
            state: Rc::new(RefCell::new(SessionState::default())),
            api,
            coalescer: WriteCoalescer::new(scheduler.clone()),
            scheduler,
            config: Rc::new(config),
            observer,
        }
    }

    /// Fetch the profile and make it the live draft.
    pub async fn load(&self) -> Result<(), SessionError> {
        self.ensure_live()?;
        match self.api.fetch_profile().await {
            Ok(draft) => {
                tracing::info!(
                    links = draft.links.len(),
                    social_icons = draft.social_icons.len(),
                    "profile loaded"
                );
                {
                    let mut st = self.state.borrow_mut();
                    st.draft = draft;
                    st.tracks.clear();
                    st.focused = None;
                }
                self.notify_draft();
                Ok(())
            }
            Err(e) if e.is_auth_expired() => {
                self.expire();
                Err(SessionError::Expired)
            }
            Err(e) => {
                tracing::warn!(error = %e, "load profile failed");
                Err(e.into())
            }
        }
    }

    pub fn draft(&self) -> ProfileDraft {
        self.state.borrow().draft.clone()
    }

    pub fn field_state(&self, key: &FieldKey) -> FieldState {
        let key = self.resolve_key(key);
        self.state
            .borrow()
            .tracks
            .get(&key)
            .map(|t| t.state.clone())
            .unwrap_or_default()
    }

    /// Stays true for the life of this session, even after a new sign-in.
    pub fn is_expired(&self) -> bool {
        self.state.borrow().expired || self.api.auth().session().is_expired()
    }

    pub fn set_name(&self, name: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        let key = FieldKey::profile(FieldName::Name);
        self.edit_field(key, self.config.text_debounce_ms, |d| {
            d.name = name.to_string();
            Value::String(name.to_string())
        });
        Ok(())
    }

    pub fn set_bio(&self, bio: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        let key = FieldKey::profile(FieldName::Bio);
        self.edit_field(key, self.config.text_debounce_ms, |d| {
            d.bio = bio.to_string();
            Value::String(bio.to_string())
        });
        Ok(())
    }

    /// `None` removes the avatar. Uploading the image is the host's job.
    pub fn set_avatar(&self, avatar: Option<&str>) -> Result<(), SessionError> {
        self.ensure_live()?;
        let key = FieldKey::profile(FieldName::Avatar);
        self.edit_field(key, self.config.structural_debounce_ms, |d| {
            d.avatar = avatar.map(str::to_string);
            avatar.map_or(Value::Null, |a| Value::String(a.to_string()))
        });
        Ok(())
    }

    pub fn set_design(&self, design: Value) -> Result<(), SessionError> {
        self.ensure_live()?;
        let key = FieldKey::profile(FieldName::Design);
        self.edit_field(key, self.config.text_debounce_ms, |d| {
            d.design = design.clone();
            design
        });
        Ok(())
    }

    /// Validate, append a link under a temp id and create it right away.
    pub fn add_link(&self, title: &str, url: &str, kind: LinkKind) -> Result<EntityId, SessionError> {
        self.ensure_live()?;
        let normalized = normalize::normalize(url, kind)?;
        let title = if title.trim().is_empty() {
            normalized.title.unwrap_or_default()
        } else {
            title.to_string()
        };

        let (id, req) = {
            let mut st = self.state.borrow_mut();
            st.temp_seq += 1;
            let id = new_temp_id(st.temp_seq);
            let position = st.draft.links.len() as u32;
            st.draft.links.push(Link {
                id: id.clone(),
                title: title.clone(),
                url: normalized.url.clone(),
                kind,
                position,
            });
            let req = CreateLinkRequest {
                title,
                url: normalized.url,
                kind,
                position,
            };
            (id, req)
        };

        tracing::debug!(%id, "link added");
        self.notify_draft();
        self.schedule_create(id.clone(), req);
        Ok(id)
    }

    pub fn set_link_title(&self, id: &EntityId, title: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        let id = self.require_link(id)?;
        let key = FieldKey::link(id.clone(), FieldName::Title);
        self.edit_field(key, self.config.text_debounce_ms, |d| {
            if let Some(l) = d.link_mut(&id) {
                l.title = title.to_string();
            }
            Value::String(title.to_string())
        });
        Ok(())
    }

    /// The raw text always lands in the draft; only a valid URL is scheduled.
    pub fn set_link_url(&self, id: &EntityId, raw: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        let id = self.require_link(id)?;
        let kind = self
            .state
            .borrow()
            .draft
            .link(&id)
            .map(|l| l.kind)
            .unwrap_or_default();
        let key = FieldKey::link(id.clone(), FieldName::Url);
        let set_raw = |d: &mut ProfileDraft| {
            if let Some(l) = d.link_mut(&id) {
                l.url = raw.to_string();
            }
        };

        match normalize::normalize(raw, kind) {
            Ok(n) => {
                self.edit_field(key, self.config.text_debounce_ms, |d| {
                    set_raw(d);
                    Value::String(n.url)
                });
                if let Some(title) = n.title {
                    self.suggest_title(&id, &title)?;
                }
                Ok(())
            }
            Err(e) => {
                self.reject_edit(key, set_raw, &e);
                Err(e.into())
            }
        }
    }

    /// Compose a `wa.me` URL from the country selector and the number field.
    pub fn set_whatsapp_number(
        &self,
        id: &EntityId,
        country_code: &str,
        local_number: &str,
    ) -> Result<(), SessionError> {
        self.ensure_live()?;
        let id = self.require_link(id)?;
        let key = FieldKey::link(id.clone(), FieldName::Url);

        match normalize::normalize_whatsapp(country_code, local_number) {
            Ok(n) => {
                let url = n.url;
                self.edit_field(key, self.config.text_debounce_ms, |d| {
                    if let Some(l) = d.link_mut(&id) {
                        l.url = url.clone();
                    }
                    Value::String(url)
                });
                if let Some(title) = n.title {
                    self.suggest_title(&id, &title)?;
                }
                Ok(())
            }
            Err(e) => {
                self.reject_edit(key, |_| {}, &e);
                Err(e.into())
            }
        }
    }

    /// Remove the link now; it comes back at the same index if the delete fails.
    pub fn delete_link(&self, id: &EntityId) -> Result<(), SessionError> {
        self.ensure_live()?;
        let id = self.require_link(id)?;

        let (index, link) = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let Some(index) = st.draft.link_index(&id) else {
                return Err(SessionError::UnknownLink(id));
            };
            let link = st.draft.links.remove(index);
            st.draft.renumber_links();
            st.tracks
                .retain(|k, _| !matches!(&k.entity, EntityRef::Link(l) if *l == id));
            if let EntityId::Temp(tmp) = &id {
                st.parked.remove(tmp);
                st.deleted_before_create
                    .insert(tmp.clone(), (index, link.clone()));
            }
            (index, link)
        };

        for field in [FieldName::Title, FieldName::Url] {
            self.coalescer.cancel(&FieldKey::link(id.clone(), field));
        }
        tracing::debug!(%id, index, "link removed");
        self.notify_draft();

        if !id.is_temp() {
            self.schedule_delete(link, index);
        }
        self.persist_reorder_if_waiting();
        Ok(())
    }

    /// Move one link and persist the full order.
    pub fn reorder_links(&self, from: usize, to: usize) -> Result<(), SessionError> {
        self.ensure_live()?;
        {
            let mut st = self.state.borrow_mut();
            let moved = reorder::move_item(&st.draft.links, from, to)?;
            if from == to {
                return Ok(());
            }
            if st.links_order.has_unconfirmed() {
                tracing::debug!(from, to, "drag on top of an unconfirmed order");
            }
            let before = st.draft.link_order();
            st.links_order.begin(before);
            st.draft.links = moved;
            st.draft.renumber_links();
        }

        self.notify_draft();
        self.persist_link_order();
        Ok(())
    }

    /// Add or update the icon for `social_type`.
    pub fn set_social_icon(&self, social_type: &str, username: &str, url: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        let url = match url.trim() {
            "" => String::new(),
            raw => match normalize::normalize_generic(raw) {
                Ok(url) => url,
                Err(e) => {
                    // The array is written whole, so the bad URL stays out of the draft.
                    self.reject_edit(FieldKey::profile(FieldName::SocialIcons), |_| {}, &e);
                    return Err(e.into());
                }
            },
        };

        self.edit_social_icons(self.config.text_debounce_ms, |icons| {
            match icons.iter_mut().find(|s| s.social_type == social_type) {
                Some(icon) => {
                    icon.username = username.to_string();
                    icon.url = url;
                }
                None => icons.push(SocialIcon {
                    social_type: social_type.to_string(),
                    username: username.to_string(),
                    url,
                    position: icons.len() as u32,
                }),
            }
        });
        Ok(())
    }

    pub fn remove_social_icon(&self, social_type: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        let Some(index) = self.state.borrow().draft.social_icon_index(social_type) else {
            return Err(SessionError::UnknownSocialIcon(social_type.to_string()));
        };

        self.edit_social_icons(self.config.structural_debounce_ms, |icons| {
            icons.remove(index);
        });
        Ok(())
    }

    pub fn reorder_social_icons(&self, from: usize, to: usize) -> Result<(), SessionError> {
        self.ensure_live()?;
        let moved = reorder::move_item(&self.state.borrow().draft.social_icons, from, to)?;
        if from == to {
            return Ok(());
        }

        self.edit_social_icons(self.config.structural_debounce_ms, |icons| {
            *icons = moved;
        });
        Ok(())
    }

    pub fn focus(&self, key: &FieldKey) {
        let key = self.resolve_key(key);
        self.state.borrow_mut().focused = Some(key);
    }

    /// Leaving a field sends its pending write without waiting for the debounce.
    pub fn blur(&self, key: &FieldKey) {
        let key = self.resolve_key(key);
        let changed = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            if st.focused.as_ref() == Some(&key) {
                st.focused = None;
            }
            // Text kept raw while focused can now show the canonical value.
            match st.tracks.get(&key) {
                Some(t) if t.state == FieldState::Clean => {
                    let confirmed = t.confirmed.clone();
                    set_draft_value(&mut st.draft, &key, &confirmed)
                }
                _ => false,
            }
        };

        self.coalescer.flush(&key);
        if changed {
            self.notify_draft();
        }
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_expired() {
            Err(SessionError::Expired)
        } else {
            Ok(())
        }
    }

    fn resolve_id(&self, id: &EntityId) -> EntityId {
        if let EntityId::Temp(tmp) = id {
            if let Some(server) = self.state.borrow().id_swaps.get(tmp) {
                return EntityId::Server(*server);
            }
        }
        id.clone()
    }

    fn resolve_key(&self, key: &FieldKey) -> FieldKey {
        match &key.entity {
            EntityRef::Link(id) => FieldKey::link(self.resolve_id(id), key.field),
            EntityRef::Profile => key.clone(),
        }
    }

    fn require_link(&self, id: &EntityId) -> Result<EntityId, SessionError> {
        let id = self.resolve_id(id);
        if self.state.borrow().draft.link(&id).is_some() {
            Ok(id)
        } else {
            Err(SessionError::UnknownLink(id))
        }
    }

    /// Apply `mutate` to the draft and schedule the value it returns under `key`.
    fn edit_field(&self, key: FieldKey, delay_ms: u32, mutate: impl FnOnce(&mut ProfileDraft) -> Value) {
        let (value, had_error) = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let previous = draft_value(&st.draft, &key).unwrap_or_default();
            let value = mutate(&mut st.draft);
            let track = st
                .tracks
                .entry(key.clone())
                .or_insert_with(|| FieldTrack::new(previous));
            let had_error = track.has_error();
            track.edit(value.clone());
            (value, had_error)
        };

        if had_error {
            self.observer.field_error(&key, None);
        }
        self.notify_draft();
        self.schedule_commit(key, value, delay_ms);
    }

    /// Keep the user's text on screen, mark the field invalid and drop any pending write.
    fn reject_edit(&self, key: FieldKey, mutate: impl FnOnce(&mut ProfileDraft), err: &ValidationError) {
        let message = err.to_string();
        {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let previous = draft_value(&st.draft, &key).unwrap_or_default();
            mutate(&mut st.draft);
            st.tracks
                .entry(key.clone())
                .or_insert_with(|| FieldTrack::new(previous))
                .invalid(message.clone());
        }

        self.coalescer.cancel(&key);
        tracing::debug!(%key, %message, "edit rejected");
        self.observer.field_error(&key, Some(&message));
        self.notify_draft();
    }

    fn edit_social_icons(&self, delay_ms: u32, mutate: impl FnOnce(&mut Vec<SocialIcon>)) {
        let key = FieldKey::profile(FieldName::SocialIcons);
        self.edit_field(key, delay_ms, |d| {
            mutate(&mut d.social_icons);
            d.renumber_social_icons();
            serde_json::to_value(&d.social_icons).unwrap_or_default()
        });
    }

    /// Fill an empty title with the normalizer's suggestion.
    fn suggest_title(&self, id: &EntityId, title: &str) -> Result<(), SessionError> {
        let empty = self
            .state
            .borrow()
            .draft
            .link(id)
            .is_some_and(|l| l.title.trim().is_empty());
        if empty {
            self.set_link_title(id, title)?;
        }
        Ok(())
    }

    fn notify_draft(&self) {
        let draft = self.state.borrow().draft.clone();
        self.observer.draft_changed(&draft);
    }

    /// Drop every pending write and tell the UI to route to sign-in.
    fn expire(&self) {
        {
            let mut st = self.state.borrow_mut();
            if st.expired {
                return;
            }
            st.expired = true;
        }
        self.coalescer.cancel_all();
        tracing::info!("session expired; pending writes dropped");
        self.observer.session_expired();
    }
}

/// The draft's current value for `key`, in the shape it is written in.
fn draft_value(draft: &ProfileDraft, key: &FieldKey) -> Option<Value> {
    match (&key.entity, key.field) {
        (EntityRef::Profile, FieldName::Name) => Some(Value::String(draft.name.clone())),
        (EntityRef::Profile, FieldName::Bio) => Some(Value::String(draft.bio.clone())),
        (EntityRef::Profile, FieldName::Avatar) => {
            Some(draft.avatar.clone().map_or(Value::Null, Value::String))
        }
        (EntityRef::Profile, FieldName::Design) => Some(draft.design.clone()),
        (EntityRef::Profile, FieldName::SocialIcons) => serde_json::to_value(&draft.social_icons).ok(),
        (EntityRef::Link(id), FieldName::Title) => draft.link(id).map(|l| Value::String(l.title.clone())),
        (EntityRef::Link(id), FieldName::Url) => draft.link(id).map(|l| Value::String(l.url.clone())),
        _ => None,
    }
}

/// Overwrite the draft's value for `key`. Returns true if anything changed.
fn set_draft_value(draft: &mut ProfileDraft, key: &FieldKey, value: &Value) -> bool {
    match draft_value(draft, key) {
        Some(current) if current != *value => {}
        _ => return false,
    }

    let text = || value.as_str().unwrap_or_default().to_string();
    match (&key.entity, key.field) {
        (EntityRef::Profile, FieldName::Name) => draft.name = text(),
        (EntityRef::Profile, FieldName::Bio) => draft.bio = text(),
        (EntityRef::Profile, FieldName::Avatar) => draft.avatar = value.as_str().map(str::to_string),
        (EntityRef::Profile, FieldName::Design) => draft.design = value.clone(),
        (EntityRef::Profile, FieldName::SocialIcons) => {
            match serde_json::from_value::<Vec<SocialIcon>>(value.clone()) {
                Ok(icons) => draft.social_icons = icons,
                Err(e) => {
                    tracing::warn!(error = %e, "confirmed social icons are not an icon list");
                    return false;
                }
            }
        }
        (EntityRef::Link(id), FieldName::Title) => match draft.link_mut(id) {
            Some(l) => l.title = text(),
            None => return false,
        },
        (EntityRef::Link(id), FieldName::Url) => match draft.link_mut(id) {
            Some(l) => l.url = text(),
            None => return false,
        },
        _ => return false,
    }
    true
}
