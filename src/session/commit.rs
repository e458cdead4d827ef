use super::{set_draft_value, EditSession, EntityRef, FieldKey, FieldName, FieldTrack};
use crate::api::{ApiClient, ApiError, ApiResult, CreateLinkRequest, LinkPatch, ProfilePatch};
use crate::models::{EntityId, Link};
use crate::reorder::{self, ReorderEntry, Settle};
use crate::sync::TimerHandle;
use futures::FutureExt;
use serde_json::Value;

const REORDER_FAILED: &str = "could not save order.";

impl EditSession {
    pub(super) fn schedule_commit(&self, key: FieldKey, value: Value, delay_ms: u32) {
        let session = self.clone();
        let k = key.clone();
        self.coalescer.schedule(key, delay_ms, move || async move {
            session.commit_field(k, value).await;
        });
    }

    async fn commit_field(&self, key: FieldKey, value: Value) {
        if self.is_expired() {
            return;
        }
        let key = self.resolve_key(&key);

        if let Some(tmp) = key.temp_link_id() {
            tracing::debug!(%key, "link not created yet; edit parked");
            self.state
                .borrow_mut()
                .parked
                .entry(tmp.to_string())
                .or_default()
                .insert(key.field);
            return;
        }

        {
            let mut st = self.state.borrow_mut();
            let Some(track) = st.tracks.get_mut(&key) else {
                // Entity removed since the edit.
                return;
            };
            if track.dirty_value() != Some(&value) {
                tracing::debug!(%key, "superseded write skipped");
                return;
            }
            track.begin_commit(value.clone());
        }

        let timer = self.arm_timeout(&key, &value);
        let result = self.send_field(&key, &value).await;
        if let Some(t) = timer {
            self.scheduler.clear_timeout(t);
        }

        match result {
            Ok(canonical) => self.field_confirmed(&key, &value, canonical),
            Err(e) if e.is_auth_expired() => self.expire(),
            Err(e) => {
                tracing::warn!(%key, error = %e, "write failed");
                self.field_failed(&key, &value, e.to_string());
            }
        }
    }

    async fn send_field(&self, key: &FieldKey, value: &Value) -> ApiResult<Value> {
        match (&key.entity, key.field) {
            (
                EntityRef::Profile,
                field @ (FieldName::Name
                | FieldName::Bio
                | FieldName::Avatar
                | FieldName::Design
                | FieldName::SocialIcons),
            ) => {
                let data = self.api.update_profile(&profile_patch(field, value)).await?;
                Ok(ApiClient::echoed_profile_field(&data, field.as_ref())
                    .unwrap_or_else(|| value.clone()))
            }
            (EntityRef::Link(EntityId::Server(id)), field @ (FieldName::Title | FieldName::Url)) => {
                let text = value.as_str().unwrap_or_default().to_string();
                let patch = if field == FieldName::Title {
                    LinkPatch {
                        title: Some(text.clone()),
                        ..Default::default()
                    }
                } else {
                    LinkPatch {
                        url: Some(text.clone()),
                        ..Default::default()
                    }
                };
                let echoed = self.api.update_link(*id, &patch).await?;
                let canonical = echoed
                    .filter(|l| l.id == EntityId::Server(*id))
                    .map(|l| if field == FieldName::Title { l.title } else { l.url })
                    .filter(|s| !s.is_empty() || text.is_empty())
                    .unwrap_or(text);
                Ok(Value::String(canonical))
            }
            _ => Err(ApiError::parse(format!("{key} is not a writable field"))),
        }
    }

    fn arm_timeout(&self, key: &FieldKey, sent: &Value) -> Option<TimerHandle> {
        let ms = self.config.commit_timeout_ms?;
        let session = self.clone();
        let key = key.clone();
        let sent = sent.clone();
        Some(self.scheduler.set_timeout(
            ms,
            Box::new(move || {
                tracing::warn!(%key, "write timed out");
                session.field_failed(&key, &sent, "request timed out".to_string());
            }),
        ))
    }

    fn field_confirmed(&self, key: &FieldKey, sent: &Value, canonical: Value) {
        let changed = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let keep_raw = key.is_free_text() && st.focused.as_ref() == Some(key);
            let Some(track) = st.tracks.get_mut(key) else {
                return;
            };
            let current = track.commit_succeeded(sent, canonical.clone());
            tracing::debug!(%key, current, "write confirmed");
            current && !keep_raw && set_draft_value(&mut st.draft, key, &canonical)
        };

        if changed {
            self.notify_draft();
        }
    }

    /// Move the field to `Error` and revert it unless the user is typing in it.
    fn field_failed(&self, key: &FieldKey, sent: &Value, message: String) {
        let reverted = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let keep_raw = key.is_free_text() && st.focused.as_ref() == Some(key);
            let Some(track) = st.tracks.get_mut(key) else {
                return;
            };
            let Some(last_good) = track.commit_failed(sent, message.clone()) else {
                // A newer edit owns the field now.
                return;
            };
            !keep_raw && set_draft_value(&mut st.draft, key, &last_good)
        };

        self.observer.field_error(key, Some(&message));
        if reverted {
            self.notify_draft();
        }
    }

    pub(super) fn schedule_create(&self, tmp: EntityId, req: CreateLinkRequest) {
        let session = self.clone();
        let key = FieldKey::link(tmp.clone(), FieldName::Create);
        self.coalescer
            .schedule(key, self.config.structural_debounce_ms, move || async move {
                session.commit_create(tmp, req).await;
            });
    }

    async fn commit_create(&self, tmp: EntityId, mut req: CreateLinkRequest) {
        let EntityId::Temp(tmp_str) = &tmp else {
            return;
        };
        if self.is_expired() {
            return;
        }

        let index = {
            let mut st = self.state.borrow_mut();
            let index = st.draft.link_index(&tmp);
            if index.is_none() {
                st.deleted_before_create.remove(tmp_str);
                st.parked.remove(tmp_str);
            }
            index
        };
        let Some(index) = index else {
            tracing::debug!(tmp = %tmp_str, "link removed before create; nothing to send");
            return;
        };
        req.position = index as u32;

        match self.api.create_link(&req).await {
            Ok((id, echoed)) => self.link_created(&tmp, tmp_str, id, echoed),
            Err(e) if e.is_auth_expired() => self.expire(),
            Err(e) => {
                tracing::warn!(tmp = %tmp_str, error = %e, "create link failed");
                self.link_create_failed(&tmp, tmp_str, &e);
            }
        }
    }

    /// Swap the temp id everywhere and release what waited for it.
    fn link_created(&self, tmp: &EntityId, tmp_str: &str, id: u64, echoed: Option<Link>) {
        let server = EntityId::Server(id);
        let tmp_entity = EntityRef::Link(tmp.clone());

        let deleted = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            st.id_swaps.insert(tmp_str.to_string(), id);
            st.links_order.swap_id(tmp, id);

            if let Some(snapshot) = st.deleted_before_create.remove(tmp_str) {
                st.parked.remove(tmp_str);
                Some(snapshot)
            } else {
                st.draft.swap_temp_link_id(tmp, id);

                let keys: Vec<FieldKey> = st
                    .tracks
                    .keys()
                    .filter(|k| k.entity == tmp_entity)
                    .cloned()
                    .collect();
                for k in keys {
                    if let Some(track) = st.tracks.remove(&k) {
                        st.tracks.insert(FieldKey::link(server.clone(), k.field), track);
                    }
                }
                if let Some(f) = st.focused.as_mut().filter(|f| f.entity == tmp_entity) {
                    f.entity = EntityRef::Link(server.clone());
                }

                // Server-side canonical values for fields nobody touched since.
                if let Some(echoed) = echoed {
                    for field in [FieldName::Title, FieldName::Url] {
                        let key = FieldKey::link(server.clone(), field);
                        if st.tracks.contains_key(&key) {
                            continue;
                        }
                        let value = if field == FieldName::Title {
                            echoed.title.clone()
                        } else {
                            echoed.url.clone()
                        };
                        if !value.is_empty() {
                            set_draft_value(&mut st.draft, &key, &Value::String(value));
                        }
                    }
                }
                None
            }
        };

        for field in [FieldName::Title, FieldName::Url, FieldName::Delete] {
            self.coalescer.alias(
                FieldKey::link(tmp.clone(), field),
                FieldKey::link(server.clone(), field),
            );
        }
        tracing::info!(tmp = %tmp_str, id, "link created");

        if let Some((index, link)) = deleted {
            self.schedule_delete(Link { id: server, ..link }, index);
            self.persist_reorder_if_waiting();
            return;
        }

        let parked: Vec<(FieldKey, Value)> = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let fields = st.parked.remove(tmp_str).unwrap_or_default();
            fields
                .into_iter()
                .filter_map(|field| {
                    let key = FieldKey::link(server.clone(), field);
                    let value = st.tracks.get(&key)?.dirty_value()?.clone();
                    Some((key, value))
                })
                .collect()
        };
        for (key, value) in parked {
            tracing::debug!(%key, "flushing parked edit");
            self.schedule_commit(key, value, 0);
        }

        self.notify_draft();
        self.persist_reorder_if_waiting();
    }

    fn link_create_failed(&self, tmp: &EntityId, tmp_str: &str, err: &ApiError) {
        let tmp_entity = EntityRef::Link(tmp.clone());
        let removed = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            st.parked.remove(tmp_str);
            st.deleted_before_create.remove(tmp_str);
            st.tracks.retain(|k, _| k.entity != tmp_entity);
            if st.focused.as_ref().is_some_and(|f| f.entity == tmp_entity) {
                st.focused = None;
            }
            match st.draft.link_index(tmp) {
                Some(i) => {
                    st.draft.links.remove(i);
                    st.draft.renumber_links();
                    true
                }
                None => false,
            }
        };

        for field in [FieldName::Title, FieldName::Url] {
            self.coalescer.cancel(&FieldKey::link(tmp.clone(), field));
        }
        self.observer.field_error(
            &FieldKey::link(tmp.clone(), FieldName::Create),
            Some(&err.to_string()),
        );
        if removed {
            self.notify_draft();
        }
        self.persist_reorder_if_waiting();
    }

    pub(super) fn schedule_delete(&self, link: Link, index: usize) {
        let Some(id) = link.id.server_id() else {
            return;
        };
        let session = self.clone();
        let key = FieldKey::link(link.id.clone(), FieldName::Delete);
        self.coalescer
            .schedule(key, self.config.structural_debounce_ms, move || async move {
                session.commit_delete(id, link, index).await;
            });
    }

    async fn commit_delete(&self, id: u64, link: Link, index: usize) {
        if self.is_expired() {
            return;
        }

        match self.api.delete_link(id).await {
            Ok(()) => tracing::debug!(id, "link deleted"),
            Err(e) if e.is_auth_expired() => self.expire(),
            Err(e) => {
                tracing::warn!(id, error = %e, "delete link failed; restoring");
                let key = FieldKey::link(link.id.clone(), FieldName::Delete);
                {
                    let mut st = self.state.borrow_mut();
                    if st.draft.link(&link.id).is_none() {
                        let at = index.min(st.draft.links.len());
                        st.draft.links.insert(at, link);
                        st.draft.renumber_links();
                    }
                }
                self.observer.field_error(&key, Some(&e.to_string()));
                self.notify_draft();
            }
        }
    }

    /// Send the current link order, or wait while some link has no server id yet.
    pub(super) fn persist_link_order(&self) {
        let send = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            if st.draft.links.iter().any(|l| l.id.is_temp()) {
                st.reorder_waiting_for_create = true;
                tracing::debug!("reorder deferred until pending creates resolve");
                return;
            }
            st.reorder_waiting_for_create = false;
            match reorder::reorder_entries(&st.draft.links) {
                Ok(entries) => st.links_order.submit(entries),
                Err(e) => {
                    tracing::warn!(error = %e, "reorder not sent");
                    None
                }
            }
        };

        match send {
            Some(entries) => {
                let session = self.clone();
                self.scheduler.spawn(
                    async move { session.send_link_order(entries).await }.boxed_local(),
                );
            }
            None => tracing::debug!("reorder queued behind in-flight persist"),
        }
    }

    pub(super) fn persist_reorder_if_waiting(&self) {
        if self.state.borrow().reorder_waiting_for_create {
            self.persist_link_order();
        }
    }

    async fn send_link_order(&self, mut entries: Vec<ReorderEntry>) {
        let key = FieldKey::profile(FieldName::Order);
        loop {
            let result = self.api.reorder_links(&entries).await;
            match &result {
                Err(e) if e.is_auth_expired() => {
                    self.expire();
                    return;
                }
                Err(e) => tracing::warn!(error = %e, "reorder failed"),
                Ok(()) => tracing::debug!(links = entries.len(), "order saved"),
            }

            let settle = self.state.borrow_mut().links_order.settle(result.is_ok());
            match settle {
                Settle::Send(next) => entries = next,
                Settle::Confirmed => {
                    let had_error = self.state.borrow_mut().tracks.remove(&key).is_some();
                    if had_error {
                        self.observer.field_error(&key, None);
                    }
                    return;
                }
                Settle::Revert(baseline) => {
                    {
                        let mut st = self.state.borrow_mut();
                        reorder::apply_order(&mut st.draft.links, &baseline);
                        st.draft.renumber_links();
                        let order = serde_json::to_value(&baseline).unwrap_or_default();
                        st.tracks
                            .insert(key.clone(), FieldTrack::failed(order, REORDER_FAILED));
                    }
                    self.observer.field_error(&key, Some(REORDER_FAILED));
                    self.notify_draft();
                    return;
                }
            }
        }
    }
}

fn profile_patch(field: FieldName, value: &Value) -> ProfilePatch {
    let text = || value.as_str().map(str::to_string);
    match field {
        FieldName::Name => ProfilePatch {
            name: text(),
            ..Default::default()
        },
        FieldName::Bio => ProfilePatch {
            bio: text(),
            ..Default::default()
        },
        FieldName::Avatar => ProfilePatch {
            avatar: Some(value.clone()),
            ..Default::default()
        },
        FieldName::Design => ProfilePatch {
            design: Some(value.clone()),
            ..Default::default()
        },
        _ => ProfilePatch {
            social_icons: Some(value.clone()),
            ..Default::default()
        },
    }
}
