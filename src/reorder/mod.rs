use crate::models::{EntityId, Link};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReorderError {
    #[error("index {index} is out of range for {len} items")]
    OutOfRange { index: usize, len: usize },
    #[error("link {0} has not been created yet")]
    UnsyncedEntity(EntityId),
}

/// One row of the batch reorder payload.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReorderEntry {
    pub id: u64,
    pub order: u32,
}

/// Move `items[from]` to index `to`, shifting everything in between.
pub fn move_item<T: Clone>(items: &[T], from: usize, to: usize) -> Result<Vec<T>, ReorderError> {
    let len = items.len();
    for index in [from, to] {
        if index >= len {
            return Err(ReorderError::OutOfRange { index, len });
        }
    }

    let mut out = items.to_vec();
    if from != to {
        let item = out.remove(from);
        out.insert(to, item);
    }
    Ok(out)
}

/// Full `(id, order)` mapping for the current vector order.
pub fn reorder_entries(links: &[Link]) -> Result<Vec<ReorderEntry>, ReorderError> {
    links
        .iter()
        .enumerate()
        .map(|(i, l)| match l.id {
            EntityId::Server(id) => Ok(ReorderEntry {
                id,
                order: i as u32,
            }),
            EntityId::Temp(_) => Err(ReorderError::UnsyncedEntity(l.id.clone())),
        })
        .collect()
}

fn entry_order(entries: &[ReorderEntry]) -> Vec<EntityId> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| e.order);
    sorted.into_iter().map(|e| EntityId::Server(e.id)).collect()
}

/// Restore `links` to `order`.
///
/// Links missing from `order` (created since) keep their relative order at the
/// end; ids in `order` that no longer exist are skipped.
pub fn apply_order(links: &mut Vec<Link>, order: &[EntityId]) {
    let mut out = Vec::with_capacity(links.len());
    for id in order {
        if let Some(pos) = links.iter().position(|l| &l.id == id) {
            out.push(links.remove(pos));
        }
    }
    out.append(links);
    *links = out;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settle {
    /// A newer mapping was waiting; send it now.
    Send(Vec<ReorderEntry>),
    /// The server holds the order the user sees.
    Confirmed,
    /// Persist failed; restore this order.
    Revert(Vec<EntityId>),
}

/// Serializes reorder persists for one collection and keeps the rollback order.
#[derive(Clone, Debug, Default)]
pub struct ReorderCoordinator {
    /// Order to restore if the chain fails: the last order the server
    /// accepted, or the order before the first unconfirmed drag.
    baseline: Option<Vec<EntityId>>,
    in_flight: Option<Vec<ReorderEntry>>,
    queued: Option<Vec<ReorderEntry>>,
}

impl ReorderCoordinator {
    /// Record the pre-drag order unless an unconfirmed drag already did.
    pub fn begin(&mut self, order_before_drag: Vec<EntityId>) {
        if self.baseline.is_none() {
            self.baseline = Some(order_before_drag);
        }
    }

    /// Returns the mapping to send now, or `None` if it waits for the persist in flight.
    pub fn submit(&mut self, entries: Vec<ReorderEntry>) -> Option<Vec<ReorderEntry>> {
        if self.in_flight.is_some() {
            self.queued = Some(entries);
            None
        } else {
            self.in_flight = Some(entries.clone());
            Some(entries)
        }
    }

    pub fn settle(&mut self, ok: bool) -> Settle {
        let sent = self.in_flight.take();
        if ok {
            // The server now holds `sent`; a later failure goes back to it.
            self.baseline = sent.map(|entries| entry_order(&entries));
        }
        if let Some(next) = self.queued.take() {
            self.in_flight = Some(next.clone());
            return Settle::Send(next);
        }
        let baseline = self.baseline.take();
        if ok {
            Settle::Confirmed
        } else {
            Settle::Revert(baseline.unwrap_or_default())
        }
    }

    pub fn has_unconfirmed(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn swap_id(&mut self, tmp_id: &EntityId, server_id: u64) {
        if let Some(baseline) = self.baseline.as_mut() {
            for id in baseline.iter_mut().filter(|id| *id == tmp_id) {
                *id = EntityId::Server(server_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LinkKind;
    use pretty_assertions::assert_eq;

    fn links(ids: &[u64]) -> Vec<Link> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Link {
                id: EntityId::Server(*id),
                title: format!("link {id}"),
                url: format!("https://{id}.example.com"),
                kind: LinkKind::Generic,
                position: i as u32,
            })
            .collect()
    }

    fn ids(links: &[Link]) -> Vec<u64> {
        links.iter().filter_map(|l| l.id.server_id()).collect()
    }

    #[test]
    fn test_move_item_to_front() {
        let moved = move_item(&links(&[1, 2, 7, 9]), 2, 0).expect("in range");
        assert_eq!(ids(&moved), vec![7, 1, 2, 9]);
    }

    #[test]
    fn test_move_item_to_back_and_noop() {
        let moved = move_item(&[1, 2, 3], 0, 2).expect("in range");
        assert_eq!(moved, vec![2, 3, 1]);
        assert_eq!(move_item(&[1, 2, 3], 1, 1).expect("in range"), vec![1, 2, 3]);
    }

    #[test]
    fn test_move_item_out_of_range() {
        assert_eq!(
            move_item(&[1, 2], 0, 2),
            Err(ReorderError::OutOfRange { index: 2, len: 2 })
        );
        assert_eq!(
            move_item::<u8>(&[], 0, 0),
            Err(ReorderError::OutOfRange { index: 0, len: 0 })
        );
    }

    #[test]
    fn test_reorder_entries_full_mapping() {
        let moved = move_item(&links(&[1, 2, 7, 9]), 2, 0).expect("in range");
        let entries = reorder_entries(&moved).expect("all ids are server ids");
        assert_eq!(
            entries,
            vec![
                ReorderEntry { id: 7, order: 0 },
                ReorderEntry { id: 1, order: 1 },
                ReorderEntry { id: 2, order: 2 },
                ReorderEntry { id: 9, order: 3 },
            ]
        );
    }

    #[test]
    fn test_reorder_entries_rejects_temp_ids() {
        let mut ls = links(&[1]);
        ls.push(Link {
            id: EntityId::Temp("tmp-1".into()),
            ..ls[0].clone()
        });
        assert_eq!(
            reorder_entries(&ls),
            Err(ReorderError::UnsyncedEntity(EntityId::Temp("tmp-1".into())))
        );
    }

    #[test]
    fn test_apply_order_restores_and_keeps_new_items() {
        let mut ls = links(&[7, 1, 5, 2]);
        let baseline: Vec<_> = [1, 2, 7, 9].into_iter().map(EntityId::Server).collect();
        apply_order(&mut ls, &baseline);
        // 9 was deleted meanwhile, 5 was created meanwhile.
        assert_eq!(ids(&ls), vec![1, 2, 7, 5]);
    }

    #[test]
    fn test_single_failed_persist_reverts_to_pre_drag_order() {
        let mut c = ReorderCoordinator::default();
        let before: Vec<_> = [1, 2, 7, 9].into_iter().map(EntityId::Server).collect();
        c.begin(before.clone());
        assert!(c.submit(vec![ReorderEntry { id: 7, order: 0 }]).is_some());
        assert_eq!(c.settle(false), Settle::Revert(before));
        assert!(!c.has_unconfirmed());
        // Nothing is in flight any more.
        assert!(c.submit(vec![]).is_some());
    }

    fn entries(ids: &[u64]) -> Vec<ReorderEntry> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| ReorderEntry {
                id: *id,
                order: i as u32,
            })
            .collect()
    }

    fn server_ids(ids: &[u64]) -> Vec<EntityId> {
        ids.iter().copied().map(EntityId::Server).collect()
    }

    #[test]
    fn test_second_drag_waits_for_first_persist() {
        let mut c = ReorderCoordinator::default();
        c.begin(server_ids(&[1, 2, 3]));
        assert!(c.submit(entries(&[2, 1, 3])).is_some());

        // Second drag: baseline stays at the first pre-drag order.
        c.begin(server_ids(&[2, 1, 3]));
        assert_eq!(c.submit(entries(&[2, 3, 1])), None);
        // Third drag replaces the queued mapping.
        assert_eq!(c.submit(entries(&[1, 2, 3])), None);

        assert_eq!(c.settle(true), Settle::Send(entries(&[1, 2, 3])));
        // The first mapping was accepted, so that is what a failure restores.
        assert_eq!(c.settle(false), Settle::Revert(server_ids(&[2, 1, 3])));
        assert!(!c.has_unconfirmed());
    }

    #[test]
    fn test_failed_persist_with_queued_mapping_keeps_original_baseline() {
        let mut c = ReorderCoordinator::default();
        c.begin(server_ids(&[1, 2, 3]));
        c.submit(entries(&[2, 1, 3]));
        c.begin(server_ids(&[2, 1, 3]));
        c.submit(entries(&[3, 2, 1]));

        assert_eq!(c.settle(false), Settle::Send(entries(&[3, 2, 1])));
        assert_eq!(c.settle(false), Settle::Revert(server_ids(&[1, 2, 3])));
    }

    #[test]
    fn test_confirmed_chain_ends_clean() {
        let mut c = ReorderCoordinator::default();
        c.begin(server_ids(&[1, 2]));
        c.submit(entries(&[2, 1]));
        c.submit(entries(&[1, 2]));
        assert_eq!(c.settle(true), Settle::Send(entries(&[1, 2])));
        assert_eq!(c.settle(true), Settle::Confirmed);
        assert!(!c.has_unconfirmed());
    }

    #[test]
    fn test_confirmed_persist_clears_baseline() {
        let mut c = ReorderCoordinator::default();
        c.begin(vec![EntityId::Server(1)]);
        c.submit(vec![]);
        assert_eq!(c.settle(true), Settle::Confirmed);
        assert!(!c.has_unconfirmed());
    }

    #[test]
    fn test_swap_id_rewrites_baseline() {
        let mut c = ReorderCoordinator::default();
        let tmp = EntityId::Temp("tmp-1".into());
        c.begin(vec![EntityId::Server(1), tmp.clone()]);
        c.swap_id(&tmp, 8);
        c.submit(vec![]);
        assert_eq!(
            c.settle(false),
            Settle::Revert(vec![EntityId::Server(1), EntityId::Server(8)])
        );
    }
}
