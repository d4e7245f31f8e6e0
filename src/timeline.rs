//! Per-plant history feed. Journal entries and photos merge into one stream,
//! newest first. A photo attached to a journal entry is folded into that
//! entry as its `photo_url` rather than appearing on its own.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::journal::{JournalEntry, JournalStore};
use crate::photos::{Photo, PhotoStore};
use crate::session::Session;
use crate::storage::PhotoStorage;
use crate::Result;

#[derive(Debug, Clone, Serialize)]
pub struct JournalEvent {
    pub id: i32,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoEvent {
    pub id: i32,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum TimelineItem {
    Journal(JournalEvent),
    Photo(PhotoEvent),
}

impl TimelineItem {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimelineItem::Journal(event) => event.created_at,
            TimelineItem::Photo(event) => event.uploaded_at,
        }
    }

    // Journal entries sort above photos at the same instant so the note
    // reads before the snapshot it describes.
    fn rank(&self) -> u8 {
        match self {
            TimelineItem::Journal(_) => 1,
            TimelineItem::Photo(_) => 0,
        }
    }

    fn id(&self) -> i32 {
        match self {
            TimelineItem::Journal(event) => event.id,
            TimelineItem::Photo(event) => event.id,
        }
    }
}

/// Pure merge over already-fetched rows. `resolve_url` turns a storage path
/// into something a caller can open. A photo whose parent entry is not in
/// `journals` (the entry was deleted, say) falls back to a standalone item so
/// every photo surfaces exactly once.
pub fn merge_plant_timeline(
    journals: Vec<JournalEntry>,
    photos: Vec<Photo>,
    resolve_url: impl Fn(&str) -> String,
) -> Vec<TimelineItem> {
    let journal_ids: HashSet<i32> = journals.iter().map(|entry| entry.id).collect();

    // Of several photos attached to one entry, the earliest upload wins.
    let mut attached: HashMap<i32, &Photo> = HashMap::new();
    for photo in &photos {
        let Some(journal_id) = photo.journal_id else {
            continue;
        };
        if !journal_ids.contains(&journal_id) {
            continue;
        }
        match attached.get(&journal_id) {
            Some(existing) if existing.uploaded_at <= photo.uploaded_at => {}
            _ => {
                attached.insert(journal_id, photo);
            }
        }
    }

    let mut items: Vec<TimelineItem> = Vec::with_capacity(journals.len() + photos.len());
    for entry in journals {
        let photo_url = attached
            .get(&entry.id)
            .map(|photo| resolve_url(&photo.storage_path));
        items.push(TimelineItem::Journal(JournalEvent {
            id: entry.id,
            text: entry.text,
            created_at: entry.created_at,
            photo_url,
        }));
    }
    let standalone = photos.iter().filter(|photo| match photo.journal_id {
        None => true,
        Some(journal_id) => !journal_ids.contains(&journal_id),
    });
    for photo in standalone {
        items.push(TimelineItem::Photo(PhotoEvent {
            id: photo.id,
            url: resolve_url(&photo.storage_path),
            uploaded_at: photo.uploaded_at,
        }));
    }

    items.sort_by(|a, b| {
        b.timestamp()
            .cmp(&a.timestamp())
            .then_with(|| b.rank().cmp(&a.rank()))
            .then_with(|| b.id().cmp(&a.id()))
    });
    items
}

/// Fetches and merges one plant's full history.
pub async fn plant_timeline(
    journal_store: &JournalStore,
    photo_store: &PhotoStore,
    photo_storage: &PhotoStorage,
    session: &Session,
    plant_id: i32,
) -> Result<Vec<TimelineItem>> {
    let journals = journal_store.entries_for_plant(session, plant_id).await?;
    let photos = photo_store.photos_for_plant(session, plant_id).await?;
    Ok(merge_plant_timeline(journals, photos, |path| {
        photo_storage.public_url(path)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    fn entry(id: i32, text: &str, created_at: DateTime<Utc>) -> JournalEntry {
        JournalEntry {
            id,
            plant_id: 1,
            text: text.to_string(),
            created_at,
        }
    }

    fn photo(id: i32, journal_id: Option<i32>, uploaded_at: DateTime<Utc>) -> Photo {
        Photo {
            id,
            plant_id: 1,
            journal_id,
            storage_path: format!("u1/1/{id}.jpg"),
            uploaded_at,
        }
    }

    #[test]
    fn merges_newest_first_with_attached_photos_folded_in() {
        let journals = vec![
            entry(1, "Sprouted", at(1, 9)),
            entry(2, "First true leaves", at(5, 9)),
        ];
        let photos = vec![
            photo(10, Some(2), at(5, 10)),
            photo(11, None, at(3, 12)),
        ];

        let items = merge_plant_timeline(journals, photos, |path| format!("file:///{path}"));
        assert_eq!(items.len(), 3);

        let TimelineItem::Journal(leaves) = &items[0] else {
            panic!("expected the newest journal entry first");
        };
        assert_eq!(leaves.id, 2);
        assert_eq!(leaves.photo_url.as_deref(), Some("file:///u1/1/10.jpg"));

        let TimelineItem::Photo(standalone) = &items[1] else {
            panic!("expected the standalone photo second");
        };
        assert_eq!(standalone.id, 11);
        assert_eq!(standalone.url, "file:///u1/1/11.jpg");

        let TimelineItem::Journal(sprouted) = &items[2] else {
            panic!("expected the oldest entry last");
        };
        assert_eq!(sprouted.id, 1);
        assert!(sprouted.photo_url.is_none());
    }

    #[test]
    fn attached_photos_never_appear_standalone() {
        let journals = vec![entry(1, "Repotted", at(2, 9))];
        let photos = vec![photo(10, Some(1), at(2, 10))];

        let items = merge_plant_timeline(journals, photos, |p| p.to_string());
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], TimelineItem::Journal(e) if e.photo_url.is_some()));
    }

    #[test]
    fn earliest_attached_photo_wins() {
        let journals = vec![entry(1, "Flowering", at(4, 9))];
        let photos = vec![
            photo(12, Some(1), at(4, 12)),
            photo(10, Some(1), at(4, 10)),
        ];

        let items = merge_plant_timeline(journals, photos, |p| p.to_string());
        assert_eq!(items.len(), 1);
        let TimelineItem::Journal(event) = &items[0] else {
            panic!("expected a journal item");
        };
        assert_eq!(event.photo_url.as_deref(), Some("u1/1/10.jpg"));
    }

    #[test]
    fn a_photo_whose_parent_entry_is_gone_surfaces_standalone() {
        let journals = vec![entry(1, "Sprouted", at(1, 9))];
        // Entry 99 was deleted; its photo row kept a dangling parent id.
        let photos = vec![photo(10, Some(99), at(2, 10))];

        let items = merge_plant_timeline(journals, photos, |p| p.to_string());
        assert_eq!(items.len(), 2);
        let TimelineItem::Photo(orphan) = &items[0] else {
            panic!("expected the orphaned photo as a standalone item");
        };
        assert_eq!(orphan.id, 10);
        assert!(matches!(&items[1], TimelineItem::Journal(e) if e.photo_url.is_none()));
    }

    #[test]
    fn ties_break_deterministically() {
        let journals = vec![entry(1, "Noon note", at(1, 12))];
        let photos = vec![photo(10, None, at(1, 12)), photo(11, None, at(1, 12))];

        let first = merge_plant_timeline(journals.clone(), photos.clone(), |p| p.to_string());
        let second = merge_plant_timeline(journals, photos, |p| p.to_string());

        let ids: Vec<i32> = first.iter().map(|i| i.id()).collect();
        assert_eq!(ids, second.iter().map(|i| i.id()).collect::<Vec<_>>());
        // The note outranks same-instant photos; photos fall back to id order.
        assert!(matches!(first[0], TimelineItem::Journal(_)));
        assert_eq!(ids, vec![1, 11, 10]);
    }

    #[test]
    fn empty_inputs_yield_an_empty_feed() {
        assert!(merge_plant_timeline(Vec::new(), Vec::new(), |p| p.to_string()).is_empty());
    }

    #[test]
    fn serializes_with_a_type_tag() {
        let items = merge_plant_timeline(
            vec![entry(1, "Sprouted", at(1, 9))],
            Vec::new(),
            |p| p.to_string(),
        );
        let json = serde_json::to_value(&items).expect("json");
        assert_eq!(json[0]["type"], "journal");
        assert_eq!(json[0]["data"]["text"], "Sprouted");
    }
}
