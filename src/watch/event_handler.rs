// src/watch/event_handler.rs

//! Translating raw `notify` events into the two change classes the watcher
//! cares about.

use notify::event::{EventKind, ModifyKind};
use notify::Event;
use std::path::PathBuf;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Created, removed or renamed: the matched-file set may have changed.
    Rename,
    /// Contents or metadata changed in place.
    Modify,
}

/// Classify a `notify` event. Access events and unknown kinds are dropped.
pub fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => Some(ChangeKind::Rename),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Rename),
        EventKind::Modify(_) => Some(ChangeKind::Modify),
        EventKind::Any => Some(ChangeKind::Modify),
        EventKind::Access(_) | EventKind::Other => None,
    }
}

/// Every `(path, kind)` pair carried by `event`.
pub fn changes(event: Event) -> Vec<(PathBuf, ChangeKind)> {
    let Some(kind) = classify(&event.kind) else {
        return Vec::new();
    };
    event.paths.into_iter().map(|p| (p, kind)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RenameMode};

    #[test]
    fn create_remove_and_rename_are_rename_class() {
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Rename)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            Some(ChangeKind::Rename)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(ChangeKind::Modify)
        );
        assert_eq!(classify(&EventKind::Access(AccessKind::Any)), None);
    }

    #[test]
    fn changes_fans_out_paths() {
        let event = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/ws/a.ts"))
            .add_path(PathBuf::from("/ws/b.ts"));
        let out = changes(event);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|(_, k)| *k == ChangeKind::Rename));
    }
}
