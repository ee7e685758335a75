use std::sync::atomic::{AtomicUsize, Ordering};

use uuid::Uuid;

/// Literal every render target id starts with.
pub const ID_PREFIX: &str = "mermaid";

/// Names render targets so the library can address them.
pub trait IdGenerator {
    /// A value not handed out before by this process.
    fn next_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Counts up from zero, for output that must not change between runs.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicUsize,
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        self.next.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn uuid_ids_are_unique_and_id_safe() {
        let ids = (0..100).map(|_| UuidIds.next_id()).collect::<HashSet<_>>();

        assert_eq!(ids.len(), 100);
        assert!(ids
            .iter()
            .all(|id| id.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn sequential_ids_count_up() {
        let ids = SequentialIds::default();

        assert_eq!(ids.next_id(), "0");
        assert_eq!(ids.next_id(), "1");
    }
}
