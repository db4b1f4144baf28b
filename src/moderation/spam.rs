//! Spam heuristics: repetition, link density, and sender bursts.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use super::{ContentCtx, ContentFilter, Decision};

/// Sliding window for repetition and burst tracking.
const WINDOW: Duration = Duration::from_secs(10);
/// Repeats of the same content inside the window before flagging.
const FLAG_REPEATS: usize = 2;
/// Repeats before blocking outright.
const BLOCK_REPEATS: usize = 4;
/// Messages from one sender inside the window before flagging as a burst.
const BURST_THRESHOLD: usize = 8;
/// Per-sender history cap.
const HISTORY_CAP: usize = 32;

/// Repetition / link-density / burst detector.
///
/// Keeps a short per-sender history of content hashes. Entries are pruned on
/// access; `cleanup` bounds total memory from the maintenance loop.
pub struct SpamFilter {
    recent: DashMap<i64, VecDeque<(Instant, u64)>>,
    max_links: usize,
}

impl SpamFilter {
    /// Create the filter with the configured link-density threshold.
    pub fn new(max_links: usize) -> Self {
        Self {
            recent: DashMap::new(),
            max_links,
        }
    }

    fn count_links(content: &str) -> usize {
        content
            .split_whitespace()
            .filter(|word| word.starts_with("http://") || word.starts_with("https://"))
            .count()
    }

    /// Record this message and count repetitions/burst in the window.
    fn observe(&self, principal_id: i64, content: &str) -> (usize, usize) {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        let hash = hasher.finish();
        let now = Instant::now();

        let mut history = self.recent.entry(principal_id).or_default();

        while let Some((t, _)) = history.front() {
            if now.duration_since(*t) > WINDOW {
                history.pop_front();
            } else {
                break;
            }
        }

        let repeats = history.iter().filter(|(_, h)| *h == hash).count();
        let in_window = history.len();

        history.push_back((now, hash));
        if history.len() > HISTORY_CAP {
            history.pop_front();
        }

        (repeats, in_window)
    }

    /// Drop per-sender state (on disconnect) to bound memory.
    pub fn forget(&self, principal_id: i64) {
        self.recent.remove(&principal_id);
    }
}

impl ContentFilter for SpamFilter {
    fn name(&self) -> &'static str {
        "spam"
    }

    fn inspect(&self, ctx: &ContentCtx<'_>) -> Decision {
        let (repeats, in_window) = self.observe(ctx.principal_id, ctx.content);

        if repeats >= BLOCK_REPEATS {
            return Decision::Block("repeated message".into());
        }
        if repeats >= FLAG_REPEATS {
            return Decision::Flag("repeated message".into());
        }

        if Self::count_links(ctx.content) > self.max_links {
            return Decision::Flag("excessive links".into());
        }

        if in_window >= BURST_THRESHOLD {
            return Decision::Flag("message burst".into());
        }

        Decision::Allow
    }

    fn maintain(&self) {
        // Senders grow unbounded across sessions; cap the table.
        const MAX_SENDERS: usize = 50_000;
        if self.recent.len() > MAX_SENDERS {
            self.recent.clear();
        }
    }
}
