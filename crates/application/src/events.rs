//! In-memory operation log and counters per manager.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Delete,
    Start,
    Stop,
}

impl OperationKind {
    pub fn verb(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Delete => "delete",
            OperationKind::Start => "start",
            OperationKind::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationEvent {
    pub kind: OperationKind,
    pub name: String,
    pub failed: bool,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Default, Clone)]
pub struct ManagerStats {
    pub creates: u64,
    pub deletes: u64,
    pub starts: u64,
    pub stops: u64,
    pub failures: u64,
}

/// Ring-buffered event history plus counters, recorded from every
/// operation's completion.
pub struct OperationLog {
    capacity: usize,
    events: Mutex<Vec<OperationEvent>>,
    stats: Mutex<ManagerStats>,
}

impl OperationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(10),
            events: Mutex::new(Vec::new()),
            stats: Mutex::new(ManagerStats::default()),
        }
    }

    pub fn record(&self, kind: OperationKind, name: &str, failed: bool) {
        let message = if failed {
            format!("{} of {} failed", kind.verb(), name)
        } else {
            format!("{} of {} completed", kind.verb(), name)
        };
        {
            let mut events = self.events.lock().unwrap();
            events.push(OperationEvent {
                kind,
                name: name.to_string(),
                failed,
                timestamp: Utc::now(),
                message,
            });
            if events.len() > self.capacity {
                let overflow = self.capacity / 10;
                events.drain(0..overflow);
            }
        }
        let mut stats = self.stats.lock().unwrap();
        match kind {
            OperationKind::Create => stats.creates += 1,
            OperationKind::Delete => stats.deletes += 1,
            OperationKind::Start => stats.starts += 1,
            OperationKind::Stop => stats.stops += 1,
        }
        if failed {
            stats.failures += 1;
        }
    }

    /// Most recent first.
    pub fn recent(&self, limit: Option<usize>) -> Vec<OperationEvent> {
        let events = self.events.lock().unwrap();
        match limit {
            Some(limit) => events.iter().rev().take(limit).cloned().collect(),
            None => events.iter().rev().cloned().collect(),
        }
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_updates_stats_and_history() {
        let log = OperationLog::new(100);
        log.record(OperationKind::Create, "alice", false);
        log.record(OperationKind::Start, "alice", true);

        let stats = log.stats();
        assert_eq!(stats.creates, 1);
        assert_eq!(stats.starts, 1);
        assert_eq!(stats.failures, 1);

        let recent = log.recent(Some(1));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, OperationKind::Start);
        assert!(recent[0].failed);
    }

    #[test]
    fn history_is_ring_buffered() {
        let log = OperationLog::new(10);
        for i in 0..25 {
            log.record(OperationKind::Stop, &format!("r{i}"), false);
        }
        assert!(log.recent(None).len() <= 11);
        assert_eq!(log.stats().stops, 25);
    }
}
