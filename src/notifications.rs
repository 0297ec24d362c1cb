//! `NotificationSink`: the contract the Scheduler's quiescence check calls
//! into. Discord and Pushover sinks are out of scope for this crate — only
//! the trait and the tally type it's
//! invoked with live here, so the contract is compilable and testable with
//! a mock sink, the same way `JobStore` is a contract with no production
//! backend shipped in this crate.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuiescenceTally {
    pub completed: u32,
    pub failed: u32,
}

pub trait NotificationSink: Send + Sync {
    fn notify_quiescent(&self, tally: QuiescenceTally);
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct RecordingSink {
        pub calls: Mutex<Vec<QuiescenceTally>>,
    }

    impl NotificationSink for RecordingSink {
        fn notify_quiescent(&self, tally: QuiescenceTally) {
            self.calls.lock().unwrap().push(tally);
        }
    }
}
