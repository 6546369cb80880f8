//! Status reporting for the watcher and processor.
//!
//! Observers receive one plain message per notable transition: the watch
//! starting or stopping, a record being detected, and each extraction
//! starting, succeeding or failing. There are no severity levels.

use std::sync::Arc;

/// Something that wants to hear about processing progress.
pub trait StatusObserver: Send + Sync + 'static {
    fn report(&self, message: &str);
}

/// Shared observer handle.
pub type SharedObserver = Arc<dyn StatusObserver>;

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// An observer that remembers everything it was told.
    #[derive(Default)]
    pub struct RecordingObserver {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        pub fn messages(&self) -> Vec<String> {
            self.messages.lock().expect("lock poisoned").clone()
        }

        /// Did any message contain `needle`?
        pub fn saw(&self, needle: &str) -> bool {
            self.messages().iter().any(|m| m.contains(needle))
        }
    }

    impl StatusObserver for RecordingObserver {
        fn report(&self, message: &str) {
            self.messages
                .lock()
                .expect("lock poisoned")
                .push(message.to_owned());
        }
    }
}
