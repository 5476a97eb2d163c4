//! Alert delivery seam.
//!
//! The monitor talks to a chat system through two calls: post a new embed,
//! or update the one already posted for a tile. Actual delivery is out of
//! scope; the shipped sink prints the simulated embed calls so an operator
//! tailing the process sees exactly what would have gone out.

/// Embed color for a degradation alert.
pub const DEGRADATION_COLOR: &str = "#E74C3C";
/// Embed color for a suspicion alert.
pub const SUSPICION_COLOR: &str = "#F1C40F";

pub trait AlertSink: Send + Sync {
    /// Posts a new embed.
    fn send(&self, title: &str, description: &str, color: &str);

    /// Updates the previously posted embed for the same tile.
    fn update(&self, title: &str, description: &str, color: &str);
}

/// Prints simulated embed calls to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl AlertSink for ConsoleSink {
    fn send(&self, title: &str, description: &str, color: &str) {
        println!("embed send: {title} | {description} | color={color}");
    }

    fn update(&self, title: &str, description: &str, color: &str) {
        println!("embed update: {title} | {description} | color={color}");
    }
}

#[cfg(test)]
pub mod testing {
    use super::AlertSink;
    use std::sync::Mutex;

    /// Records every sink call, for scheduler and tracker tests.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub calls: Mutex<Vec<RecordedAlert>>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedAlert {
        pub kind: &'static str,
        pub title: String,
        pub description: String,
        pub color: String,
    }

    impl RecordingSink {
        pub fn take(&self) -> Vec<RecordedAlert> {
            std::mem::take(&mut self.calls.lock().unwrap())
        }
    }

    impl AlertSink for RecordingSink {
        fn send(&self, title: &str, description: &str, color: &str) {
            self.calls.lock().unwrap().push(RecordedAlert {
                kind: "send",
                title: title.to_string(),
                description: description.to_string(),
                color: color.to_string(),
            });
        }

        fn update(&self, title: &str, description: &str, color: &str) {
            self.calls.lock().unwrap().push(RecordedAlert {
                kind: "update",
                title: title.to_string(),
                description: description.to_string(),
                color: color.to_string(),
            });
        }
    }
}
