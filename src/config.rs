//! Configuration for a [`crate::sequencer::Sequencer`] instance.

/// Static configuration fixed at construction time.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Config {
    /// The value `pc` takes on reset.
    pub reset_vector: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self { reset_vector: 0 }
    }
}
