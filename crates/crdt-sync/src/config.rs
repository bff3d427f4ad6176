/// Engine behavior switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Ask each newly connected peer for the session while uninitialized.
    pub request_on_connect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_on_connect: true,
        }
    }
}
