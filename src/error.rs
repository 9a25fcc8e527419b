// =============================================================================
// Error kinds — the four-way classification of spec §7
// =============================================================================
//
// Market-data and AI failures are caught at the component boundary and
// translated into one of these; phases then decide whether to skip an item,
// continue in a degraded mode, or abort outright. A plain enum + `Display`
// pairing rather than reaching for a `thiserror` derive.
// =============================================================================

/// Classification of a failure encountered while running a phase or the
/// monitor. See spec §7 for the propagation policy attached to each kind.
#[derive(Debug, Clone)]
pub enum TraderError {
    /// A single provider call failed; the caller skips that datum.
    RecoverableData(String),
    /// The scan or analysis completed with missing market context; the
    /// phase records a placeholder and continues.
    Degraded(String),
    /// A precondition failed (no scan today, store unavailable); the phase
    /// emits an `error` progress event and returns without partial writes.
    AbortPhase(String),
    /// Store initialization failed; the trader refuses to enable.
    Fatal(String),
}

impl TraderError {
    pub fn message(&self) -> &str {
        match self {
            Self::RecoverableData(m)
            | Self::Degraded(m)
            | Self::AbortPhase(m)
            | Self::Fatal(m) => m,
        }
    }
}

impl std::fmt::Display for TraderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecoverableData(m) => write!(f, "recoverable data error: {m}"),
            Self::Degraded(m) => write!(f, "degraded: {m}"),
            Self::AbortPhase(m) => write!(f, "abort phase: {m}"),
            Self::Fatal(m) => write!(f, "fatal: {m}"),
        }
    }
}

impl std::error::Error for TraderError {}
