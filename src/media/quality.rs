//! Adaptive quality
//!
//! Loss is measured over windows of packets. A lossy window steps the
//! preferred quality down one level; a clean window steps it back up.

/// Default number of packets per measurement window
pub const DEFAULT_QUALITY_WINDOW: u64 = 100;

/// Loss ratio above which quality steps down
pub const DEGRADE_LOSS_RATIO: f64 = 0.10;

/// Loss ratio below which quality steps up
pub const RECOVER_LOSS_RATIO: f64 = 0.02;

/// Preferred quality of the video track
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityLevel {
    /// Lowest layer the sender offers
    Low,
    /// Intermediate layer
    Medium,
    /// Full quality
    High,
}

impl QualityLevel {
    fn lower(self) -> Self {
        match self {
            QualityLevel::High => QualityLevel::Medium,
            QualityLevel::Medium | QualityLevel::Low => QualityLevel::Low,
        }
    }

    fn higher(self) -> Self {
        match self {
            QualityLevel::Low => QualityLevel::Medium,
            QualityLevel::Medium | QualityLevel::High => QualityLevel::High,
        }
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityLevel::Low => write!(f, "low"),
            QualityLevel::Medium => write!(f, "medium"),
            QualityLevel::High => write!(f, "high"),
        }
    }
}

/// Tracks packet loss and picks a quality level
#[derive(Debug)]
pub struct QualityMonitor {
    level: QualityLevel,
    window: u64,
    received: u64,
    lost: u64,
}

impl QualityMonitor {
    /// Create a monitor starting at high quality
    pub fn new() -> Self {
        Self::with_window(DEFAULT_QUALITY_WINDOW)
    }

    /// Create a monitor with a custom window size
    pub fn with_window(window: u64) -> Self {
        Self {
            level: QualityLevel::High,
            window: window.max(1),
            received: 0,
            lost: 0,
        }
    }

    /// Current level
    pub fn level(&self) -> QualityLevel {
        self.level
    }

    /// Record a received packet
    ///
    /// Returns the new level if it changed.
    pub fn on_received(&mut self) -> Option<QualityLevel> {
        self.received += 1;
        self.evaluate()
    }

    /// Record lost packets
    ///
    /// Returns the new level if it changed.
    pub fn on_lost(&mut self, count: u64) -> Option<QualityLevel> {
        self.lost = self.lost.saturating_add(count);
        self.evaluate()
    }

    fn evaluate(&mut self) -> Option<QualityLevel> {
        let total = self.received + self.lost;
        if total < self.window {
            return None;
        }

        let ratio = self.lost as f64 / total as f64;
        self.received = 0;
        self.lost = 0;

        let next = if ratio > DEGRADE_LOSS_RATIO {
            self.level.lower()
        } else if ratio < RECOVER_LOSS_RATIO {
            self.level.higher()
        } else {
            self.level
        };

        if next == self.level {
            return None;
        }
        self.level = next;
        Some(next)
    }
}

impl Default for QualityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
