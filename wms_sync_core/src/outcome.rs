use std::fmt;

/// A unit of work inside one sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Extract,
    CacheWindow,
    Aggregate,
    ReferenceTables,
    Products,
    Orders,
    OrderItems,
    WorkUnits,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::CacheWindow => "cache window",
            Self::Aggregate => "aggregate",
            Self::ReferenceTables => "reference tables",
            Self::Products => "products",
            Self::Orders => "orders",
            Self::OrderItems => "order items",
            Self::WorkUnits => "work units",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Succeeded { rows: u64 },
    /// Work committed, but some rows were skipped.
    Partial { rows: u64, errors: usize },
    Failed { error: String },
    Skipped { reason: String },
}

impl StageOutcome {
    pub fn from_counts(rows: u64, errors: usize) -> Self {
        if errors == 0 {
            Self::Succeeded { rows }
        } else {
            Self::Partial { rows, errors }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { rows } => write!(f, "ok | rows={rows}"),
            Self::Partial { rows, errors } => write!(f, "partial | rows={rows} | errors={errors}"),
            Self::Failed { error } => write!(f, "failed | {error}"),
            Self::Skipped { reason } => write!(f, "skipped | {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

impl StageReport {
    pub fn new(stage: Stage, outcome: StageOutcome) -> Self {
        Self { stage, outcome }
    }

    pub fn summary(&self) -> String {
        format!("{} | {}", self.stage, self.outcome)
    }

    /// Emit the one-line summary at a level matching the outcome.
    pub fn log(&self) {
        match &self.outcome {
            StageOutcome::Failed { .. } => tracing::error!("{}", self.summary()),
            StageOutcome::Partial { .. } => tracing::warn!("{}", self.summary()),
            _ => tracing::info!("{}", self.summary()),
        }
    }
}
