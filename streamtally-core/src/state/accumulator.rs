use super::*;

/// The aggregate function a query computes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum AggregateSpec {
    Count,
    Sum { field: String },
    Min { field: String },
    Max { field: String },
}

impl AggregateSpec {
    pub fn sum(field: impl Into<String>) -> Self {
        Self::Sum {
            field: field.into(),
        }
    }

    pub fn min(field: impl Into<String>) -> Self {
        Self::Min {
            field: field.into(),
        }
    }

    pub fn max(field: impl Into<String>) -> Self {
        Self::Max {
            field: field.into(),
        }
    }

    pub fn kind(&self) -> AggregateKind {
        match self {
            Self::Count => AggregateKind::Count,
            Self::Sum { .. } => AggregateKind::Sum,
            Self::Min { .. } => AggregateKind::Min,
            Self::Max { .. } => AggregateKind::Max,
        }
    }

    /// The numeric field being aggregated, if any.
    pub fn measure_field(&self) -> Option<&str> {
        match self {
            Self::Count => None,
            Self::Sum { field } | Self::Min { field } | Self::Max { field } => Some(field),
        }
    }
}

impl std::fmt::Display for AggregateSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.measure_field() {
            None => write!(f, "{}", self.kind()),
            Some(field) => write!(f, "{}({field})", self.kind()),
        }
    }
}

/// Parses `count`, `sum(field)`, `min(field)`, `max(field)`.
impl std::str::FromStr for AggregateSpec {
    type Err = QueryError;

    fn from_str(s: &str) -> QueryResult<Self> {
        let s = s.trim();
        let (name, arg) = match s.find('(') {
            Some(open) => {
                let arg = s[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| QueryError::config(format!("unbalanced aggregate '{s}'")))?
                    .trim();
                (&s[..open], Some(arg))
            }
            None => (s, None),
        };
        match (name.trim().to_ascii_lowercase().as_str(), arg) {
            ("count", None) | ("count", Some("")) | ("count", Some("*")) => Ok(Self::Count),
            ("sum", Some(f)) if !f.is_empty() => Ok(Self::sum(f)),
            ("min", Some(f)) if !f.is_empty() => Ok(Self::min(f)),
            ("max", Some(f)) if !f.is_empty() => Ok(Self::max(f)),
            _ => Err(QueryError::config(format!("unknown aggregate '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
}

impl std::fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
        })
    }
}

/// Exact running total of `f64` values.
///
/// The total is held as non-overlapping partials (Shewchuk's algorithm) whose
/// exact sum is the sum of every value added. [`ExactSum::value`] rounds that
/// exact sum once, so the result does not depend on the order or grouping in
/// which values arrived.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExactSum {
    /// Increasing in magnitude, never zero.
    partials: Vec<f64>,
    /// Sum of non-finite inputs and of partials that overflowed.
    special: f64,
}

impl ExactSum {
    pub fn of(value: f64) -> Self {
        let mut sum = Self::default();
        sum.add(value);
        sum
    }

    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            self.special += value;
            return;
        }
        let mut x = value;
        let mut kept = 0;
        for j in 0..self.partials.len() {
            let mut y = self.partials[j];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let hi = x + y;
            if !hi.is_finite() {
                self.partials.truncate(kept);
                self.special += hi;
                return;
            }
            let lo = y - (hi - x);
            if lo != 0.0 {
                self.partials[kept] = lo;
                kept += 1;
            }
            x = hi;
        }
        self.partials.truncate(kept);
        if x != 0.0 {
            self.partials.push(x);
        }
    }

    /// Combine with another exact sum without losing precision.
    pub fn merged(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for &partial in &other.partials {
            out.add(partial);
        }
        out.special += other.special;
        out
    }

    /// The exact total, correctly rounded to the nearest `f64`.
    pub fn value(&self) -> f64 {
        if self.special != 0.0 {
            return self.special;
        }
        let p = &self.partials;
        let Some(mut n) = p.len().checked_sub(1) else {
            return 0.0;
        };
        let mut hi = p[n];
        let mut lo = 0.0;
        while n > 0 {
            let x = hi;
            n -= 1;
            let y = p[n];
            hi = x + y;
            lo = y - (hi - x);
            if lo != 0.0 {
                break;
            }
        }
        // Round half-even across the remaining partials.
        if n > 0 && ((lo < 0.0 && p[n - 1] < 0.0) || (lo > 0.0 && p[n - 1] > 0.0)) {
            let y = lo * 2.0;
            let x = hi + y;
            if y == x - hi {
                hi = x;
            }
        }
        hi
    }
}

impl PartialEq for ExactSum {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

/// A mergeable aggregate value.
///
/// `merge` is associative and commutative, and [`Accumulator::identity`] is
/// its neutral element, so the result of merging a set of contributions does
/// not depend on how they were split into batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Accumulator {
    Count(u64),
    Sum(ExactSum),
    Min(Option<f64>),
    Max(Option<f64>),
}

impl Accumulator {
    pub fn identity(kind: AggregateKind) -> Self {
        match kind {
            AggregateKind::Count => Self::Count(0),
            AggregateKind::Sum => Self::Sum(ExactSum::default()),
            AggregateKind::Min => Self::Min(None),
            AggregateKind::Max => Self::Max(None),
        }
    }

    /// A sum holding the single value `value`.
    pub fn sum(value: f64) -> Self {
        Self::Sum(ExactSum::of(value))
    }

    /// The contribution of a single event.
    ///
    /// A missing measure contributes the identity, except for counts which
    /// count the event itself.
    pub fn of_event(kind: AggregateKind, measure: Option<f64>) -> Self {
        match kind {
            AggregateKind::Count => Self::Count(1),
            AggregateKind::Sum => Self::sum(measure.unwrap_or(0.0)),
            AggregateKind::Min => Self::Min(measure),
            AggregateKind::Max => Self::Max(measure),
        }
    }

    pub fn kind(&self) -> AggregateKind {
        match self {
            Self::Count(_) => AggregateKind::Count,
            Self::Sum(_) => AggregateKind::Sum,
            Self::Min(_) => AggregateKind::Min,
            Self::Max(_) => AggregateKind::Max,
        }
    }

    /// Combine two accumulators of the same kind.
    pub fn merge(&self, other: &Self) -> QueryResult<Self> {
        let merged = match (self, other) {
            (Self::Count(a), Self::Count(b)) => Self::Count(a.saturating_add(*b)),
            (Self::Sum(a), Self::Sum(b)) => Self::Sum(a.merged(b)),
            (Self::Min(a), Self::Min(b)) => Self::Min(combine(*a, *b, f64::min)),
            (Self::Max(a), Self::Max(b)) => Self::Max(combine(*a, *b, f64::max)),
            (a, b) => {
                return Err(QueryError::config(format!(
                    "cannot merge {} accumulator into {}",
                    b.kind(),
                    a.kind()
                )))
            }
        };
        Ok(merged)
    }

    /// Numeric view of the value; `None` for an empty min/max.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Count(n) => Some(*n as f64),
            Self::Sum(sum) => Some(sum.value()),
            Self::Min(v) | Self::Max(v) => *v,
        }
    }
}

impl std::fmt::Display for Accumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::Sum(sum) => write!(f, "{}", sum.value()),
            Self::Min(Some(v)) | Self::Max(Some(v)) => write!(f, "{v}"),
            Self::Min(None) | Self::Max(None) => f.write_str("null"),
        }
    }
}

fn combine(a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}
