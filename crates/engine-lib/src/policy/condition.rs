//! Policy condition expressions
//!
//! Grammar: one or more `<metric> <op> <threshold>` clauses joined by `and`
//! (any case) or `&&`, with `op` one of `>`, `<`, `>=`, `<=`, `==`.
//! Expressions are parsed once at load time into a clause list.

use crate::error::ConditionError;
use crate::models::Anomaly;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
}

impl Comparison {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Lt => value < threshold,
            Comparison::Ge => value >= threshold,
            Comparison::Le => value <= threshold,
            Comparison::Eq => value == threshold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Lt => "<",
            Comparison::Ge => ">=",
            Comparison::Le => "<=",
            Comparison::Eq => "==",
        }
    }
}

/// `<metric> <op> <threshold>`
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub metric: String,
    pub op: Comparison,
    pub threshold: f64,
}

impl Clause {
    fn parse(text: &str) -> Result<Self, ConditionError> {
        let (position, op, width) =
            find_operator(text).ok_or_else(|| ConditionError::MissingOperator {
                clause: text.to_string(),
            })?;

        let metric = text[..position].trim();
        let threshold_text = text[position + width..].trim();

        if !is_metric_name(metric) {
            return Err(ConditionError::InvalidMetric {
                clause: text.to_string(),
            });
        }

        let invalid_threshold = || ConditionError::InvalidThreshold {
            clause: text.to_string(),
            threshold: threshold_text.to_string(),
        };
        let threshold: f64 = threshold_text.parse().map_err(|_| invalid_threshold())?;
        if !threshold.is_finite() {
            return Err(invalid_threshold());
        }

        Ok(Self {
            metric: metric.to_string(),
            op,
            threshold,
        })
    }

    /// Clause result for a value of `metric`; other metrics never satisfy it
    pub fn evaluate(&self, metric: &str, value: f64) -> bool {
        self.metric == metric && self.op.apply(value, self.threshold)
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.op.as_str(), self.threshold)
    }
}

/// Parsed condition: a conjunction of clauses
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    clauses: Vec<Clause>,
}

impl Condition {
    pub fn parse(expression: &str) -> Result<Self, ConditionError> {
        let normalized = expression.replace("&&", " and ");
        if normalized.trim().is_empty() {
            return Err(ConditionError::Empty);
        }

        let mut groups: Vec<Vec<&str>> = vec![Vec::new()];
        for token in normalized.split_whitespace() {
            if token.eq_ignore_ascii_case("and") {
                groups.push(Vec::new());
            } else if let Some(current) = groups.last_mut() {
                current.push(token);
            }
        }

        let clauses = groups
            .iter()
            .enumerate()
            .map(|(index, tokens)| {
                if tokens.is_empty() {
                    Err(ConditionError::EmptyClause { index })
                } else {
                    Clause::parse(&tokens.join(" "))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: expression.trim().to_string(),
            clauses,
        })
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against a single metric value
    pub fn evaluate_value(&self, metric: &str, value: f64) -> bool {
        self.clauses.iter().all(|c| c.evaluate(metric, value))
    }

    /// Evaluate against an anomaly's current value
    pub fn evaluate(&self, anomaly: &Anomaly) -> bool {
        self.evaluate_value(&anomaly.metric, anomaly.current_value)
    }

    /// Metrics referenced by the condition
    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|c| c.metric.as_str())
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// First comparison operator in `text`: (byte position, operator, width)
fn find_operator(text: &str) -> Option<(usize, Comparison, usize)> {
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        let next_is_eq = bytes.get(i + 1) == Some(&b'=');
        match b {
            b'>' if next_is_eq => return Some((i, Comparison::Ge, 2)),
            b'<' if next_is_eq => return Some((i, Comparison::Le, 2)),
            b'=' if next_is_eq => return Some((i, Comparison::Eq, 2)),
            b'>' => return Some((i, Comparison::Gt, 1)),
            b'<' => return Some((i, Comparison::Lt, 1)),
            _ => {}
        }
    }
    None
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
