use serde::{Deserialize, Serialize};

use super::model::Spectrum;
use crate::error::{Result, StackingError};

// ---------------------------------------------------------------------------
// Split definition: which metadata columns are cut, and where
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitType {
    /// Every column is split on its own; a spectrum can join one group per column.
    #[default]
    Or,
    /// Groups are the cartesian product of all column intervals; a spectrum
    /// joins at most one group.
    And,
}

/// Cuts on metadata columns. `intervals[k]` holds the edges for `on[k]`;
/// interval `n` is `[edges[n], edges[n + 1])`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitConfig {
    pub on: Vec<String>,
    pub intervals: Vec<Vec<f64>>,
    #[serde(rename = "type", default)]
    pub split_type: SplitType,
}

impl SplitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.on.is_empty() {
            return Err(StackingError::Config(
                "[stacker.split] 'on' needs at least one column".into(),
            ));
        }
        if self.on.len() != self.intervals.len() {
            return Err(StackingError::Config(format!(
                "[stacker.split] 'on' names {} columns but 'intervals' has {} edge lists",
                self.on.len(),
                self.intervals.len()
            )));
        }
        for (column, edges) in self.on.iter().zip(&self.intervals) {
            if edges.len() < 2 {
                return Err(StackingError::Config(format!(
                    "[stacker.split] column '{column}' needs at least two edges"
                )));
            }
            if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[1] <= w[0]) {
                return Err(StackingError::Config(format!(
                    "[stacker.split] edges for column '{column}' must be finite and \
                     strictly increasing, found {edges:?}"
                )));
            }
        }
        Ok(())
    }

    fn intervals_per_column(&self) -> impl Iterator<Item = usize> + '_ {
        self.intervals.iter().map(|edges| edges.len() - 1)
    }

    pub fn num_groups(&self) -> usize {
        match self.split_type {
            SplitType::Or => self.intervals_per_column().sum(),
            SplitType::And => self.intervals_per_column().product(),
        }
    }

    /// Human-readable description of group `id`.
    pub fn group_label(&self, id: usize) -> String {
        match self.split_type {
            SplitType::Or => {
                let mut offset = 0;
                for (column, edges) in self.on.iter().zip(&self.intervals) {
                    let n = edges.len() - 1;
                    if id < offset + n {
                        return interval_label(column, edges, id - offset);
                    }
                    offset += n;
                }
                format!("group {id}")
            }
            SplitType::And => {
                let mut rest = id;
                let parts: Vec<String> = self
                    .on
                    .iter()
                    .zip(&self.intervals)
                    .map(|(column, edges)| {
                        let n = edges.len() - 1;
                        let label = interval_label(column, edges, rest % n);
                        rest /= n;
                        label
                    })
                    .collect();
                parts.join(" & ")
            }
        }
    }

    /// Groups `spectrum` belongs to.
    pub fn groups_of(&self, spectrum: &Spectrum) -> Vec<usize> {
        let indices = self.on.iter().zip(&self.intervals).map(|(column, edges)| {
            spectrum
                .metadata()
                .get(column)
                .and_then(|v| v.as_f64())
                .and_then(|v| interval_index(v, edges))
        });

        match self.split_type {
            SplitType::Or => {
                let mut offset = 0;
                let mut groups = Vec::new();
                for (index, n) in indices.zip(self.intervals_per_column()) {
                    if let Some(i) = index {
                        groups.push(offset + i);
                    }
                    offset += n;
                }
                groups
            }
            SplitType::And => {
                let mut id = 0;
                let mut stride = 1;
                for (index, n) in indices.zip(self.intervals_per_column()) {
                    match index {
                        Some(i) => id += i * stride,
                        None => return Vec::new(),
                    }
                    stride *= n;
                }
                vec![id]
            }
        }
    }
}

fn interval_label(column: &str, edges: &[f64], i: usize) -> String {
    format!("{column} in [{}, {})", edges[i], edges[i + 1])
}

/// Index `n` such that `edges[n] <= value < edges[n + 1]`.
fn interval_index(value: f64, edges: &[f64]) -> Option<usize> {
    edges.windows(2).position(|w| value >= w[0] && value < w[1])
}

// ---------------------------------------------------------------------------
// Group assignment
// ---------------------------------------------------------------------------

/// One split group and the indices of its member spectra.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitGroup {
    pub id: usize,
    pub label: String,
    pub members: Vec<usize>,
}

/// Assign every spectrum to its split groups. All groups are returned, the
/// empty ones included, in id order.
pub fn assign_groups(spectra: &[Spectrum], split: &SplitConfig) -> Vec<SplitGroup> {
    let mut groups: Vec<SplitGroup> = (0..split.num_groups())
        .map(|id| SplitGroup {
            id,
            label: split.group_label(id),
            members: Vec::new(),
        })
        .collect();

    for (index, sp) in spectra.iter().enumerate() {
        for id in split.groups_of(sp) {
            groups[id].members.push(index);
        }
    }
    groups
}
