//! Orders the tool calls of one response into waves.
//!
//! Calls in the same wave touch disjoint resources and may run
//! concurrently. A call lands one wave after the latest earlier call it
//! conflicts with, so dependent calls keep their request order.

use codeloop_core::{ResolvedPath, ToolEffect};

/// The resources a call touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Footprint {
    /// Workspace-relative paths read and written.
    Paths { reads: Vec<String>, writes: Vec<String> },
    /// Conflicts with every other call.
    Exclusive,
}

impl Footprint {
    /// Derive a footprint from a tool's effect and its resolved path arguments.
    ///
    /// Writers without declared paths (shell commands) and internal state
    /// changes are exclusive.
    pub fn of<'a>(effect: ToolEffect, paths: impl IntoIterator<Item = &'a ResolvedPath>) -> Self {
        let paths: Vec<String> = paths.into_iter().map(|p| p.relative.clone()).collect();
        match effect {
            ToolEffect::ReadOnly => Self::Paths {
                reads: paths,
                writes: Vec::new(),
            },
            ToolEffect::Internal => Self::Exclusive,
            ToolEffect::Mutating | ToolEffect::Destructive if paths.is_empty() => Self::Exclusive,
            ToolEffect::Mutating | ToolEffect::Destructive => Self::Paths {
                reads: Vec::new(),
                writes: paths,
            },
        }
    }

    pub fn conflicts_with(&self, other: &Footprint) -> bool {
        match (self, other) {
            (Self::Exclusive, _) | (_, Self::Exclusive) => true,
            (
                Self::Paths { reads: r1, writes: w1 },
                Self::Paths { reads: r2, writes: w2 },
            ) => {
                let any = |a: &[String], b: &[String]| {
                    a.iter().any(|x| b.iter().any(|y| overlaps(x, y)))
                };
                any(w1, w2) || any(w1, r2) || any(r1, w2)
            }
        }
    }
}

/// Same path, or one is a directory prefix of the other.
fn overlaps(a: &str, b: &str) -> bool {
    if a == "." || b == "." || a == b {
        return true;
    }
    let under = |child: &str, parent: &str| {
        child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with('/'))
    };
    under(a, b) || under(b, a)
}

/// Group call indices into sequential waves. Indices inside a wave are in
/// request order.
pub fn plan_waves(footprints: &[Footprint]) -> Vec<Vec<usize>> {
    let mut wave_of: Vec<usize> = Vec::with_capacity(footprints.len());
    let mut waves: Vec<Vec<usize>> = Vec::new();

    for (i, footprint) in footprints.iter().enumerate() {
        let wave = footprints[..i]
            .iter()
            .zip(&wave_of)
            .filter(|(earlier, _)| earlier.conflicts_with(footprint))
            .map(|(_, w)| w + 1)
            .max()
            .unwrap_or(0);
        wave_of.push(wave);
        if waves.len() <= wave {
            waves.resize_with(wave + 1, Vec::new);
        }
        waves[wave].push(i);
    }
    waves
}
