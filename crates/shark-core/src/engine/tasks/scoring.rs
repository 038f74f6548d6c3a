use crate::core::space::ChoiceSet;
use crate::engine::tree::{ChildScore, NodeSnapshot, ScoringEnv};

/// The children scored at one level of a drill-down, and which of them the descent followed.
#[derive(Debug, Clone)]
pub struct DrillLevel {
    pub children: Vec<ChildScore>,
    pub chosen: Option<usize>,
}

/// Scores the given choices at `site` below `parent`.
pub fn expand(
    env: &ScoringEnv,
    parent: &NodeSnapshot,
    site: usize,
    to_score: &[usize],
    choices: &ChoiceSet,
) -> Vec<ChildScore> {
    to_score
        .iter()
        .map(|&choice| env.score_child(parent, site, choice, choices))
        .collect()
}

/// Descends from `start` to a full assignment, scoring every child on the way and following
/// the child with the lowest free-energy bound. Stops early if no child has finite energy.
pub fn drill_down(env: &ScoringEnv, start: &NodeSnapshot, choices: &ChoiceSet) -> Vec<DrillLevel> {
    let mut levels = Vec::new();
    let mut current = start.clone();
    while let Some(site) = env.order.next_site(&current.assignment) {
        let legal = env.legal_children(&current.assignment, site, choices);
        let children = expand(env, &current, site, &legal, choices);
        let chosen = children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.lower_energy().is_finite())
            .min_by(|(_, a), (_, b)| a.lower_energy().total_cmp(&b.lower_energy()))
            .map(|(i, _)| i);
        let next = chosen.map(|i| NodeSnapshot {
            assignment: children[i].assignment.clone(),
            partial_lower: children[i].partial_lower,
            partial_upper: children[i].partial_upper,
        });
        levels.push(DrillLevel { children, chosen });
        match next {
            Some(snapshot) => current = snapshot,
            None => break,
        }
    }
    levels
}
