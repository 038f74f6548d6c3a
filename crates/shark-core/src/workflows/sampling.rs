use crate::core::math::Weight;
use crate::core::space::{ChoiceSet, ConfSpace};
use crate::engine::tree::ScoringTables;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

struct Frontier {
    f: f64,
    g: f64,
    choices: Vec<usize>,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    // Min-heap on f; deeper nodes first among equals.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then(self.choices.len().cmp(&other.choices.len()))
    }
}

/// Lower-table energy bound on the sites from `depth` on, given choices for the sites before it.
fn heuristic(tables: &ScoringTables, choices: &ChoiceSet, prefix: &[usize]) -> f64 {
    let lower = &tables.lower;
    let depth = prefix.len();
    let mut total = 0.0;
    for site in depth..choices.num_sites() {
        let mut best = f64::INFINITY;
        for &choice in choices.legal(site) {
            let mut energy = lower.one_body(site, choice);
            for (other, &fixed) in prefix.iter().enumerate() {
                energy += lower.pair(site, choice, other, fixed);
            }
            for other in depth..site {
                let min_pair = choices
                    .legal(other)
                    .iter()
                    .map(|&c| lower.pair(site, choice, other, c))
                    .fold(f64::INFINITY, f64::min);
                energy += min_pair;
            }
            best = best.min(energy);
        }
        total += best;
    }
    total
}

/// Upper bound on the partition function over `choices`, from the `max_confs` lowest
/// lower-table energies found by A*.
///
/// With `E_k` the k-th lowest energy, every conformation not enumerated has energy at least
/// `E_k`, so `sum(w(E_i)) + (N - k) w(E_k)` bounds the total from above. If fewer than
/// `max_confs` conformations exist the sum is exact over the lower table.
pub fn sampled_upper(tables: &ScoringTables, choices: &ChoiceSet, max_confs: usize) -> Weight {
    let num_sites = choices.num_sites();
    let ln_total = choices.ln_num_conformations();
    if ln_total == f64::NEG_INFINITY {
        return Weight::ZERO;
    }
    let max_confs = max_confs.max(1);
    let calculator = tables.calculator;

    let mut heap = BinaryHeap::new();
    heap.push(Frontier {
        f: heuristic(tables, choices, &[]),
        g: 0.0,
        choices: Vec::new(),
    });
    let mut sum = Weight::ZERO;
    let mut found = 0usize;

    while let Some(node) = heap.pop() {
        if !node.f.is_finite() {
            break;
        }
        let depth = node.choices.len();
        if depth == num_sites {
            sum += calculator.weight(node.g);
            found += 1;
            if found == max_confs {
                let remaining =
                    Weight::from_ln(ln_total).saturating_sub(Weight::from_f64(found as f64));
                return sum + remaining * calculator.weight(node.g);
            }
            continue;
        }
        for &choice in choices.legal(depth) {
            let mut g = node.g + tables.lower.one_body(depth, choice);
            for (other, &fixed) in node.choices.iter().enumerate() {
                g += tables.lower.pair(depth, choice, other, fixed);
            }
            if !g.is_finite() {
                continue;
            }
            let mut next = node.choices.clone();
            next.push(choice);
            let f = g + heuristic(tables, choices, &next);
            heap.push(Frontier { f, g, choices: next });
        }
    }
    sum
}

/// Lower bound on the partition function of every sequence that refines `choices`.
///
/// Each site contributes the smallest, over its labels, Boltzmann sum of its rigid energies,
/// with interactions towards earlier sites taken at their least favorable value. The product
/// over sites is then below the rigid partition function of any label assignment.
pub fn product_lower(tables: &ScoringTables, space: &ConfSpace, choices: &ChoiceSet) -> Weight {
    let rigid = &tables.rigid;
    let calculator = tables.calculator;
    let mut ln_total = 0.0;
    for site in 0..choices.num_sites() {
        let mut per_label: BTreeMap<&str, Weight> = BTreeMap::new();
        for &choice in choices.legal(site) {
            let mut energy = rigid.one_body(site, choice);
            for other in 0..site {
                let worst = choices
                    .legal(other)
                    .iter()
                    .map(|&c| rigid.pair(site, choice, other, c))
                    .fold(f64::NEG_INFINITY, f64::max);
                energy += worst;
            }
            let label = space.site(site).choices[choice].label.as_str();
            *per_label.entry(label).or_default() += calculator.weight(energy);
        }
        match per_label.values().min() {
            Some(weight) if !weight.is_zero() => ln_total += weight.ln(),
            _ => return Weight::ZERO,
        }
    }
    Weight::from_ln(ln_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::energy::EnergyMatrix;
    use crate::core::math::BoltzmannCalculator;
    use crate::core::space::{Assignment, Choice, Sequence, Site};

    fn space() -> ConfSpace {
        ConfSpace::new(vec![
            Site::new(
                "M0",
                "ALA",
                true,
                vec![Choice::new("ALA"), Choice::new("ALA"), Choice::new("VAL")],
            ),
            Site::new("F1", "SER", false, vec![Choice::new("SER"), Choice::new("SER")]),
            Site::new(
                "M2",
                "LEU",
                true,
                vec![Choice::new("LEU"), Choice::new("ILE")],
            ),
        ])
        .unwrap()
    }

    fn tables(space: &ConfSpace) -> ScoringTables {
        let mut lower = EnergyMatrix::new(space);
        lower.set_one_body(0, 1, -0.7);
        lower.set_one_body(0, 2, 0.4);
        lower.set_one_body(1, 1, -0.2);
        lower.set_pair(0, 0, 1, 1, -0.5);
        lower.set_pair(1, 0, 2, 1, 0.3);
        lower.set_pair(0, 2, 2, 0, -1.1);
        let mut rigid = lower.clone();
        rigid.set_pair(0, 1, 2, 1, 0.8);
        rigid.set_one_body(1, 0, 0.6);
        ScoringTables {
            lower,
            rigid,
            calculator: BoltzmannCalculator::new(),
        }
    }

    fn exact(matrix: &EnergyMatrix, choices: &ChoiceSet) -> Weight {
        let calc = BoltzmannCalculator::new();
        let mut total = Weight::ZERO;
        for &a in choices.legal(0) {
            for &b in choices.legal(1) {
                for &c in choices.legal(2) {
                    total += calc.weight(matrix.conf_energy(&Assignment::from_choices(&[a, b, c])));
                }
            }
        }
        total
    }

    #[test]
    fn exhaustive_sampling_is_exact() {
        let space = space();
        let tables = tables(&space);
        let choices = ChoiceSet::all(&space);
        let sampled = sampled_upper(&tables, &choices, 1000);
        let z = exact(&tables.lower, &choices);
        assert!((sampled.ln() - z.ln()).abs() < 1e-9);
    }

    #[test]
    fn truncated_sampling_stays_above_the_total() {
        let space = space();
        let tables = tables(&space);
        let choices = ChoiceSet::all(&space);
        let z = exact(&tables.lower, &choices);
        for max in 1..12 {
            let sampled = sampled_upper(&tables, &choices, max);
            assert!(sampled.ln() >= z.ln() - 1e-9, "max {} gave {}", max, sampled);
        }
    }

    #[test]
    fn product_lower_is_below_every_refining_sequence() {
        let space = space();
        let tables = tables(&space);
        let bound = product_lower(&tables, &space, &ChoiceSet::all(&space));
        for first in ["ALA", "VAL"] {
            for second in ["LEU", "ILE"] {
                let sequence = Sequence::unassigned(&space)
                    .with_assignment(0, first)
                    .with_assignment(2, second);
                let z = exact(&tables.rigid, &sequence.choices(&space));
                assert!(bound.ln() <= z.ln() + 1e-9, "{} {}", first, second);
            }
        }
    }

    #[test]
    fn empty_choice_sets_have_no_weight() {
        let space = space();
        let tables = tables(&space);
        let choices = ChoiceSet::from_lists(vec![vec![0], vec![], vec![0, 1]]);
        assert!(sampled_upper(&tables, &choices, 10).is_zero());
        assert!(product_lower(&tables, &space, &choices).is_zero());
    }
}
