use super::matrix::EnergyMatrix;
use super::oracle::{CostOracle, MinimizedConf, OracleError};
use super::pruning::PruningMatrix;
use crate::core::space::{Assignment, ChoiceTuple, ConfSpace};
use std::collections::HashMap;
use std::sync::Arc;

/// An oracle backed entirely by explicit tables.
///
/// The exact energy of a conformation is its lower-table energy plus every higher-order term
/// whose tuple it contains, capped by its rigid energy:
///
/// `exact(conf) = min(rigid(conf), lower(conf) + Σ_{t ⊆ conf} term(t))`
///
/// Construction checks `lower <= rigid` entry by entry and that higher-order terms are
/// non-negative, which is what keeps tuple corrections discovered on this oracle sound.
#[derive(Debug, Clone)]
pub struct TableOracle {
    space: ConfSpace,
    lower: EnergyMatrix,
    rigid: EnergyMatrix,
    pruning: PruningMatrix,
    higher_order: HashMap<ChoiceTuple, f64>,
}

impl TableOracle {
    pub fn new(
        space: ConfSpace,
        lower: EnergyMatrix,
        rigid: EnergyMatrix,
        pruning: PruningMatrix,
    ) -> Result<Self, OracleError> {
        let shape = EnergyMatrix::new(&space);
        if !lower.same_shape(&shape) || !rigid.same_shape(&shape) {
            return Err(OracleError::InvalidTables(
                "energy tables do not match the conformation space".to_string(),
            ));
        }
        if let Some((site, choice)) = lower.first_entry_above(&rigid) {
            return Err(OracleError::InvalidTables(format!(
                "lower-bound energy exceeds rigid energy at site {} choice {}",
                site, choice
            )));
        }
        Ok(Self {
            space,
            lower,
            rigid,
            pruning,
            higher_order: HashMap::new(),
        })
    }

    /// A model with no minimization gap: exact energies equal the pairwise table.
    pub fn exact(space: ConfSpace, energies: EnergyMatrix) -> Result<Self, OracleError> {
        Self::new(space, energies.clone(), energies, PruningMatrix::new())
    }

    pub fn with_higher_order(mut self, tuple: ChoiceTuple, energy: f64) -> Result<Self, OracleError> {
        self.add_higher_order(tuple, energy)?;
        Ok(self)
    }

    pub fn add_higher_order(&mut self, tuple: ChoiceTuple, energy: f64) -> Result<(), OracleError> {
        if tuple.len() < 3 {
            return Err(OracleError::InvalidTables(format!(
                "higher-order term needs at least 3 sites, got {}",
                tuple.len()
            )));
        }
        if energy < 0.0 || energy.is_nan() {
            return Err(OracleError::InvalidTables(format!(
                "higher-order term must be non-negative, got {}",
                energy
            )));
        }
        *self.higher_order.entry(tuple).or_insert(0.0) += energy;
        Ok(())
    }

    pub fn higher_order_terms(&self) -> impl Iterator<Item = (&ChoiceTuple, &f64)> {
        self.higher_order.iter()
    }

    fn higher_order_within<'a>(
        &'a self,
        contains: impl Fn(&ChoiceTuple) -> bool + 'a,
    ) -> impl Iterator<Item = (&'a ChoiceTuple, f64)> + 'a {
        self.higher_order
            .iter()
            .filter(move |(t, _)| contains(t))
            .map(|(t, e)| (t, *e))
    }
}

impl CostOracle for TableOracle {
    fn space(&self) -> &ConfSpace {
        &self.space
    }

    fn lower_matrix(&self) -> &EnergyMatrix {
        &self.lower
    }

    fn rigid_matrix(&self) -> &EnergyMatrix {
        &self.rigid
    }

    fn pruning(&self) -> &PruningMatrix {
        &self.pruning
    }

    fn minimize(&self, conf: &Assignment) -> Result<MinimizedConf, OracleError> {
        if !conf.is_full() {
            return Err(OracleError::PartialAssignment(conf.to_string()));
        }
        let rigid = self.rigid.conf_energy(conf);
        let mut breakdown = self.lower.breakdown(conf);
        let mut relaxed = self.lower.conf_energy(conf);
        for (tuple, energy) in self.higher_order_within(|t| t.is_contained_in(conf)) {
            relaxed += energy;
            let sites: Vec<usize> = tuple.sites().collect();
            let num_pairs = (sites.len() * (sites.len() - 1) / 2) as f64;
            for (i, &a) in sites.iter().enumerate() {
                for &b in &sites[..i] {
                    breakdown.add_pair(a, b, energy / num_pairs);
                }
            }
        }
        if rigid < relaxed {
            return Ok(MinimizedConf {
                energy: rigid,
                breakdown: self.rigid.breakdown(conf),
            });
        }
        Ok(MinimizedConf {
            energy: relaxed,
            breakdown,
        })
    }

    fn minimize_tuple(&self, tuple: &ChoiceTuple) -> Result<f64, OracleError> {
        let rigid = self.rigid.tuple_energy(tuple);
        let extra: f64 = self
            .higher_order_within(|t| t.pairs().iter().all(|p| tuple.pairs().contains(p)))
            .map(|(_, e)| e)
            .sum();
        Ok(rigid.min(self.lower.tuple_energy(tuple) + extra))
    }

    fn restrict(&self, sites: &[usize]) -> Option<Arc<dyn CostOracle>> {
        let space = self.space.restrict(sites).ok()?;
        let mut restricted = TableOracle::new(
            space,
            self.lower.restrict(sites),
            self.rigid.restrict(sites),
            self.pruning.restrict(sites),
        )
        .ok()?;
        for (tuple, energy) in &self.higher_order {
            let mapped: Option<Vec<(usize, usize)>> = tuple
                .pairs()
                .iter()
                .map(|&(s, c)| sites.iter().position(|&x| x == s).map(|i| (i, c)))
                .collect();
            if let Some(pairs) = mapped {
                restricted
                    .add_higher_order(ChoiceTuple::new(pairs), *energy)
                    .ok()?;
            }
        }
        Some(Arc::new(restricted))
    }
}
