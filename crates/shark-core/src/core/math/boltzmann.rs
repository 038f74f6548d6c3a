use super::weight::Weight;

/// Gas constant in kcal/(mol·K).
pub const GAS_CONSTANT: f64 = 1.9891e-3;
/// Room temperature in Kelvin.
pub const ROOM_TEMPERATURE: f64 = 298.15;
/// `RT` at room temperature, in kcal/mol.
pub const RT: f64 = GAS_CONSTANT * ROOM_TEMPERATURE;

/// Converts between energies (kcal/mol) and Boltzmann weights at a fixed `RT`.
#[derive(Debug, Clone, Copy)]
pub struct BoltzmannCalculator {
    rt: f64,
}

impl Default for BoltzmannCalculator {
    fn default() -> Self {
        Self { rt: RT }
    }
}

impl BoltzmannCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rt(rt: f64) -> Self {
        Self { rt }
    }

    #[inline]
    pub fn rt(&self) -> f64 {
        self.rt
    }

    /// `exp(-energy / RT)`. An infinite energy maps to zero weight.
    #[inline]
    pub fn weight(&self, energy: f64) -> Weight {
        if energy == f64::INFINITY {
            return Weight::ZERO;
        }
        Weight::from_ln(-energy / self.rt)
    }

    /// `-RT ln(weight)`. Zero weight maps to `+inf`.
    #[inline]
    pub fn free_energy(&self, weight: Weight) -> f64 {
        if weight.is_zero() {
            return f64::INFINITY;
        }
        -self.rt * weight.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_and_free_energy_are_inverse() {
        let calc = BoltzmannCalculator::new();
        for energy in [-25.0, -1.5, 0.0, 3.25, 100.0] {
            let back = calc.free_energy(calc.weight(energy));
            assert!((back - energy).abs() < 1e-9);
        }
    }

    #[test]
    fn infinite_energy_has_zero_weight() {
        let calc = BoltzmannCalculator::new();
        assert!(calc.weight(f64::INFINITY).is_zero());
        assert_eq!(calc.free_energy(Weight::ZERO), f64::INFINITY);
    }

    #[test]
    fn lower_energy_gives_larger_weight() {
        let calc = BoltzmannCalculator::new();
        assert!(calc.weight(-2.0) > calc.weight(1.0));
    }

    #[test]
    fn rt_matches_room_temperature() {
        assert!((RT - 0.593_06).abs() < 1e-4);
    }
}
