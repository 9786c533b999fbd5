//! Current dipole.

use nalgebra::Vector3;

/// Evaluation mode of the forward models. In lead field mode the
/// direction is not an input: the model points the dipole toward the
/// electrode and scales it by the computed potential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    LeadField,
    Potentials,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Dipole {
    pub position: Vector3<f64>,
    pub direction: Vector3<f64>,
}

impl Dipole {
    pub fn new(position: Vector3<f64>, direction: Vector3<f64>) -> Self {
        Self { position, direction }
    }

    /// Point the dipole toward `target`, with unit moment.
    pub fn set_direction_toward(&mut self, target: Vector3<f64>) {
        let n = target.norm();
        self.direction = if n == 0.0 { target } else { target / n };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_toward_is_unit() {
        let mut d = Dipole::default();
        d.set_direction_toward(Vector3::new(0.0, 3.0, 4.0));
        assert!((d.direction.norm() - 1.0).abs() < 1e-12);
        assert!(d.direction.y > 0.0 && d.direction.z > 0.0);
    }
}
