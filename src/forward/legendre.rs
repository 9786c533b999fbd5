//! Legendre polynomial recurrences.
//!
//! The series need P_n(x) and the order-1 associated P¹_n(x) for
//! successive n. Both are advanced by their upward three-term
//! recurrences from the canonical seeds; upward is the stable direction
//! here, mixing in a downward pass diverges at moderate n.

/// Incremental P_n(x) and P¹_n(x), n = 1, 2, 3…
#[derive(Debug, Clone)]
pub struct LegendreRecurrence {
    x: f64,
    n: u32,
    p_nm1: f64,
    p_n: f64,
    p1_nm1: f64,
    p1_n: f64,
}

impl LegendreRecurrence {
    pub fn new(x: f64) -> Self {
        Self {
            x,
            n: 0,
            p_nm1: 0.0,
            p_n: 1.0, // P_0
            p1_nm1: 0.0,
            p1_n: 0.0, // P¹_0
        }
    }

    /// Advance to the next n and return (P_n, P¹_n).
    pub fn next(&mut self) -> (f64, f64) {
        self.n += 1;
        let n = self.n as f64;
        let x = self.x;

        if self.n == 1 {
            self.p_nm1 = 1.0;
            self.p_n = x;
            self.p1_nm1 = 0.0;
            self.p1_n = -(1.0 - x * x).sqrt(); // P¹_1 = -sin
        } else {
            let p = ((2.0 * n - 1.0) * x * self.p_n - (n - 1.0) * self.p_nm1) / n;
            self.p_nm1 = self.p_n;
            self.p_n = p;

            let p1 = ((2.0 * n - 1.0) * x * self.p1_n - n * self.p1_nm1) / (n - 1.0);
            self.p1_nm1 = self.p1_n;
            self.p1_n = p1;
        }

        (self.p_n, self.p1_n)
    }
}
