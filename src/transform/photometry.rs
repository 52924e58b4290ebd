use crate::constants::GAIA_EDR3_V_COEFFS;

/// Johnson V from Gaia EDR3 G and BP-RP colour.
///
/// G - V = a0 + a1*c + a2*c^2 + a3*c^3 with c = BP - RP. Returns NaN when
/// either input is NaN, which the quality gate treats as "no magnitude".
pub fn gaia_edr3_vmag(g: f64, bp_rp: f64) -> f64 {
    let [a0, a1, a2, a3] = GAIA_EDR3_V_COEFFS;
    let c = bp_rp;
    g - a0 - a1 * c - a2 * c * c - a3 * c * c * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_colour_offsets_by_a0() {
        let v = gaia_edr3_vmag(15.0, 0.0);
        assert!((v - 15.02704).abs() < 1e-9);
    }

    #[test]
    fn test_red_star() {
        // c = 2: G - V = -0.02704 + 0.02848 - 0.8624 + 0.11408 = -0.74688
        let v = gaia_edr3_vmag(12.0, 2.0);
        assert!((v - 12.74688).abs() < 1e-9);
    }

    #[test]
    fn test_missing_input_gives_nan() {
        assert!(gaia_edr3_vmag(12.0, f64::NAN).is_nan());
        assert!(gaia_edr3_vmag(f64::NAN, 1.0).is_nan());
    }
}
