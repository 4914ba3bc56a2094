//! Coin-fee curves: the super-linear link fee and the plane-tier table.
//!
//! Fees here are expressed in *coin-rate units*; the contract multiplies by
//! its configured `coin_rate` before debiting the caller's coin balance.

/// Hard cap on outbound links per sigil.
pub const MAX_LINKS: usize = 10;

/// Numerator of the per-link-count efficiency allowance.
/// With `n` links the free band is `200 / n` efficiency points; anything
/// above it is penalised quadratically.
pub const LINK_SCALE_NUMERATOR: u32 = 200;

/// Plane-tier coin-fee multipliers, indexed by tier (1-based bands).
/// Tier 1 ×5, tier 2 ×1, tier 3 ×25, tier 4 ×100 — tuning data, not law.
pub const PLANE_FEE_MULTIPLIERS: [u128; 4] = [5, 1, 25, 100];

/// Number of seedable plane categories.
pub const PLANE_COUNT_MAX: u32 = 8;

/// Triangular number: `n (n + 1) / 2`.
pub fn triangular(n: u128) -> u128 {
    n * (n + 1) / 2
}

/// Plane id → fee tier. Two planes per tier band.
pub fn plane_tier(plane: u32) -> u32 {
    match plane {
        1 | 2 => 1,
        3 | 4 => 2,
        5 | 6 => 3,
        _ => 4,
    }
}

/// Coin-fee multiplier for linking against a plane at creation.
pub fn plane_fee_multiplier(plane: u32) -> u128 {
    PLANE_FEE_MULTIPLIERS[(plane_tier(plane) - 1) as usize]
}

/// Link fee in coin-rate units.
///
/// `fee = efficiency + triangular(efficiency − 200 / link_count)`, where the
/// triangular term applies only to the efficiency above the per-link-count
/// allowance. Strictly increasing in `efficiency`; strictly convex above the
/// allowance threshold.
pub fn link_fee_units(efficiency: u8, link_count: u32) -> u128 {
    let allowance = (LINK_SCALE_NUMERATOR / link_count.max(1)) as u128;
    let eff = efficiency as u128;
    let excess = eff.saturating_sub(allowance);
    eff + triangular(excess)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangular_series() {
        assert_eq!(triangular(0), 0);
        assert_eq!(triangular(1), 1);
        assert_eq!(triangular(4), 10);
        assert_eq!(triangular(10), 55);
    }

    #[test]
    fn plane_tier_bands() {
        assert_eq!(plane_tier(1), 1);
        assert_eq!(plane_tier(4), 2);
        assert_eq!(plane_tier(6), 3);
        assert_eq!(plane_tier(8), 4);
    }

    #[test]
    fn plane_multipliers_follow_tier_table() {
        assert_eq!(plane_fee_multiplier(1), 5);
        assert_eq!(plane_fee_multiplier(4), 1);
        assert_eq!(plane_fee_multiplier(5), 25);
        assert_eq!(plane_fee_multiplier(7), 100);
    }

    #[test]
    fn link_fee_linear_below_allowance() {
        // One link: allowance = 200, so any u8 efficiency stays linear.
        for e in 0u8..=255 {
            assert_eq!(link_fee_units(e, 1), e as u128);
        }
    }

    #[test]
    fn link_fee_strictly_increasing() {
        for count in 1..=MAX_LINKS as u32 {
            for e in 0u8..255 {
                assert!(
                    link_fee_units(e + 1, count) > link_fee_units(e, count),
                    "fee must strictly increase (count {count}, eff {e})"
                );
            }
        }
    }

    #[test]
    fn link_fee_convex_above_allowance() {
        // Ten links: allowance = 20. Second difference must be positive
        // strictly above the threshold.
        let count = 10;
        for e in 21u8..254 {
            let d1 = link_fee_units(e + 1, count) - link_fee_units(e, count);
            let d2 = link_fee_units(e + 2, count) - link_fee_units(e + 1, count);
            assert!(d2 > d1, "fee must be convex above allowance (eff {e})");
        }
    }

    #[test]
    fn link_fee_exact_values() {
        // count = 4 → allowance = 50.
        // eff 60: 60 + triangular(10) = 60 + 55 = 115.
        assert_eq!(link_fee_units(60, 4), 115);
        // eff 50: no excess.
        assert_eq!(link_fee_units(50, 4), 50);
    }
}
