//! Category-affinity table for the link bonus engine.
//!
//! Every sigil carries an immutable data blob whose leading bytes encode its
//! category relationships:
//!
//! ```text
//!   data[0]  own category code
//!   data[1]  first strong-affinity code
//!   data[2]  second strong-affinity code
//!   data[3]  weak-affinity code
//! ```
//!
//! A link's affinity bonus is an additive efficiency percentage derived from
//! comparing the destination's own code (`dest[0]`) against the source's
//! affinity codes, then scaled by the source's category tier and damped when
//! the destination already out-charges the source.
//!
//! The tier thresholds and match multipliers below are protocol tuning data
//! seeded at deployment of the original system, not consensus law.

/// Category codes at or above this value form the top tier.
/// A top-tier source always earns at least the 1× match and a 4× multiplier.
pub const TIER_TOP_MIN: u8 = 0xE0;

/// Category codes in `[TIER_UPPER_MIN, TIER_TOP_MIN)` form the upper-middle
/// tier (2× multiplier).
pub const TIER_UPPER_MIN: u8 = 0xA0;

/// The terminal category. Links feeding a terminal-category sigil earn the
/// 2× multiplier even from a low-tier source.
pub const TERMINAL_CATEGORY: u8 = 0xFF;

fn code(data: &[u8], pos: usize) -> Option<u8> {
    data.get(pos).copied()
}

/// Compute the affinity bonus (additive efficiency percentage) for a link.
///
/// `efficiency` is the link's base efficiency; `source_active_charge` and
/// `dest_active_charge` bias the bonus toward feeding the weaker endpoint.
///
/// Match table (first hit wins):
///
/// | Condition                                         | Bonus            |
/// |---------------------------------------------------|------------------|
/// | `dest[0]` equals `source[1]` or `source[2]`       | `2 × efficiency` |
/// | `dest[0] == source[0]`, or source is top tier     | `1 × efficiency` |
/// | `dest[0]` equals `source[3]`                      | `efficiency / 2` |
/// | otherwise                                         | `0`              |
///
/// Tier scaling: top-tier source ×4; else upper-middle source or terminal
/// destination ×2. Finally, if the destination's active charge exceeds the
/// source's, the bonus is halved.
pub fn affinity_bonus(
    source: &[u8],
    dest: &[u8],
    efficiency: u8,
    source_active_charge: u128,
    dest_active_charge: u128,
) -> u128 {
    let dest_code = match code(dest, 0) {
        Some(c) => c,
        None => return 0,
    };
    let source_code = code(source, 0);
    let eff = efficiency as u128;

    let source_top = matches!(source_code, Some(c) if c >= TIER_TOP_MIN);
    let source_upper =
        matches!(source_code, Some(c) if c >= TIER_UPPER_MIN && c < TIER_TOP_MIN);

    let strong =
        code(source, 1) == Some(dest_code) || code(source, 2) == Some(dest_code);
    let weak = code(source, 3) == Some(dest_code);

    let mut bonus = if strong {
        eff * 2
    } else if source_code == Some(dest_code) || source_top {
        eff
    } else if weak {
        eff / 2
    } else {
        0
    };

    if source_top {
        bonus *= 4;
    } else if source_upper || dest_code == TERMINAL_CATEGORY {
        bonus *= 2;
    }

    if dest_active_charge > source_active_charge {
        bonus /= 2;
    }

    bonus
}

#[cfg(test)]
mod tests {
    use super::*;

    // Low-tier source with strong code 0x20, weak code 0x30.
    const SOURCE: [u8; 4] = [0x10, 0x20, 0x21, 0x30];

    #[test]
    fn strong_match_doubles_efficiency() {
        assert_eq!(affinity_bonus(&SOURCE, &[0x20], 40, 0, 0), 80);
        assert_eq!(affinity_bonus(&SOURCE, &[0x21], 40, 0, 0), 80);
    }

    #[test]
    fn identical_category_matches_at_one_x() {
        assert_eq!(affinity_bonus(&SOURCE, &[0x10], 40, 0, 0), 40);
    }

    #[test]
    fn weak_match_halves_efficiency() {
        assert_eq!(affinity_bonus(&SOURCE, &[0x30], 40, 0, 0), 20);
    }

    #[test]
    fn no_match_yields_zero() {
        assert_eq!(affinity_bonus(&SOURCE, &[0x55], 40, 0, 0), 0);
    }

    #[test]
    fn top_tier_source_always_matches_and_quadruples() {
        // 0xE0 source, unrelated destination: 1× match, ×4 tier = 4×.
        let source = [TIER_TOP_MIN, 0x00, 0x00, 0x00];
        assert_eq!(affinity_bonus(&source, &[0x55], 40, 0, 0), 160);
    }

    #[test]
    fn upper_middle_source_doubles() {
        // Strong match (2×) from an upper-middle source (×2) = 4×.
        let source = [TIER_UPPER_MIN, 0x20, 0x00, 0x00];
        assert_eq!(affinity_bonus(&source, &[0x20], 40, 0, 0), 160);
    }

    #[test]
    fn terminal_destination_doubles_for_low_tier_source() {
        let source = [0x10, TERMINAL_CATEGORY, 0x00, 0x00];
        // Strong match on 0xFF (2×) doubled by terminal destination = 4×.
        assert_eq!(affinity_bonus(&source, &[TERMINAL_CATEGORY], 40, 0, 0), 160);
    }

    #[test]
    fn stronger_destination_halves_bonus() {
        assert_eq!(affinity_bonus(&SOURCE, &[0x20], 40, 100, 101), 40);
        // Equal charge is not "stronger": no halving.
        assert_eq!(affinity_bonus(&SOURCE, &[0x20], 40, 100, 100), 80);
    }

    #[test]
    fn empty_destination_blob_yields_zero() {
        assert_eq!(affinity_bonus(&SOURCE, &[], 40, 0, 0), 0);
    }

    #[test]
    fn empty_source_blob_only_matches_terminal_rule() {
        // No source codes at all: only a terminal destination can still
        // scale, but the base match is zero, so the bonus stays zero.
        assert_eq!(affinity_bonus(&[], &[TERMINAL_CATEGORY], 40, 0, 0), 0);
    }
}
