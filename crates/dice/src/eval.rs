//! Expression evaluation against a reserved entropy entry.
//!
//! A d100 roll pops from the entry's d100 pool; every other die size
//! pops from the d20 pool and maps a raw value `n` onto an X-sided die
//! as `1 + ((n - 1) mod X)`. One expression consumes exactly one entry.

use tf_domain::model::{EntropyEntry, RollResult};
use tf_domain::{Error, Result};

use crate::expr::{CheckMode, RollExpression};

/// Map a raw d20 value onto an arbitrary die size.
pub fn map_raw(raw: u8, sides: u16) -> u16 {
    1 + ((u16::from(raw) - 1) % sides)
}

/// Evaluate `expression` against `entry`, popping raw values from the
/// front of the matching pool.
pub fn evaluate(expression: &str, entry: &EntropyEntry) -> Result<RollResult> {
    let parsed = RollExpression::parse(expression)?;
    let needed = parsed.raw_values_needed();

    let pool: &[u8] = match &parsed {
        RollExpression::Dice { sides: 100, .. } => &entry.d100,
        _ => &entry.d20,
    };
    if pool.len() < needed {
        return Err(Error::EntropyExhausted(entry.index));
    }
    let raw: Vec<u8> = pool[..needed].to_vec();

    let modifier_total: i64 = parsed.modifiers().iter().sum();
    let (total, breakdown) = match &parsed {
        RollExpression::Dice { sides, .. } => {
            let mapped: Vec<u16> = raw.iter().map(|&r| map_value(r, *sides)).collect();
            let dice_total: i64 = mapped.iter().map(|&v| i64::from(v)).sum();
            let total = dice_total + modifier_total;
            let faces = mapped
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            (
                total,
                format!(
                    "{expr}: [{faces}]{mods} = {total}",
                    expr = expression.trim(),
                    mods = render_modifiers(parsed.modifiers()),
                ),
            )
        }
        RollExpression::Check { mode, .. } => {
            let (a, b) = (raw[0], raw[1]);
            let kept = match mode {
                CheckMode::Advantage => a.max(b),
                CheckMode::Disadvantage => a.min(b),
            };
            let total = i64::from(kept) + modifier_total;
            let label = match mode {
                CheckMode::Advantage => "adv",
                CheckMode::Disadvantage => "dis",
            };
            (
                total,
                format!(
                    "{label}({a}, {b}) kept {kept}{mods} = {total}",
                    mods = render_modifiers(parsed.modifiers()),
                ),
            )
        }
    };

    Ok(RollResult {
        expression: expression.trim().to_owned(),
        rolls: raw,
        total,
        breakdown,
        consumed_indices: vec![entry.index],
    })
}

/// Die-size mapping. d100 values are already in range; everything else
/// is folded from a raw d20 value.
fn map_value(raw: u8, sides: u16) -> u16 {
    if sides == 100 {
        u16::from(raw)
    } else {
        map_raw(raw, sides)
    }
}

fn render_modifiers(modifiers: &[i64]) -> String {
    let mut out = String::new();
    for m in modifiers {
        if *m >= 0 {
            out.push_str(&format!(" + {m}"));
        } else {
            out.push_str(&format!(" - {}", -m));
        }
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(d20: Vec<u8>, d100: Vec<u8>) -> EntropyEntry {
        EntropyEntry {
            index: 7,
            d20,
            d100,
            raw: None,
        }
    }

    #[test]
    fn mapping_law_holds_for_all_raw_values() {
        for raw in 1..=20u8 {
            for sides in [2u16, 3, 4, 6, 8, 10, 12, 20] {
                let mapped = map_raw(raw, sides);
                assert!((1..=sides).contains(&mapped), "raw {raw} d{sides} → {mapped}");
            }
            // Identity on a d20.
            assert_eq!(map_raw(raw, 20), u16::from(raw));
        }
    }

    #[test]
    fn d20_with_modifier() {
        let result = evaluate("1d20+3", &entry(vec![17, 4], vec![])).unwrap();
        assert_eq!(result.total, 20);
        assert_eq!(result.rolls, vec![17]);
        assert_eq!(result.consumed_indices, vec![7]);
        assert_eq!(result.breakdown, "1d20+3: [17] + 3 = 20");
    }

    #[test]
    fn multi_die_consumes_one_raw_per_die() {
        let result = evaluate("2d6", &entry(vec![3, 11, 20], vec![])).unwrap();
        // 3 → 3, 11 → 1 + (10 % 6) = 5.
        assert_eq!(result.total, 8);
        assert_eq!(result.rolls, vec![3, 11]);
    }

    #[test]
    fn d100_uses_its_own_pool() {
        let result = evaluate("1d100", &entry(vec![5], vec![83])).unwrap();
        assert_eq!(result.total, 83);
        assert_eq!(result.rolls, vec![83]);
    }

    #[test]
    fn advantage_keeps_max() {
        let result = evaluate("adv+2", &entry(vec![7, 14], vec![])).unwrap();
        assert_eq!(result.total, 16);
        assert_eq!(result.breakdown, "adv(7, 14) kept 14 + 2 = 16");
    }

    #[test]
    fn disadvantage_keeps_min() {
        let result = evaluate("dis", &entry(vec![7, 14], vec![])).unwrap();
        assert_eq!(result.total, 7);
    }

    #[test]
    fn short_pool_is_exhaustion() {
        let err = evaluate("3d6", &entry(vec![1, 2], vec![])).unwrap_err();
        assert_eq!(err.kind(), "EntropyExhausted");
    }

    #[test]
    fn bad_expression_is_invalid() {
        let err = evaluate("potato", &entry(vec![1, 2], vec![])).unwrap_err();
        assert_eq!(err.kind(), "ExpressionInvalid");
    }
}
