//! Roll expression grammar.
//!
//! Two forms:
//! - dice: `NdX` with any chain of `+K`/`-K` modifiers (`2d6`,
//!   `1d20+3`, `d8+1-2`). `N` defaults to 1 when omitted.
//! - checks: `adv` / `dis` with optional modifiers (`adv+5`). A check
//!   draws two raw d20 values and keeps the max (advantage) or min
//!   (disadvantage).

use tf_domain::{Error, Result};

/// Largest die count a single expression may request. Bounded by the
/// per-entry pool size so one expression never spans entries.
pub const MAX_DICE: u8 = 8;

/// Largest die size accepted.
pub const MAX_SIDES: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    Advantage,
    Disadvantage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollExpression {
    Dice {
        count: u8,
        sides: u16,
        modifiers: Vec<i64>,
    },
    Check {
        mode: CheckMode,
        modifiers: Vec<i64>,
    },
}

impl RollExpression {
    /// Parse an expression, failing with `ExpressionInvalid`.
    pub fn parse(input: &str) -> Result<Self> {
        let text: String = input.trim().to_lowercase();
        if text.is_empty() {
            return Err(invalid(input, "empty expression"));
        }

        let (head, modifiers) = split_modifiers(&text, input)?;

        if head == "adv" || head == "advantage" {
            return Ok(Self::Check {
                mode: CheckMode::Advantage,
                modifiers,
            });
        }
        if head == "dis" || head == "disadvantage" {
            return Ok(Self::Check {
                mode: CheckMode::Disadvantage,
                modifiers,
            });
        }

        let Some((count_part, sides_part)) = head.split_once('d') else {
            return Err(invalid(input, "expected NdX or adv/dis"));
        };

        let count: u8 = if count_part.is_empty() {
            1
        } else {
            count_part
                .parse()
                .map_err(|_| invalid(input, "bad die count"))?
        };
        let sides: u16 = sides_part
            .parse()
            .map_err(|_| invalid(input, "bad die size"))?;

        if count == 0 || count > MAX_DICE {
            return Err(invalid(input, "die count out of range"));
        }
        if sides < 2 || sides > MAX_SIDES {
            return Err(invalid(input, "die size out of range"));
        }

        Ok(Self::Dice {
            count,
            sides,
            modifiers,
        })
    }

    /// Raw values this expression pops from an entry's pools.
    pub fn raw_values_needed(&self) -> usize {
        match self {
            Self::Dice { count, .. } => *count as usize,
            Self::Check { .. } => 2,
        }
    }

    pub fn modifiers(&self) -> &[i64] {
        match self {
            Self::Dice { modifiers, .. } | Self::Check { modifiers, .. } => modifiers,
        }
    }
}

/// Split `head+k1-k2...` into the head token and signed modifiers.
fn split_modifiers(text: &str, original: &str) -> Result<(String, Vec<i64>)> {
    let mut head = String::new();
    let mut modifiers = Vec::new();
    let mut rest = text;

    // Head runs to the first +/- sign.
    if let Some(pos) = rest.find(['+', '-']) {
        head.push_str(rest[..pos].trim());
        rest = &rest[pos..];
    } else {
        return Ok((rest.trim().to_owned(), modifiers));
    }

    while !rest.is_empty() {
        let sign = match rest.as_bytes()[0] {
            b'+' => 1,
            b'-' => -1,
            _ => return Err(invalid(original, "malformed modifier chain")),
        };
        rest = &rest[1..];
        let end = rest.find(['+', '-']).unwrap_or(rest.len());
        let number: i64 = rest[..end]
            .trim()
            .parse()
            .map_err(|_| invalid(original, "bad modifier"))?;
        modifiers.push(sign * number);
        rest = &rest[end..];
    }

    Ok((head, modifiers))
}

fn invalid(input: &str, reason: &str) -> Error {
    Error::ExpressionInvalid(format!("{input:?}: {reason}"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_dice() {
        assert_eq!(
            RollExpression::parse("2d6").unwrap(),
            RollExpression::Dice {
                count: 2,
                sides: 6,
                modifiers: vec![]
            }
        );
    }

    #[test]
    fn implicit_count_and_modifiers() {
        assert_eq!(
            RollExpression::parse("d20+3-1").unwrap(),
            RollExpression::Dice {
                count: 1,
                sides: 20,
                modifiers: vec![3, -1]
            }
        );
    }

    #[test]
    fn whitespace_and_case() {
        assert_eq!(
            RollExpression::parse(" 1D20 + 5 ").unwrap(),
            RollExpression::Dice {
                count: 1,
                sides: 20,
                modifiers: vec![5]
            }
        );
    }

    #[test]
    fn advantage_and_disadvantage() {
        assert_eq!(
            RollExpression::parse("adv+2").unwrap(),
            RollExpression::Check {
                mode: CheckMode::Advantage,
                modifiers: vec![2]
            }
        );
        assert_eq!(
            RollExpression::parse("disadvantage").unwrap(),
            RollExpression::Check {
                mode: CheckMode::Disadvantage,
                modifiers: vec![]
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "banana", "0d6", "2d1", "2d", "d", "9d6", "1d20++2", "1d20+x"] {
            assert!(
                RollExpression::parse(bad).is_err(),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn raw_values_needed() {
        assert_eq!(RollExpression::parse("3d8").unwrap().raw_values_needed(), 3);
        assert_eq!(RollExpression::parse("adv").unwrap().raw_values_needed(), 2);
    }
}
