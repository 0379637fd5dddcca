//! Merge several decisions for the same ticker and tick into one.
//!
//! Plurality vote on action; ties go to HOLD, then SELL, then BUY. The
//! winning side's amounts and confidences are averaged. A SELL of 0 is a
//! full exit and counts as 100 percent in the average.

use crate::domain::decision::{
    truncate_chars, Action, Decision, MAX_REASON_LEN, MAX_STRATEGY_LEN,
};

pub const CONSENSUS_SOURCE_ID: &str = "CONSENSUS";

/// At most this many contributing reasons are quoted.
pub const MAX_QUOTED_REASONS: usize = 3;

/// Tie-break priority, highest first.
const PRIORITY: [Action; 3] = [Action::Hold, Action::Sell, Action::Buy];

pub fn aggregate(decisions: &[Decision]) -> Decision {
    if decisions.is_empty() {
        return Decision::hold(CONSENSUS_SOURCE_ID, "No decisions available");
    }

    let votes = |action: Action| decisions.iter().filter(|d| d.action() == action).count();
    let winner = PRIORITY
        .iter()
        .copied()
        .fold(None::<(Action, usize)>, |best, action| {
            let count = votes(action);
            match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((action, count)),
            }
        })
        .map(|(action, _)| action)
        .unwrap_or(Action::Hold);

    let winners: Vec<&Decision> = decisions.iter().filter(|d| d.action() == winner).collect();
    let n = winners.len() as f64;
    let amount = winners.iter().map(|d| vote_amount(d)).sum::<f64>() / n;
    let confidence = winners.iter().map(|d| d.confidence()).sum::<f64>() / n;

    let quoted: Vec<&str> = winners
        .iter()
        .map(|d| d.reason())
        .filter(|r| !r.is_empty())
        .take(MAX_QUOTED_REASONS)
        .collect();
    let reason = truncate_chars(
        &format!("Consensus {}: {}", winner, quoted.join(" | ")),
        MAX_REASON_LEN,
    );

    let mut tags: Vec<&str> = Vec::new();
    for tag in winners.iter().map(|d| d.strategy()) {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    let strategy = if tags.is_empty() {
        "consensus".to_string()
    } else {
        truncate_chars(&tags.join(" | "), MAX_STRATEGY_LEN)
    };

    // Means of validated inputs stay within bounds, so this cannot fail.
    Decision::new(CONSENSUS_SOURCE_ID, winner, amount, &reason, confidence, strategy.as_str())
        .unwrap_or_else(|_| Decision::hold(CONSENSUS_SOURCE_ID, &reason))
}

fn vote_amount(decision: &Decision) -> f64 {
    match decision.action() {
        Action::Sell if decision.amount() <= 0.0 => 100.0,
        _ => decision.amount(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::DEFAULT_CONFIDENCE;

    fn d(
        source: &str,
        action: Action,
        amount: f64,
        confidence: f64,
        reason: &str,
        strategy: &str,
    ) -> Decision {
        Decision::new(source, action, amount, reason, confidence, strategy).unwrap()
    }

    #[test]
    fn plurality_buy_averages_amount() {
        let decisions = vec![
            d("a", Action::Buy, 100.0, 0.6, "momentum", "trend"),
            d("b", Action::Buy, 200.0, 0.8, "breakout", "trend"),
            d("c", Action::Sell, 50.0, 0.9, "overbought", "mean_reversion"),
        ];
        let c = aggregate(&decisions);

        assert_eq!(c.action(), Action::Buy);
        assert!((c.amount() - 150.0).abs() < 1e-12);
        assert!((c.confidence() - 0.7).abs() < 1e-12);
        assert_eq!(c.source_id(), CONSENSUS_SOURCE_ID);
        assert_eq!(c.reason(), "Consensus BUY: momentum | breakout");
        assert_eq!(c.strategy(), "trend");
    }

    #[test]
    fn tie_prefers_hold_over_sell_and_buy() {
        let decisions = vec![
            d("a", Action::Buy, 100.0, 0.5, "x", ""),
            d("b", Action::Sell, 50.0, 0.5, "y", ""),
            d("c", Action::Hold, 0.0, 0.5, "z", ""),
        ];
        assert_eq!(aggregate(&decisions).action(), Action::Hold);
    }

    #[test]
    fn tie_prefers_sell_over_buy() {
        let decisions = vec![
            d("a", Action::Buy, 100.0, 0.5, "x", ""),
            d("b", Action::Sell, 50.0, 0.5, "y", ""),
        ];
        let c = aggregate(&decisions);
        assert_eq!(c.action(), Action::Sell);
        assert!((c.amount() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn full_exit_sells_average_as_whole_position() {
        let both_full = vec![
            d("a", Action::Sell, 0.0, 0.5, "exit", ""),
            d("b", Action::Sell, 100.0, 0.5, "exit", ""),
        ];
        assert!((aggregate(&both_full).amount() - 100.0).abs() < f64::EPSILON);

        let full_and_half = vec![
            d("a", Action::Sell, 0.0, 0.5, "exit", ""),
            d("b", Action::Sell, 50.0, 0.5, "trim", ""),
        ];
        assert!((aggregate(&full_and_half).amount() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_buy_is_not_rescaled() {
        let decisions = vec![
            d("a", Action::Buy, 0.0, 0.5, "x", ""),
            d("b", Action::Buy, 100.0, 0.5, "y", ""),
        ];
        assert!((aggregate(&decisions).amount() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_input_holds() {
        let c = aggregate(&[]);
        assert_eq!(c.action(), Action::Hold);
        assert_eq!(c.reason(), "No decisions available");
        assert_eq!(c.source_id(), CONSENSUS_SOURCE_ID);
        assert!((c.confidence() - DEFAULT_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn reasons_are_capped_and_bounded() {
        let long = "r".repeat(200);
        let decisions: Vec<Decision> = (0..5)
            .map(|i| d(&format!("s{}", i), Action::Sell, 10.0, 0.5, &long, ""))
            .collect();
        let c = aggregate(&decisions);
        assert!(c.reason().chars().count() <= MAX_REASON_LEN);
        assert!(c.reason().starts_with("Consensus SELL: "));
    }

    #[test]
    fn strategy_union_without_duplicates() {
        let decisions = vec![
            d("a", Action::Buy, 10.0, 0.5, "", "trend"),
            d("b", Action::Buy, 10.0, 0.5, "", "momentum"),
            d("c", Action::Buy, 10.0, 0.5, "", "trend"),
        ];
        assert_eq!(aggregate(&decisions).strategy(), "trend | momentum");
    }

    #[test]
    fn missing_tags_fall_back() {
        let decisions = vec![d("a", Action::Hold, 0.0, 0.5, "wait", "")];
        assert_eq!(aggregate(&decisions).strategy(), "consensus");
    }

    #[test]
    fn single_decision_passes_through_values() {
        let decisions = vec![d("a", Action::Sell, 40.0, 0.9, "take profit", "swing")];
        let c = aggregate(&decisions);
        assert_eq!(c.action(), Action::Sell);
        assert!((c.amount() - 40.0).abs() < f64::EPSILON);
        assert!((c.confidence() - 0.9).abs() < f64::EPSILON);
    }
}
