//! Order lifecycle rules.
//!
//! Any of the five statuses may be set from any current status. The only
//! transition with a side effect is entering `cancelled` from a different
//! status, which releases the order's reserved stock.

use super::errors::DomainError;
use super::order::OrderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Same status written again; only `updated_at` moves.
    Unchanged,
    /// Plain status write, no stock changes.
    Plain,
    /// Entering `cancelled`: stock for every line must be released in the
    /// same atomic unit as the status write.
    Cancel,
    /// Leaving `cancelled`. Accepted without re-reserving stock.
    Reopen,
}

impl Transition {
    pub fn requires_compensation(&self) -> bool {
        matches!(self, Transition::Cancel)
    }
}

/// Validates `requested` and classifies the move from `current`.
pub fn evaluate(current: OrderStatus, requested: &str) -> Result<(OrderStatus, Transition), DomainError> {
    let target: OrderStatus = requested.parse()?;
    Ok((target, classify(current, target)))
}

pub fn classify(current: OrderStatus, target: OrderStatus) -> Transition {
    match (current, target) {
        (a, b) if a == b => Transition::Unchanged,
        (_, OrderStatus::Cancelled) => Transition::Cancel,
        (OrderStatus::Cancelled, _) => Transition::Reopen,
        _ => Transition::Plain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entering_cancelled_from_any_other_status_compensates() {
        for current in OrderStatus::ALL {
            if current == OrderStatus::Cancelled {
                continue;
            }
            let transition = classify(current, OrderStatus::Cancelled);
            assert_eq!(transition, Transition::Cancel, "from {current}");
            assert!(transition.requires_compensation());
        }
    }

    #[test]
    fn cancelling_twice_does_not_compensate() {
        let transition = classify(OrderStatus::Cancelled, OrderStatus::Cancelled);
        assert_eq!(transition, Transition::Unchanged);
        assert!(!transition.requires_compensation());
    }

    #[test]
    fn leaving_cancelled_is_accepted_without_compensation() {
        for target in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            let transition = classify(OrderStatus::Cancelled, target);
            assert_eq!(transition, Transition::Reopen);
            assert!(!transition.requires_compensation());
        }
    }

    #[test]
    fn forward_and_backward_skips_are_plain_writes() {
        assert_eq!(classify(OrderStatus::Pending, OrderStatus::Delivered), Transition::Plain);
        assert_eq!(classify(OrderStatus::Delivered, OrderStatus::Pending), Transition::Plain);
        assert_eq!(classify(OrderStatus::Shipped, OrderStatus::Shipped), Transition::Unchanged);
    }

    #[test]
    fn evaluate_rejects_unknown_status() {
        let err = evaluate(OrderStatus::Pending, "returned").unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatus(s) if s == "returned"));
    }

    #[test]
    fn evaluate_returns_target_and_transition() {
        let (target, transition) = evaluate(OrderStatus::Processing, "cancelled").unwrap();
        assert_eq!(target, OrderStatus::Cancelled);
        assert_eq!(transition, Transition::Cancel);
    }
}
