use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::engine::error::OrchestrationError;
use crate::models::payment_record::{PaymentSchedule, PaymentSlot};
use crate::services::crm::{Deal, DealLineItem, DiscountKind};

/// Banker's rounding at two decimal places, so repeated recomputation does
/// not drift.
pub fn normalize_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

fn line_item_amount(item: &DealLineItem) -> Option<Decimal> {
    // A pre-computed total already reflects the item-level discount
    if let Some(total) = item.total {
        return Some(total);
    }

    let unit_price = item.unit_price?;
    let gross = unit_price * Decimal::from(item.quantity);
    let net = match (item.discount, item.discount_kind) {
        (Some(discount), Some(DiscountKind::Percentage)) => {
            gross - gross * discount / dec!(100)
        }
        (Some(discount), Some(DiscountKind::Amount)) => gross - discount,
        _ => gross,
    };
    Some(net)
}

/// Amount owed on a deal: line items first (pre-computed totals, then
/// unit x quantity with discounts), falling back to the deal's declared
/// value, minus any out-of-band cash pre-payment (clamped at zero).
pub fn compute_deal_amount(
    deal: &Deal,
    line_items: &[DealLineItem],
) -> Result<Decimal, OrchestrationError> {
    let items_total: Decimal = line_items.iter().filter_map(line_item_amount).sum();

    let base = if items_total > Decimal::ZERO {
        items_total
    } else {
        deal.value.unwrap_or(Decimal::ZERO)
    };

    if base <= Decimal::ZERO {
        return Err(OrchestrationError::AmountUndetermined { deal_id: deal.id });
    }

    let cash = deal.cash_prepaid.unwrap_or(Decimal::ZERO);
    let after_cash = (base - cash).max(Decimal::ZERO);

    Ok(normalize_money(after_cash))
}

/// Amount for one payment slot. A caller-supplied custom amount wins
/// verbatim (used for remainder payments); otherwise deposit/rest under a
/// split plan get half the base and a single gets all of it.
pub fn compute_slot_amount(
    deal: &Deal,
    line_items: &[DealLineItem],
    schedule: PaymentSchedule,
    slot: PaymentSlot,
    custom_amount: Option<Decimal>,
) -> Result<Decimal, OrchestrationError> {
    if let Some(custom) = custom_amount {
        return Ok(normalize_money(custom));
    }

    let base = compute_deal_amount(deal, line_items)?;
    let amount = match (schedule, slot) {
        (PaymentSchedule::Split, PaymentSlot::Deposit)
        | (PaymentSchedule::Split, PaymentSlot::Rest) => base / dec!(2),
        _ => base,
    };
    Ok(normalize_money(amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deal(value: Option<Decimal>, cash: Option<Decimal>) -> Deal {
        Deal {
            id: 7,
            title: "Lisbon getaway".into(),
            value,
            currency: "PLN".into(),
            status: "open".into(),
            stage_id: Some(2),
            expected_close_date: None,
            invoice_type: None,
            lost_reason: None,
            cash_prepaid: cash,
            person_id: None,
            org_id: None,
        }
    }

    fn item(
        total: Option<Decimal>,
        unit_price: Option<Decimal>,
        quantity: u64,
        discount: Option<Decimal>,
        kind: Option<DiscountKind>,
    ) -> DealLineItem {
        DealLineItem {
            product_id: 11,
            name: "Tour package".into(),
            quantity,
            unit_price,
            total,
            discount,
            discount_kind: kind,
        }
    }

    #[test]
    fn precomputed_total_wins_over_unit_price() {
        let items = vec![item(Some(dec!(1800)), Some(dec!(1000)), 2, None, None)];
        let amount = compute_deal_amount(&deal(Some(dec!(5000)), None), &items).unwrap();
        assert_eq!(amount, dec!(1800.00));
    }

    #[test]
    fn unit_price_with_percentage_discount() {
        let items = vec![item(
            None,
            Some(dec!(1000)),
            2,
            Some(dec!(10)),
            Some(DiscountKind::Percentage),
        )];
        let amount = compute_deal_amount(&deal(None, None), &items).unwrap();
        assert_eq!(amount, dec!(1800.00));
    }

    #[test]
    fn unit_price_with_absolute_discount() {
        let items = vec![item(
            None,
            Some(dec!(1000)),
            2,
            Some(dec!(150)),
            Some(DiscountKind::Amount),
        )];
        let amount = compute_deal_amount(&deal(None, None), &items).unwrap();
        assert_eq!(amount, dec!(1850.00));
    }

    #[test]
    fn falls_back_to_deal_value_without_usable_items() {
        let amount = compute_deal_amount(&deal(Some(dec!(2000)), None), &[]).unwrap();
        assert_eq!(amount, dec!(2000.00));
    }

    #[test]
    fn no_amount_from_any_source_is_an_error() {
        let err = compute_deal_amount(&deal(None, None), &[]).unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::AmountUndetermined { deal_id: 7 }
        ));

        let err = compute_deal_amount(&deal(Some(dec!(0)), None), &[]).unwrap_err();
        assert!(matches!(err, OrchestrationError::AmountUndetermined { .. }));
    }

    #[test]
    fn cash_prepayment_is_deducted_and_clamped() {
        let amount =
            compute_deal_amount(&deal(Some(dec!(2000)), Some(dec!(200))), &[]).unwrap();
        assert_eq!(amount, dec!(1800.00));

        let clamped =
            compute_deal_amount(&deal(Some(dec!(2000)), Some(dec!(9999))), &[]).unwrap();
        assert_eq!(clamped, dec!(0.00));
    }

    #[test]
    fn rounding_is_banker_style() {
        let items = vec![item(Some(dec!(10.125)), None, 1, None, None)];
        let amount = compute_deal_amount(&deal(None, None), &items).unwrap();
        assert_eq!(amount, dec!(10.12));

        let items = vec![item(Some(dec!(10.135)), None, 1, None, None)];
        let amount = compute_deal_amount(&deal(None, None), &items).unwrap();
        assert_eq!(amount, dec!(10.14));
    }

    #[test]
    fn split_slots_get_half_single_gets_all() {
        let d = deal(Some(dec!(1000)), None);

        let deposit = compute_slot_amount(
            &d,
            &[],
            PaymentSchedule::Split,
            PaymentSlot::Deposit,
            None,
        )
        .unwrap();
        assert_eq!(deposit, dec!(500.00));

        let rest =
            compute_slot_amount(&d, &[], PaymentSchedule::Split, PaymentSlot::Rest, None)
                .unwrap();
        assert_eq!(rest, dec!(500.00));

        let single =
            compute_slot_amount(&d, &[], PaymentSchedule::Full, PaymentSlot::Single, None)
                .unwrap();
        assert_eq!(single, dec!(1000.00));
    }

    #[test]
    fn custom_amount_is_returned_verbatim() {
        let d = deal(Some(dec!(1000)), None);
        let amount = compute_slot_amount(
            &d,
            &[],
            PaymentSchedule::Split,
            PaymentSlot::Rest,
            Some(dec!(812.55)),
        )
        .unwrap();
        assert_eq!(amount, dec!(812.55));
    }
}
