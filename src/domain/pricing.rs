//! Deterministic price computation.
//!
//! Each item type bills differently, so the per-type rules live behind the
//! [`PricingPolicy`] trait and the [`PriceCalculator`] only assembles the
//! breakdown.

use super::calendar::DateRange;
use super::item::{ItemSnapshot, ItemType, PriceType, PriceUnit};
use crate::error::{BookingError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Monetary values are kept to 2 decimal places.
const MONEY_DP: u32 = 2;

/// How an item type turns a nightly/daily/fixed price into a base price.
pub trait PricingPolicy: Send + Sync {
    /// How many times the item's price is charged for a stay of `days`.
    fn billed_units(&self, days: u32, unit: PriceUnit) -> u32;

    /// Whether guests beyond the first are charged `extra_guest_price`.
    fn charges_extra_guests(&self) -> bool;
}

/// Properties are billed per night.
pub struct NightlyStay;

/// Vehicles are billed per rental day.
pub struct DailyRental;

/// Tours run on a fixed date and are billed once.
pub struct FixedTour;

impl PricingPolicy for NightlyStay {
    fn billed_units(&self, days: u32, unit: PriceUnit) -> u32 {
        if unit == PriceUnit::Fixed { 1 } else { days }
    }

    fn charges_extra_guests(&self) -> bool {
        true
    }
}

impl PricingPolicy for DailyRental {
    fn billed_units(&self, days: u32, unit: PriceUnit) -> u32 {
        if unit == PriceUnit::Fixed { 1 } else { days }
    }

    fn charges_extra_guests(&self) -> bool {
        false
    }
}

impl PricingPolicy for FixedTour {
    fn billed_units(&self, _days: u32, _unit: PriceUnit) -> u32 {
        1
    }

    fn charges_extra_guests(&self) -> bool {
        true
    }
}

impl ItemType {
    pub fn pricing_policy(&self) -> &'static dyn PricingPolicy {
        match self {
            ItemType::Property => &NightlyStay,
            ItemType::Vehicle => &DailyRental,
            ItemType::Tour => &FixedTour,
        }
    }
}

/// An option as priced at quote time. Stored on the reservation verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOption {
    pub id: String,
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub base_price: Decimal,
    pub options_price: Decimal,
    pub tax_amount: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub days: u32,
    pub options: Vec<ResolvedOption>,
}

/// Turns an item snapshot and a booking request into a [`PriceBreakdown`].
#[derive(Debug, Clone, Copy)]
pub struct PriceCalculator {
    tax_rate: Decimal,
}

impl PriceCalculator {
    pub fn new(tax_rate: Decimal) -> Self {
        Self { tax_rate }
    }

    pub fn calculate(
        &self,
        item: &ItemSnapshot,
        range: &DateRange,
        guests: u32,
        option_ids: &[String],
    ) -> Result<PriceBreakdown> {
        validate_guests(item, guests)?;

        let policy = item.item.item_type.pricing_policy();
        let days = range.days();

        let mut base_price = item.price * Decimal::from(policy.billed_units(days, item.price_unit));
        if guests > 1
            && policy.charges_extra_guests()
            && let Some(extra) = item.extra_guest_price
        {
            base_price += Decimal::from(guests - 1) * extra;
        }

        let options: Vec<ResolvedOption> = option_ids
            .iter()
            .filter_map(|id| item.option(id))
            .map(|option| {
                let units = match option.price_type {
                    PriceType::PerDay => days,
                    PriceType::Flat => 1,
                };
                ResolvedOption {
                    id: option.id.clone(),
                    name: option.name.clone(),
                    price: option.price * Decimal::from(units),
                }
            })
            .collect();
        let options_price: Decimal = options.iter().map(|o| o.price).sum();

        let tax_amount = ((base_price + options_price) * self.tax_rate)
            .round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero);
        let discount = Decimal::ZERO;
        let total = base_price + options_price + tax_amount - discount;

        Ok(PriceBreakdown {
            base_price,
            options_price,
            tax_amount,
            discount,
            total,
            currency: item.currency.clone(),
            days,
            options,
        })
    }
}

fn validate_guests(item: &ItemSnapshot, guests: u32) -> Result<()> {
    if guests == 0 {
        return Err(BookingError::InvalidRequest(
            "at least one guest is required".to_string(),
        ));
    }
    if let Some(max) = item.max_guests
        && guests > max
    {
        return Err(BookingError::InvalidRequest(format!(
            "{} accepts at most {} guests, requested {}",
            item.item, max, guests
        )));
    }
    Ok(())
}
