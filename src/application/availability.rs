use crate::domain::calendar::DateRange;
use crate::domain::item::BookableItemRef;
use crate::domain::ports::ReservationStoreRef;
use crate::domain::reservation::ReservationId;
use crate::error::Result;

/// Read-only overlap queries against the reservation store.
///
/// Answers are advisory: they reflect committed state at the time of the
/// read and may be stale by the time a booking is attempted. The store's
/// `create` is the only place availability is enforced.
#[derive(Clone)]
pub struct AvailabilityIndex {
    store: ReservationStoreRef,
}

impl AvailabilityIndex {
    pub fn new(store: ReservationStoreRef) -> Self {
        Self { store }
    }

    /// Pending and confirmed ranges of `item` that collide with `range`.
    pub async fn find_overlapping(
        &self,
        item: &BookableItemRef,
        range: &DateRange,
        exclude: Option<ReservationId>,
    ) -> Result<Vec<DateRange>> {
        self.store.find_overlapping(item, range, exclude).await
    }

    pub async fn is_available(
        &self,
        item: &BookableItemRef,
        range: &DateRange,
        exclude: Option<ReservationId>,
    ) -> Result<bool> {
        Ok(self.find_overlapping(item, range, exclude).await?.is_empty())
    }
}
