use firewood_types::SellRequest;

use crate::StoreError;

/// Signed change to a seller's stock counters, applied atomically by the store.
///
/// Applying a delta fails instead of clamping when a counter would go
/// negative or when `amount_reserved + amount_staged` would exceed
/// `current_capacity`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SellCounterDelta {
    pub current_capacity: i64,
    pub amount_reserved: i64,
    pub amount_staged: i64,
    pub num_reserved: i64,
    pub num_staged: i64,
    pub prepare_for_pickup: i64,
}

impl SellCounterDelta {
    /// One new reservation holding `amount` bags
    pub fn reserve(amount: u32) -> Self {
        Self {
            num_reserved: 1,
            amount_reserved: i64::from(amount),
            ..Default::default()
        }
    }

    /// One new staged sale of `amount` bags
    pub fn stage(amount: u32) -> Self {
        Self {
            num_staged: 1,
            amount_staged: i64::from(amount),
            ..Default::default()
        }
    }

    /// Withdraw one staged sale of `amount` bags
    pub fn unstage(amount: u32) -> Self {
        Self {
            num_staged: -1,
            amount_staged: -i64::from(amount),
            ..Default::default()
        }
    }

    pub fn prepare_for_pickup(amount: i64) -> Self {
        Self {
            prepare_for_pickup: amount,
            ..Default::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Compute the updated seller, or the violation the update would cause
    pub fn apply(&self, seller: &SellRequest) -> Result<SellRequest, StoreError> {
        let name = &seller.name;
        let mut updated = seller.clone();
        updated.current_capacity =
            shift(name, "current_capacity", seller.current_capacity, self.current_capacity)?;
        updated.amount_reserved =
            shift(name, "amount_reserved", seller.amount_reserved, self.amount_reserved)?;
        updated.amount_staged = shift(name, "amount_staged", seller.amount_staged, self.amount_staged)?;
        updated.num_reserved = shift(name, "num_reserved", seller.num_reserved, self.num_reserved)?;
        updated.num_staged = shift(name, "num_staged", seller.num_staged, self.num_staged)?;
        updated.prepare_for_pickup = shift(
            name,
            "prepare_for_pickup",
            seller.prepare_for_pickup,
            self.prepare_for_pickup,
        )?;

        if !updated.is_within_capacity() {
            return Err(StoreError::CapacityExceeded {
                name: name.clone(),
                reserved: updated.amount_reserved,
                staged: updated.amount_staged,
                capacity: updated.current_capacity,
            });
        }

        Ok(updated)
    }
}

fn shift(name: &str, field: &'static str, value: u32, delta: i64) -> Result<u32, StoreError> {
    let next = i64::from(value) + delta;
    u32::try_from(next).map_err(|_| StoreError::CounterUnderflow {
        name: name.to_string(),
        field,
    })
}
