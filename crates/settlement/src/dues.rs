use async_trait::async_trait;
use firewood_types::{IncomingPayment, OngoingRoute};
use rust_decimal::Decimal;
use tracing::warn;

use crate::LifecycleError;

/// Policy for a finished route whose buyers have not all paid yet.
///
/// Called after the route has been moved to `missing_payments` and its
/// outstanding delivery indexes recorded.
#[async_trait]
pub trait DuesHandler: Send + Sync {
    async fn handle_dues(
        &self,
        route: &OngoingRoute,
        dues: &[IncomingPayment],
    ) -> Result<(), LifecycleError>;
}

/// Leave the route in `missing_payments` until the buyers pay, then finish it
/// through `RouteLifecycle::retry_wrap_up`
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldUntilPaid;

#[async_trait]
impl DuesHandler for HoldUntilPaid {
    async fn handle_dues(
        &self,
        route: &OngoingRoute,
        dues: &[IncomingPayment],
    ) -> Result<(), LifecycleError> {
        let outstanding: Decimal = dues.iter().map(|p| p.amount).sum();
        warn!(
            route_id = %route.id,
            driver = %route.drive_request,
            unpaid = dues.len(),
            %outstanding,
            "Route held until buyers have paid"
        );
        Ok(())
    }
}
