//! Per-request cost estimation.

use switchyard_common::{ProviderInstance, RequestUnits};

/// Computes what a request would cost at a provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostModel;

impl CostModel {
    pub fn new() -> Self {
        Self
    }

    /// Rate times the request's quantity of the provider's billing unit.
    /// Per-request providers count as one unit.
    #[inline]
    pub fn estimate(&self, instance: &ProviderInstance, units: &RequestUnits) -> f64 {
        instance.cost.amount * units.quantity(instance.cost.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_common::{BillingUnit, CostRate};

    fn provider(rate: CostRate) -> ProviderInstance {
        ProviderInstance::new("p1", "chat", "https://p1.example", rate)
    }

    #[test]
    fn test_per_request_ignores_units() {
        let model = CostModel::new();
        let p = provider(CostRate::per_request(0.0018));
        assert_eq!(model.estimate(&p, &RequestUnits::default()), 0.0018);
        assert_eq!(model.estimate(&p, &RequestUnits::tokens(5000)), 0.0018);
    }

    #[test]
    fn test_token_billing() {
        let model = CostModel::new();
        let p = provider(CostRate::new(0.000002, BillingUnit::Token));
        let cost = model.estimate(&p, &RequestUnits::tokens(1000));
        assert!((cost - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_minute_and_image_billing() {
        let model = CostModel::new();
        let units = RequestUnits {
            minutes: 2.5,
            images: 3,
            ..Default::default()
        };
        let voice = provider(CostRate::new(0.01, BillingUnit::Minute));
        let images = provider(CostRate::new(0.04, BillingUnit::Image));
        assert!((model.estimate(&voice, &units) - 0.025).abs() < 1e-12);
        assert!((model.estimate(&images, &units) - 0.12).abs() < 1e-12);
        let sms = provider(CostRate::new(0.00001, BillingUnit::Character));
        assert_eq!(model.estimate(&sms, &units), 0.0);
    }
}
