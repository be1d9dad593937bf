//! Dynamic royalty schedules.
//!
//! A schedule maps a sale price to a royalty expressed in basis points.
//! The only kind currently defined interpolates linearly between two
//! price anchors; further kinds are reserved behind the `kind`
//! discriminant and the padding fields.

use serde::{Deserialize, Serialize};

use crate::types::error::TokenGateError;

pub const DYNAMIC_ROYALTY_KIND_PRICE_LINEAR: u8 = 0;

/// Linear-by-price interpolation anchors.
///
/// Prices are integer base units of the host ledger. Multipliers are
/// basis points; a decreasing schedule (start above end) is valid and
/// interpolates downward.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLinear {
    pub start_price: u64,
    pub end_price: u64,
    pub start_multiplier_bp: u16,
    pub end_multiplier_bp: u16,
}

impl PriceLinear {
    pub fn valid(&self) -> Result<(), TokenGateError> {
        if self.start_price > self.end_price {
            return Err(TokenGateError::invalid_dynamic_royalty(
                "start_price must be less than or equal to end_price",
            ));
        }
        if self.start_multiplier_bp > 10000 || self.end_multiplier_bp > 10000 {
            return Err(TokenGateError::invalid_dynamic_royalty(
                "multiplier basis points must be less than or equal to 10000",
            ));
        }
        Ok(())
    }

    /// Interpolated multiplier at `price`, clamped to the anchor range.
    ///
    /// Equal price anchors return the start multiplier so a degenerate
    /// schedule never divides by zero.
    pub fn multiplier_bp(&self, price: u64) -> Result<u16, TokenGateError> {
        if self.end_price == self.start_price || price <= self.start_price {
            return Ok(self.start_multiplier_bp);
        }
        if price >= self.end_price {
            return Ok(self.end_multiplier_bp);
        }

        // (p - x1) / (x2 - x1) = (multiplier_bp - y1) / (y2 - y1)
        // thus, multiplier_bp = y1 + (y2 - y1) * (p - x1) / (x2 - x1)
        let x1 = self.start_price as i128;
        let x2 = self.end_price as i128;
        let y1 = self.start_multiplier_bp as i128;
        let y2 = self.end_multiplier_bp as i128;
        let p = price as i128;

        let y = y2.checked_sub(y1).ok_or(TokenGateError::NumericalOverflow)?;
        let d = p.checked_sub(x1).ok_or(TokenGateError::NumericalOverflow)?;
        let x = x2.checked_sub(x1).ok_or(TokenGateError::NumericalOverflow)?;

        let multiplier_bp = y1
            .checked_add(
                y.checked_mul(d)
                    .ok_or(TokenGateError::NumericalOverflow)?
                    .checked_div(x)
                    .ok_or(TokenGateError::NumericalOverflow)?,
            )
            .ok_or(TokenGateError::NumericalOverflow)?;

        Ok(match multiplier_bp {
            m if m < 0 => 0,
            m if m > u16::MAX as i128 => u16::MAX,
            m => m as u16,
        })
    }
}

/// Versioned dynamic royalty record attached to a policy.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicRoyalty {
    pub version: u8,
    pub kind: u8,
    /// Flat override: when set, the schedule kind and price are
    /// ignored by [`DynamicRoyalty::compute_fee_bp`].
    pub override_royalty_bp: Option<u16>,
    pub kind_price_linear: Option<PriceLinear>,
    pub _reserved_0: [u8; 32],
    pub _reserved_1: [u8; 32],
    pub _reserved_2: [u8; 32],
    pub _reserved_3: [u8; 32],
}

impl DynamicRoyalty {
    pub fn price_linear(kind_price_linear: PriceLinear) -> Self {
        Self {
            version: 1,
            kind: DYNAMIC_ROYALTY_KIND_PRICE_LINEAR,
            override_royalty_bp: None,
            kind_price_linear: Some(kind_price_linear),
            ..Default::default()
        }
    }

    #[inline(always)]
    fn safe_mul_bp(multiplier_bp: u16, bp: u16) -> u16 {
        let ret = (multiplier_bp as u32 * bp as u32 / 10000) as u16;
        if ret > 10000 {
            10000
        } else {
            ret
        }
    }

    pub fn valid(&self) -> Result<(), TokenGateError> {
        if let Some(override_bp) = self.override_royalty_bp {
            if override_bp > 10000 {
                return Err(TokenGateError::invalid_dynamic_royalty(
                    "override_royalty_bp must be less than or equal to 10000",
                ));
            }
        }
        match self.kind {
            DYNAMIC_ROYALTY_KIND_PRICE_LINEAR => match &self.kind_price_linear {
                Some(kind_price_linear) => kind_price_linear.valid(),
                None => Err(TokenGateError::invalid_dynamic_royalty(
                    "kind_price_linear must be set for the price-linear kind",
                )),
            },
            _ => Err(TokenGateError::invalid_dynamic_royalty(
                "unknown dynamic royalty kind",
            )),
        }
    }

    /// Royalty in basis points at `price`.
    ///
    /// The override wins outright; otherwise the schedule's multiplier
    /// is the fee. Always within `[0, 10000]` for a schedule that
    /// passed [`DynamicRoyalty::valid`].
    pub fn compute_fee_bp(&self, price: u64) -> u16 {
        if let Some(override_bp) = self.override_royalty_bp {
            return override_bp;
        }
        match self.kind {
            DYNAMIC_ROYALTY_KIND_PRICE_LINEAR => self
                .kind_price_linear
                .as_ref()
                .and_then(|linear| linear.multiplier_bp(price).ok())
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Royalty scaled against a base (metadata seller-fee) basis-point
    /// value, with the product clamped at 10000. The override replaces
    /// the base before scaling.
    pub fn royalty_bp(&self, price: u64, base_bp: u16) -> u16 {
        let royalty_bp = self.override_royalty_bp.unwrap_or(base_bp);

        match self.kind {
            DYNAMIC_ROYALTY_KIND_PRICE_LINEAR => self
                .kind_price_linear
                .as_ref()
                .and_then(|linear| linear.multiplier_bp(price).ok())
                .map(|multiplier_bp| Self::safe_mul_bp(multiplier_bp, royalty_bp))
                .unwrap_or(royalty_bp),
            _ => royalty_bp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_linear_interpolation() {
        // Anchors (10, 20) with multipliers 10000 -> 5000: halfway
        // price lands halfway between the multipliers.
        let linear = PriceLinear {
            start_price: 10,
            end_price: 20,
            start_multiplier_bp: 10000,
            end_multiplier_bp: 5000,
        };
        assert!(linear.valid().is_ok());
        assert_eq!(linear.multiplier_bp(15).unwrap(), 7500);
        assert_eq!(linear.multiplier_bp(0).unwrap(), 10000, "Clamped below");
        assert_eq!(linear.multiplier_bp(10).unwrap(), 10000);
        assert_eq!(linear.multiplier_bp(20).unwrap(), 5000);
        assert_eq!(linear.multiplier_bp(30).unwrap(), 5000, "Clamped above");
    }

    #[test]
    fn test_equal_price_anchors() {
        let linear = PriceLinear {
            start_price: 100,
            end_price: 100,
            start_multiplier_bp: 4000,
            end_multiplier_bp: 9000,
        };
        assert!(linear.valid().is_ok());
        assert_eq!(
            linear.multiplier_bp(100).unwrap(),
            4000,
            "Degenerate schedule returns the start multiplier"
        );
        assert_eq!(linear.multiplier_bp(500).unwrap(), 4000);
    }

    #[test]
    fn test_increasing_schedule() {
        let linear = PriceLinear {
            start_price: 100,
            end_price: 1000,
            start_multiplier_bp: 1000,
            end_multiplier_bp: 10000,
        };
        assert_eq!(linear.multiplier_bp(100).unwrap(), 1000);
        assert_eq!(linear.multiplier_bp(550).unwrap(), 5500);
        assert_eq!(linear.multiplier_bp(1000).unwrap(), 10000);
    }

    #[test]
    fn test_validation_rejects_bad_schedules() {
        let inverted = PriceLinear {
            start_price: 1000,
            end_price: 100,
            start_multiplier_bp: 10000,
            end_multiplier_bp: 5000,
        };
        assert!(inverted.valid().is_err(), "Inverted price bounds rejected");

        let oversized = PriceLinear {
            start_price: 100,
            end_price: 1000,
            start_multiplier_bp: 20000,
            end_multiplier_bp: 5000,
        };
        assert!(oversized.valid().is_err(), "Multiplier above 10000 rejected");

        let royalty = DynamicRoyalty {
            version: 1,
            kind: DYNAMIC_ROYALTY_KIND_PRICE_LINEAR,
            kind_price_linear: None,
            ..Default::default()
        };
        assert!(royalty.valid().is_err(), "Missing linear payload rejected");

        let royalty = DynamicRoyalty {
            version: 1,
            kind: 7,
            kind_price_linear: Some(PriceLinear::default()),
            ..Default::default()
        };
        assert!(royalty.valid().is_err(), "Unknown kind rejected");

        let royalty = DynamicRoyalty {
            version: 1,
            kind: DYNAMIC_ROYALTY_KIND_PRICE_LINEAR,
            override_royalty_bp: Some(10001),
            kind_price_linear: Some(PriceLinear::default()),
            ..Default::default()
        };
        assert!(royalty.valid().is_err(), "Oversized override rejected");
    }

    #[test]
    fn test_compute_fee_bp_interpolates_and_clamps() {
        let royalty = DynamicRoyalty::price_linear(PriceLinear {
            start_price: 10,
            end_price: 20,
            start_multiplier_bp: 10000,
            end_multiplier_bp: 5000,
        });
        assert!(royalty.valid().is_ok());
        assert_eq!(royalty.compute_fee_bp(15), 7500);
        assert_eq!(royalty.compute_fee_bp(0), 10000);
        assert_eq!(royalty.compute_fee_bp(30), 5000);
    }

    #[test]
    fn test_override_ignores_kind_and_price() {
        let mut royalty = DynamicRoyalty::price_linear(PriceLinear {
            start_price: 10,
            end_price: 20,
            start_multiplier_bp: 10000,
            end_multiplier_bp: 5000,
        });
        royalty.override_royalty_bp = Some(123);
        assert!(royalty.valid().is_ok());
        assert_eq!(royalty.compute_fee_bp(0), 123);
        assert_eq!(royalty.compute_fee_bp(15), 123);
        assert_eq!(royalty.compute_fee_bp(1_000_000), 123);
    }

    #[test]
    fn test_royalty_bp_scaled_against_base() {
        let royalty = DynamicRoyalty::price_linear(PriceLinear {
            start_price: 100,
            end_price: 1000,
            start_multiplier_bp: 10000,
            end_multiplier_bp: 100,
        });
        let base_bp = 1000;
        assert_eq!(royalty.royalty_bp(0, base_bp), 1000);
        assert_eq!(royalty.royalty_bp(100, base_bp), 1000);
        assert_eq!(royalty.royalty_bp(500, base_bp), 560);
        assert_eq!(royalty.royalty_bp(1000, base_bp), 10);
        assert_eq!(royalty.royalty_bp(10000, base_bp), 10);
    }

    #[test]
    fn test_royalty_bp_with_override_base() {
        let royalty = DynamicRoyalty {
            version: 1,
            kind: DYNAMIC_ROYALTY_KIND_PRICE_LINEAR,
            override_royalty_bp: Some(0),
            kind_price_linear: Some(PriceLinear {
                start_price: 100,
                end_price: 1000,
                start_multiplier_bp: 5000,
                end_multiplier_bp: 10000,
            }),
            ..Default::default()
        };
        for price in [0, 100, 500, 1000, 10000] {
            assert_eq!(royalty.royalty_bp(price, 1000), 0, "Zero override wins");
        }
    }
}
