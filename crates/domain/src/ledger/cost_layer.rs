//! Cost layer engine.
//!
//! Each receipt becomes a layer of (quantity, unit cost). Consumption walks
//! the layers in valuation order and reports what it drew from each one, so
//! cost of goods sold is the sum of quantity x unit cost over the layers
//! touched.

use chrono::{DateTime, Utc};
use common::{Currency, Money, MoneyError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How consumed stock is costed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValuationMethod {
    /// Oldest layer first.
    #[default]
    Fifo,
    /// Newest layer first.
    Lifo,
    /// Pooled value; no layers are kept.
    WeightedAverage,
}

impl ValuationMethod {
    pub fn uses_layers(&self) -> bool {
        matches!(self, ValuationMethod::Fifo | ValuationMethod::Lifo)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValuationMethod::Fifo => "FIFO",
            ValuationMethod::Lifo => "LIFO",
            ValuationMethod::WeightedAverage => "WEIGHTED_AVERAGE",
        }
    }
}

impl std::fmt::Display for ValuationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch of received stock at one unit cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLayer {
    pub layer_id: String,
    pub quantity: u64,
    pub unit_cost: Money,
    pub source_reference: String,
    pub received_at: DateTime<Utc>,
}

impl CostLayer {
    pub fn value(&self) -> Result<Money, MoneyError> {
        self.unit_cost.times(self.quantity)
    }
}

/// Quantity drawn from one layer by a consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDraw {
    pub layer_id: String,
    pub quantity: u64,
    pub unit_cost: Money,
    pub value: Money,
    /// The draw empties the layer.
    pub exhausts_layer: bool,
}

/// Ordered queue of cost layers, oldest at the front.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostLayers(Vec<CostLayer>);

impl CostLayers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer at the tail. Layers are never merged, even at equal
    /// unit cost.
    pub fn add_cost_layer(
        &mut self,
        quantity: u64,
        unit_cost: Money,
        source_reference: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> &CostLayer {
        self.0.push(CostLayer {
            layer_id: format!("CL-{}", Uuid::new_v4().simple()),
            quantity,
            unit_cost,
            source_reference: source_reference.into(),
            received_at,
        });
        &self.0[self.0.len() - 1]
    }

    pub fn layers(&self) -> &[CostLayer] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn newest(&self) -> Option<&CostLayer> {
        self.0.last()
    }

    pub fn total_quantity(&self) -> u64 {
        self.0.iter().map(|l| l.quantity).sum()
    }

    pub fn total_value(&self, currency: Currency) -> Result<Money, MoneyError> {
        self.0
            .iter()
            .try_fold(Money::zero(currency), |acc, layer| acc.try_add(layer.value()?))
    }

    /// Plans drawing `quantity` units without touching the layers.
    ///
    /// Returns `None` if the layers hold fewer than `quantity` units.
    pub fn plan_draw(
        &self,
        quantity: u64,
        method: ValuationMethod,
    ) -> Result<Option<Vec<LayerDraw>>, MoneyError> {
        if self.total_quantity() < quantity {
            return Ok(None);
        }

        let ordered: Box<dyn Iterator<Item = &CostLayer> + '_> = match method {
            ValuationMethod::Lifo => Box::new(self.0.iter().rev()),
            _ => Box::new(self.0.iter()),
        };

        let mut remaining = quantity;
        let mut draws = Vec::new();
        for layer in ordered {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(layer.quantity);
            if take == 0 {
                continue;
            }
            draws.push(LayerDraw {
                layer_id: layer.layer_id.clone(),
                quantity: take,
                unit_cost: layer.unit_cost,
                value: layer.unit_cost.times(take)?,
                exhausts_layer: take == layer.quantity,
            });
            remaining -= take;
        }
        Ok(Some(draws))
    }

    /// Applies a plan from [`CostLayers::plan_draw`]: exhausted layers are
    /// removed, partially drawn layers are decremented in place.
    pub fn apply_draws(&mut self, draws: &[LayerDraw]) {
        for draw in draws {
            if let Some(layer) = self.0.iter_mut().find(|l| l.layer_id == draw.layer_id) {
                layer.quantity = layer.quantity.saturating_sub(draw.quantity);
            }
        }
        self.0.retain(|l| l.quantity > 0);
    }
}
