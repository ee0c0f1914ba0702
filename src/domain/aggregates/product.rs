//! Product read model
//!
//! Products belong to the external catalog. The core only reads the name and
//! price of a product by id and never writes back.

use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{Money, ProductId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    id: ProductId,
    name: String,
    price: Money,
}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>, price: Money) -> Self {
        Self { id, name: name.into(), price }
    }

    pub fn id(&self) -> ProductId { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn price(&self) -> &Money { &self.price }
    pub fn currency(&self) -> &str { self.price.currency() }

    pub fn update_price(&mut self, new_price: Money) { self.price = new_price; }
}
