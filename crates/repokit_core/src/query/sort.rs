//! Sort descriptors.

use crate::model::entity::EntityMeta;
use crate::query::QueryError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// Ordered list of sort keys. Backends append the id column as a final
/// ascending key so equal keys still page deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn by(direction: Direction, fields: &[&str]) -> Self {
        Self {
            orders: fields
                .iter()
                .map(|field| Order {
                    field: (*field).to_string(),
                    direction,
                })
                .collect(),
        }
    }

    pub fn asc(field: &str) -> Self {
        Self::by(Direction::Asc, &[field])
    }

    pub fn desc(field: &str) -> Self {
        Self::by(Direction::Desc, &[field])
    }

    #[must_use]
    pub fn and(mut self, other: Sort) -> Self {
        self.orders.extend(other.orders);
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn validate(&self, meta: &'static EntityMeta) -> Result<(), QueryError> {
        for order in &self.orders {
            if meta.field(order.field.as_str()).is_none() {
                return Err(QueryError::UnknownField {
                    entity: meta.name,
                    field: order.field.clone(),
                });
            }
        }
        Ok(())
    }
}
