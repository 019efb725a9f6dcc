use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("invalid order: {0}")]
    Invalid(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    /// The distributor answered with an `{error}` payload.
    #[error("distributor rejected order: {0}")]
    Rejected(String),
}

/// Postal address block used for both the requestor and the ship-to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub item_code: String,
    pub item_qty: u32,
}

/// A drop-ship order placed with the distributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Merchant-side order reference, echoed back by the distributor.
    pub reference: String,
    pub requestor: Address,
    pub shipping: Address,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Reject orders the distributor would refuse anyway.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.reference.trim().is_empty() {
            return Err(OrderError::Invalid("missing order reference".into()));
        }
        if self.lines.is_empty() {
            return Err(OrderError::Invalid("order has no lines".into()));
        }
        if let Some(line) = self
            .lines
            .iter()
            .find(|line| line.item_code.trim().is_empty() || line.item_qty == 0)
        {
            return Err(OrderError::Invalid(format!(
                "bad line {:?} x {}",
                line.item_code, line.item_qty
            )));
        }
        if self.shipping.line1.trim().is_empty() || self.shipping.postal_code.trim().is_empty() {
            return Err(OrderError::Invalid("incomplete shipping address".into()));
        }
        Ok(())
    }

    pub fn total_quantity(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.item_qty)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    /// Distributor-assigned order identifier.
    pub order_id: String,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Submits orders to a distributor. One request per order.
#[async_trait::async_trait]
pub trait OrderClient: Send + Sync {
    async fn submit_order(&self, order: &Order) -> Result<OrderConfirmation, OrderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address {
            name: "Jo Doe".into(),
            line1: "1 Main St".into(),
            city: "Springfield".into(),
            region: "IL".into(),
            postal_code: "62701".into(),
            country: "US".into(),
            ..Default::default()
        }
    }

    fn order(lines: Vec<OrderLine>) -> Order {
        Order {
            reference: "WEB-1001".into(),
            requestor: address(),
            shipping: address(),
            lines,
        }
    }

    #[test]
    fn valid_order_passes() {
        let order = order(vec![
            OrderLine {
                item_code: "A-1".into(),
                item_qty: 2,
            },
            OrderLine {
                item_code: "B-2".into(),
                item_qty: 1,
            },
        ]);
        assert!(order.validate().is_ok());
        assert_eq!(order.total_quantity(), 3);
    }

    #[test]
    fn empty_order_is_invalid() {
        assert!(matches!(order(vec![]).validate(), Err(OrderError::Invalid(_))));
    }

    #[test]
    fn zero_quantity_line_is_invalid() {
        let order = order(vec![OrderLine {
            item_code: "A-1".into(),
            item_qty: 0,
        }]);
        assert!(matches!(order.validate(), Err(OrderError::Invalid(_))));
    }

    #[test]
    fn optional_address_fields_are_omitted() {
        let json = serde_json::to_value(address()).unwrap();
        assert!(json.get("company").is_none());
        assert_eq!(json["postal_code"], "62701");
    }
}
