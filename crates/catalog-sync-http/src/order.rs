use serde::{Deserialize, Serialize};
use serde_json::Value;

use catalog_sync::{Address, Order, OrderClient, OrderConfirmation, OrderError, OrderLine};

use crate::client::DistributorClient;

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    api_id: &'a str,
    locale: &'a str,
    order_reference: &'a str,
    requestor: &'a Address,
    ship_to: &'a Address,
    items: &'a [OrderLine],
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default, alias = "order_number", alias = "id")]
    order_id: Option<Value>,
    #[serde(default, alias = "order_reference")]
    reference: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait::async_trait]
impl OrderClient for DistributorClient {
    /// Single attempt. A failed submission is reported, never retried.
    async fn submit_order(&self, order: &Order) -> Result<OrderConfirmation, OrderError> {
        order.validate()?;

        let url = self
            .config
            .order_url
            .as_deref()
            .ok_or_else(|| OrderError::Invalid("no order endpoint configured".into()))?;
        let credentials = &self.config.credentials;
        if credentials.api_id.trim().is_empty() {
            return Err(OrderError::Invalid("missing distributor api_id".into()));
        }

        let body = OrderRequest {
            api_id: &credentials.api_id,
            locale: &credentials.locale,
            order_reference: &order.reference,
            requestor: &order.requestor,
            ship_to: &order.shipping,
            items: &order.lines,
        };

        self.throttle().await;
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrderError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OrderError::Network(e.to_string()))?;
        let decoded: Option<OrderResponse> = serde_json::from_str(&text).ok();

        if let Some(error) = decoded
            .as_ref()
            .and_then(|r| r.error.as_deref())
            .filter(|e| !e.trim().is_empty())
        {
            tracing::warn!(reference = %order.reference, error, "order rejected");
            return Err(OrderError::Rejected(error.to_owned()));
        }
        if !status.is_success() {
            return Err(OrderError::Network(format!("HTTP {status}: {text}")));
        }

        let decoded = decoded.ok_or_else(|| OrderError::Parse(format!("unreadable response: {text}")))?;
        let order_id = match decoded.order_id {
            Some(Value::String(id)) if !id.trim().is_empty() => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(OrderError::Parse("response carries no order id".into())),
        };

        tracing::info!(
            reference = %order.reference,
            order_id = %order_id,
            lines = order.lines.len(),
            "order submitted"
        );
        Ok(OrderConfirmation {
            order_id,
            reference: decoded.reference.unwrap_or_else(|| order.reference.clone()),
            status: decoded.status,
        })
    }
}
