//! Conversion between untyped task envelopes and the typed order records.
//!
//! Task input and output travel as JSON objects. The order always lives under
//! the `order` key; decoding fails closed with a [`DecodingError`].

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::order::{Order, OrderRequest, is_wire_exact};
use crate::error::DecodingError;

pub const ORDER_KEY: &str = "order";

pub type Fields = Map<String, Value>;

pub fn build_request(fields: &Fields) -> Result<OrderRequest, DecodingError> {
    let request: OrderRequest = decode(fields)?;
    check_total(request.total)?;
    Ok(request)
}

pub fn build_order(fields: &Fields) -> Result<Order, DecodingError> {
    let order: Order = decode(fields)?;
    check_total(order.total())?;
    if let Some(amount) = order.metadata().credit_review().and_then(|c| c.amount) {
        check_exact(amount)?;
    }
    Ok(order)
}

/// Decode the `order` key of a task input as a request.
pub fn request_from_input(input: &Fields) -> Result<OrderRequest, DecodingError> {
    build_request(order_fields(input)?)
}

/// Decode the `order` key of a task input as an order.
pub fn order_from_input(input: &Fields) -> Result<Order, DecodingError> {
    build_order(order_fields(input)?)
}

/// Encode an order as `{"order": {...}}` for the next task. Fails for an amount
/// the float encoding would round, so decoding the envelope gives back `order`.
pub fn to_output_envelope(order: &Order) -> Result<Fields, serde_json::Error> {
    let mut output = Fields::new();
    output.insert(ORDER_KEY.to_string(), serde_json::to_value(order)?);
    Ok(output)
}

fn order_fields(input: &Fields) -> Result<&Fields, DecodingError> {
    match input.get(ORDER_KEY) {
        None | Some(Value::Null) => Err(DecodingError::MissingField(ORDER_KEY)),
        Some(Value::Object(fields)) => Ok(fields),
        Some(other) => Err(DecodingError::NotAnObject {
            field: ORDER_KEY,
            found: json_kind(other).to_string(),
        }),
    }
}

fn decode<T: DeserializeOwned>(fields: &Fields) -> Result<T, DecodingError> {
    Ok(serde_json::from_value(Value::Object(fields.clone()))?)
}

fn check_total(total: Decimal) -> Result<(), DecodingError> {
    if total < Decimal::ZERO {
        return Err(DecodingError::NegativeTotal(total));
    }
    check_exact(total)
}

fn check_exact(amount: Decimal) -> Result<(), DecodingError> {
    if !is_wire_exact(amount) {
        return Err(DecodingError::InexactAmount(amount));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
