use std::fmt;

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MetadataError;

/// Discriminant of [`Payment`], as it appears on the wire and in switch cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    CreditCard,
    OnAccount,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::CreditCard => "CREDIT_CARD",
            PaymentType::OnAccount => "ON_ACCOUNT",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the orderer pays. Tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payment {
    CreditCard {
        #[serde(rename = "creditCard", default)]
        card: String,
    },
    OnAccount {
        #[serde(rename = "accountNumber", default)]
        account_number: String,
    },
}

impl Payment {
    pub fn credit_card(card: impl Into<String>) -> Self {
        Payment::CreditCard { card: card.into() }
    }

    pub fn on_account(account_number: impl Into<String>) -> Self {
        Payment::OnAccount {
            account_number: account_number.into(),
        }
    }

    pub fn payment_type(&self) -> PaymentType {
        match self {
            Payment::CreditCard { .. } => PaymentType::CreditCard,
            Payment::OnAccount { .. } => PaymentType::OnAccount,
        }
    }
}

/// Inputs supplied when a workflow run is started. A zero total means "unpriced".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    #[serde(default)]
    pub ordered_by: String,
    #[serde(default, with = "wire_decimal")]
    pub total: Decimal,
    #[serde(default)]
    pub delivery_zip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudVerdict {
    // The misspelling is the established wire name.
    #[serde(rename = "fradulent")]
    pub fraudulent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditVerdict {
    #[serde(default)]
    pub credit_extended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(
        default,
        alias = "Amount",
        skip_serializing_if = "Option::is_none",
        with = "wire_decimal::option"
    )]
    pub amount: Option<Decimal>,
}

/// Verdicts accumulated by downstream tasks. Each one is written at most once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fraud: Option<FraudVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credit_review: Option<CreditVerdict>,
}

impl OrderMetadata {
    pub fn fraud(&self) -> Option<&FraudVerdict> {
        self.fraud.as_ref()
    }

    pub fn credit_review(&self) -> Option<&CreditVerdict> {
        self.credit_review.as_ref()
    }

    pub fn record_fraud(&mut self, verdict: FraudVerdict) -> Result<&FraudVerdict, MetadataError> {
        if self.fraud.is_some() {
            return Err(MetadataError::AlreadyRecorded("fraud"));
        }
        Ok(&*self.fraud.insert(verdict))
    }

    pub fn record_credit_review(
        &mut self,
        verdict: CreditVerdict,
    ) -> Result<&CreditVerdict, MetadataError> {
        if self.credit_review.is_some() {
            return Err(MetadataError::AlreadyRecorded("credit review"));
        }
        Ok(&*self.credit_review.insert(verdict))
    }
}

/// The canonical record threaded through every task of a run.
///
/// The order number and payment are fixed when intake creates the order;
/// later tasks may only price an unpriced order and record their own verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    number: String,
    #[serde(default)]
    ordered_by: String,
    #[serde(default, with = "wire_decimal")]
    total: Decimal,
    #[serde(default)]
    delivery_zip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payment: Option<Payment>,
    #[serde(default)]
    metadata: OrderMetadata,
}

impl Order {
    /// Allocate a new order for a request, with a fresh order number and empty metadata.
    pub fn from_request(request: &OrderRequest) -> Self {
        Self {
            number: generate_order_number(),
            ordered_by: request.ordered_by.clone(),
            total: request.total,
            delivery_zip: request.delivery_zip.clone(),
            payment: request.payment.clone(),
            metadata: OrderMetadata::default(),
        }
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn ordered_by(&self) -> &str {
        &self.ordered_by
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn delivery_zip(&self) -> &str {
        &self.delivery_zip
    }

    pub fn payment(&self) -> Option<&Payment> {
        self.payment.as_ref()
    }

    pub fn payment_type(&self) -> Option<PaymentType> {
        self.payment.as_ref().map(Payment::payment_type)
    }

    pub fn metadata(&self) -> &OrderMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut OrderMetadata {
        &mut self.metadata
    }

    pub fn is_priced(&self) -> bool {
        !self.total.is_zero()
    }

    /// Replace a zero total with `price()`. Returns whether the total changed.
    pub fn ensure_priced(&mut self, price: impl FnOnce() -> Decimal) -> bool {
        if self.is_priced() {
            return false;
        }
        self.total = price();
        true
    }
}

/// Whether `value` comes back unchanged from the float number amounts travel as.
pub fn is_wire_exact(value: Decimal) -> bool {
    rust_decimal::serde::float::serialize(&value, serde_json::value::Serializer)
        .and_then(rust_decimal::serde::float::deserialize)
        .is_ok_and(|decoded| decoded == value)
}

/// Float encoding for amounts that refuses values it would round.
mod wire_decimal {
    use serde::ser::Error as _;

    use super::*;

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        if !is_wire_exact(*value) {
            return Err(S::Error::custom(format!(
                "amount {value} cannot be carried exactly as a JSON number"
            )));
        }
        rust_decimal::serde::float::serialize(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        rust_decimal::serde::float::deserialize(deserializer)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Decimal>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Decimal>, D::Error> {
            rust_decimal::serde::float_option::deserialize(deserializer)
        }
    }
}

/// Uniformly random non-negative 63-bit integer, in decimal.
pub fn generate_order_number() -> String {
    rand::thread_rng().gen_range(0..=i64::MAX).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    fn request(total: Decimal, payment: Option<Payment>) -> OrderRequest {
        OrderRequest {
            ordered_by: "Dana Whitfield".into(),
            total,
            delivery_zip: "60606".into(),
            payment,
        }
    }

    #[test]
    fn from_request_copies_fields_and_assigns_number() {
        let req = request(dec!(42.10), Some(Payment::on_account("1287879798798")));
        let order = Order::from_request(&req);

        assert!(!order.number().is_empty());
        assert!(order.number().parse::<i64>().unwrap() >= 0);
        assert_eq!(order.ordered_by(), "Dana Whitfield");
        assert_eq!(order.total(), dec!(42.10));
        assert_eq!(order.delivery_zip(), "60606");
        assert_eq!(order.payment_type(), Some(PaymentType::OnAccount));
        assert_eq!(order.metadata(), &OrderMetadata::default());
    }

    #[test]
    fn order_numbers_do_not_repeat() {
        let mut seen = HashSet::with_capacity(1_000_000);
        for _ in 0..1_000_000 {
            assert!(seen.insert(generate_order_number()));
        }
    }

    #[test]
    fn ensure_priced_only_fills_zero_totals() {
        let mut unpriced = Order::from_request(&request(Decimal::ZERO, None));
        assert!(unpriced.ensure_priced(|| dec!(99.99)));
        assert_eq!(unpriced.total(), dec!(99.99));

        let mut priced = Order::from_request(&request(dec!(50), None));
        assert!(!priced.ensure_priced(|| dec!(99.99)));
        assert_eq!(priced.total(), dec!(50));
    }

    #[test]
    fn verdicts_are_write_once() {
        let mut metadata = OrderMetadata::default();
        metadata
            .record_fraud(FraudVerdict {
                fraudulent: false,
                reason: None,
            })
            .unwrap();

        let second = metadata.record_fraud(FraudVerdict {
            fraudulent: true,
            reason: Some("Too much money".into()),
        });
        assert_eq!(second, Err(MetadataError::AlreadyRecorded("fraud")));
        assert!(!metadata.fraud().unwrap().fraudulent);
    }

    #[test]
    fn payment_serializes_with_type_tag() {
        let json = serde_json::to_value(Payment::credit_card("tok_4242")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "CREDIT_CARD", "creditCard": "tok_4242"})
        );

        let parsed: Payment = serde_json::from_value(serde_json::json!({
            "type": "ON_ACCOUNT",
            "accountNumber": "1287879798798"
        }))
        .unwrap();
        assert_eq!(parsed, Payment::on_account("1287879798798"));
    }

    #[test]
    fn fraud_flag_keeps_wire_spelling() {
        let verdict = FraudVerdict {
            fraudulent: true,
            reason: Some("Too much money".into()),
        };
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains(r#""fradulent":true"#));
    }

    #[test]
    fn credit_amount_accepts_legacy_key() {
        let verdict: CreditVerdict = serde_json::from_value(serde_json::json!({
            "creditExtended": true,
            "reason": "Good Customer",
            "Amount": 150.0
        }))
        .unwrap();
        assert_eq!(verdict.amount, Some(dec!(150)));

        let denied: CreditVerdict =
            serde_json::from_value(serde_json::json!({"reason": "Collateral not on hand"}))
                .unwrap();
        assert!(!denied.credit_extended);
        assert_eq!(denied.amount, None);
    }
}
