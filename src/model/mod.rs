pub mod envelope;
pub mod order;

pub use envelope::{
    Fields, ORDER_KEY, build_order, build_request, order_from_input, request_from_input,
    to_output_envelope,
};
pub use order::{
    CreditVerdict, FraudVerdict, Order, OrderMetadata, OrderRequest, Payment, PaymentType,
    generate_order_number, is_wire_exact,
};
