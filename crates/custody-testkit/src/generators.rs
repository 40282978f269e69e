//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use custody_core::{
    BusinessMetadata, ChainHash, ContentHash, DocumentKind, TicketSubmission,
};

pub fn content_hash() -> impl Strategy<Value = ContentHash> {
    any::<[u8; 32]>().prop_map(ContentHash::from_bytes)
}

pub fn chain_hash() -> impl Strategy<Value = ChainHash> {
    any::<[u8; 32]>().prop_map(ChainHash::from_bytes)
}

/// Non-empty document content up to `max_len` bytes.
pub fn content(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=max_len.max(1))
}

/// Arbitrary JSON of bounded depth.
pub fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|i| json!(i)),
        (-1.0e9f64..1.0e9).prop_map(|f| json!(f)),
        "[ -~]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// A till ticket body: line items and a total, amounts in minor units.
pub fn ticket_body() -> impl Strategy<Value = Value> {
    let line = ("[A-Z]{3,5}-[0-9]{2}", 1i64..20, 1i64..100_000)
        .prop_map(|(sku, qty, price)| json!({"sku": sku, "qty": qty, "unit_price_minor": price}));
    prop::collection::vec(line, 1..8).prop_map(|lines| {
        let total: i64 = lines
            .iter()
            .map(|l| l["qty"].as_i64().unwrap_or(0) * l["unit_price_minor"].as_i64().unwrap_or(0))
            .sum();
        let mut body = Map::new();
        body.insert("lines".into(), Value::Array(lines));
        body.insert("total_minor".into(), json!(total));
        Value::Object(body)
    })
}

pub fn currency() -> impl Strategy<Value = String> {
    prop_oneof![Just("EUR"), Just("USD"), Just("GBP"), Just("MXN")].prop_map(String::from)
}

pub fn business_metadata() -> impl Strategy<Value = BusinessMetadata> {
    (
        prop::option::of("[a-z]{3,8}"),
        prop::option::of("[A-Z0-9-]{4,12}"),
        prop::option::of("[a-z0-9-]{4,12}"),
        prop::option::of("T[0-9]{1,2}"),
        prop::option::of("[A-Z][a-z]{2,8}"),
        prop::option::of(0i64..10_000_000),
        prop::option::of(currency()),
    )
        .prop_map(
            |(source_system, external_id, session_id, terminal_id, cashier_name, total_minor, currency)| {
                BusinessMetadata {
                    kind: Some(DocumentKind::Ticket),
                    source_system,
                    external_id,
                    session_id,
                    terminal_id,
                    cashier_name,
                    total_minor,
                    currency,
                    issued_at: None,
                }
            },
        )
}

/// Parameters for a ticket plus the attributes that must not affect its
/// identity.
#[derive(Debug, Clone)]
pub struct TicketParams {
    pub ticket: TicketSubmission,
    pub other_cashier: String,
    pub other_terminal: String,
    pub other_total_minor: i64,
}

impl Arbitrary for TicketParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            ticket_body(),
            business_metadata(),
            "[A-Z][a-z]{2,8}",
            "T[0-9]{1,2}",
            0i64..10_000_000,
        )
            .prop_map(|(body, metadata, cashier, terminal, total)| TicketParams {
                ticket: TicketSubmission { body, metadata },
                other_cashier: cashier,
                other_terminal: terminal,
                other_total_minor: total,
            })
            .boxed()
    }
}

impl TicketParams {
    /// The same ticket as resubmitted with different till-side details.
    pub fn resubmitted(&self) -> TicketSubmission {
        let mut again = self.ticket.clone();
        again.metadata.cashier_name = Some(self.other_cashier.clone());
        again.metadata.terminal_id = Some(self.other_terminal.clone());
        again.metadata.total_minor = Some(self.other_total_minor);
        again
    }
}
