use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Account or contract address. Stored lower-cased so that checksummed and
/// plain hex forms compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty string and for `0x000…0`.
    pub fn is_zero(&self) -> bool {
        self.0.trim_start_matches("0x").chars().all(|c| c == '0')
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self { Address::new(s) }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self { Address::new(s) }
}

impl From<Address> for String {
    fn from(a: Address) -> Self { a.0 }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Ledger-assigned order identifier. Accepts a JSON number or a decimal
/// string on the wire; comparison is always by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl<'de> Deserialize<'de> for OrderId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr { Num(u64), Str(String) }
        match Repr::deserialize(d)? {
            Repr::Num(n) => Ok(OrderId(n)),
            Repr::Str(s) => s.trim().parse::<u64>().map(OrderId).map_err(serde::de::Error::custom),
        }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Raw token amounts travel as decimal strings; plain JSON numbers are also
/// accepted on input.
pub(crate) mod raw_amount {
    use super::*;

    pub fn serialize<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr { Num(u64), Str(String) }
        match Repr::deserialize(d)? {
            Repr::Num(n) => Ok(n as u128),
            Repr::Str(s) => s.trim().parse::<u128>().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    pub id: OrderId,
    /// creator of the order
    pub user: Address,
    pub token_get: Address,
    #[serde(with = "raw_amount")]
    pub amount_get: u128,
    pub token_give: Address,
    #[serde(with = "raw_amount")]
    pub amount_give: u128,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelEvent {
    pub id: OrderId,
    pub user: Address,
    pub timestamp: u64,
}

/// A Trade event. `user` is the filler, `creator` the maker of the order;
/// `timestamp` is the fill time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillEvent {
    pub id: OrderId,
    pub user: Address,
    pub creator: Address,
    pub token_get: Address,
    #[serde(with = "raw_amount")]
    pub amount_get: u128,
    pub token_give: Address,
    #[serde(with = "raw_amount")]
    pub amount_give: u128,
    pub timestamp: u64,
}

impl FillEvent {
    /// The filled order's terms, attributed to its creator and stamped with the fill time.
    pub fn as_order(&self) -> RawOrder {
        RawOrder {
            id: self.id,
            user: self.creator.clone(),
            token_get: self.token_get.clone(),
            amount_get: self.amount_get,
            token_give: self.token_give.clone(),
            amount_give: self.amount_give,
            timestamp: self.timestamp,
        }
    }
}

/// Deposit / Withdraw payload. `balance` is the user's exchange balance after the transfer.
/// Transfers carry no ledger id, so `block` and `log_index` identify them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub token: Address,
    pub user: Address,
    #[serde(with = "raw_amount")]
    pub amount: u128,
    #[serde(with = "raw_amount")]
    pub balance: u128,
    pub block: u64,
    pub log_index: u64,
}

impl TransferEvent {
    pub fn position(&self) -> (u64, u64) {
        (self.block, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum LedgerEvent {
    Order(RawOrder),
    Cancel(CancelEvent),
    Trade(FillEvent),
    Deposit(TransferEvent),
    Withdraw(TransferEvent),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("{kind} event {field} is zero")]
    ZeroField { kind: &'static str, field: &'static str },
    #[error("{kind} event trades {token} against itself")]
    SameToken { kind: &'static str, token: Address },
}

impl LedgerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::Order(_) => "Order",
            LedgerEvent::Cancel(_) => "Cancel",
            LedgerEvent::Trade(_) => "Trade",
            LedgerEvent::Deposit(_) => "Deposit",
            LedgerEvent::Withdraw(_) => "Withdraw",
        }
    }

    /// Account that caused the event.
    pub fn user(&self) -> &Address {
        match self {
            LedgerEvent::Order(o) => &o.user,
            LedgerEvent::Cancel(c) => &c.user,
            LedgerEvent::Trade(f) => &f.user,
            LedgerEvent::Deposit(t) | LedgerEvent::Withdraw(t) => &t.user,
        }
    }

    pub fn transfer(&self) -> Option<&TransferEvent> {
        match self {
            LedgerEvent::Deposit(t) | LedgerEvent::Withdraw(t) => Some(t),
            _ => None,
        }
    }

    /// Checks required fields at the ingestion boundary.
    pub fn validate(&self) -> Result<(), IngestError> {
        let kind = self.kind();
        let zero = |field| IngestError::ZeroField { kind, field };
        if self.user().is_zero() {
            return Err(zero("user"));
        }
        match self {
            LedgerEvent::Order(o) => {
                check_terms(kind, &o.token_get, o.amount_get, &o.token_give, o.amount_give)
            }
            LedgerEvent::Trade(f) => {
                if f.creator.is_zero() { return Err(zero("creator")); }
                check_terms(kind, &f.token_get, f.amount_get, &f.token_give, f.amount_give)
            }
            LedgerEvent::Cancel(_) => Ok(()),
            LedgerEvent::Deposit(t) | LedgerEvent::Withdraw(t) => {
                if t.token.is_zero() { return Err(zero("token")); }
                if t.amount == 0 { return Err(zero("amount")); }
                Ok(())
            }
        }
    }
}

fn check_terms(
    kind: &'static str,
    token_get: &Address,
    amount_get: u128,
    token_give: &Address,
    amount_give: u128,
) -> Result<(), IngestError> {
    if token_get.is_zero() { return Err(IngestError::ZeroField { kind, field: "tokenGet" }); }
    if token_give.is_zero() { return Err(IngestError::ZeroField { kind, field: "tokenGive" }); }
    if amount_get == 0 { return Err(IngestError::ZeroField { kind, field: "amountGet" }); }
    if amount_give == 0 { return Err(IngestError::ZeroField { kind, field: "amountGive" }); }
    if token_get == token_give {
        return Err(IngestError::SameToken { kind, token: token_get.clone() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_compares_case_insensitively() {
        assert_eq!(Address::new("0xAbC1"), Address::new(" 0xabc1 "));
        assert!(Address::new("0x0000").is_zero());
        assert!(!Address::new("0x01").is_zero());
    }

    #[test]
    fn test_order_id_from_string_or_number() {
        let a: OrderId = serde_json::from_str("\"42\"").unwrap();
        let b: OrderId = serde_json::from_str("42").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{"kind":"Order","id":"7","user":"0xA1","tokenGet":"0xB","amountGet":"100000000000000000000",
            "tokenGive":"0xC","amountGive":10,"timestamp":1700000000}"#;
        let ev: LedgerEvent = serde_json::from_str(json).unwrap();
        match &ev {
            LedgerEvent::Order(o) => {
                assert_eq!(o.id, OrderId(7));
                assert_eq!(o.user, Address::new("0xa1"));
                assert_eq!(o.amount_get, 100_000_000_000_000_000_000);
                assert_eq!(o.amount_give, 10);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(ev.validate().is_ok());
        let out = serde_json::to_value(&ev).unwrap();
        assert_eq!(out["kind"], "Order");
        assert_eq!(out["amountGet"], "100000000000000000000");
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let ev = LedgerEvent::Order(RawOrder {
            id: OrderId(1),
            user: "0x1".into(),
            token_get: "0xb".into(),
            amount_get: 0,
            token_give: "0xc".into(),
            amount_give: 5,
            timestamp: 0,
        });
        assert_eq!(ev.validate(), Err(IngestError::ZeroField { kind: "Order", field: "amountGet" }));

        let same = LedgerEvent::Order(RawOrder {
            id: OrderId(1),
            user: "0x1".into(),
            token_get: "0xB".into(),
            amount_get: 1,
            token_give: "0xb".into(),
            amount_give: 5,
            timestamp: 0,
        });
        assert!(matches!(same.validate(), Err(IngestError::SameToken { .. })));

        let dep = LedgerEvent::Deposit(TransferEvent {
            token: "0xb".into(),
            user: "0x0".into(),
            amount: 1,
            balance: 1,
            block: 3,
            log_index: 0,
        });
        assert_eq!(dep.validate(), Err(IngestError::ZeroField { kind: "Deposit", field: "user" }));
    }

    #[test]
    fn test_transfer_requires_log_position() {
        let json = r#"{"kind":"Withdraw","token":"0xB","user":"0xA1","amount":"5","balance":"10","block":12,"logIndex":3}"#;
        let ev: LedgerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.transfer().map(TransferEvent::position), Some((12, 3)));

        let missing = r#"{"kind":"Withdraw","token":"0xB","user":"0xA1","amount":"5","balance":"10"}"#;
        assert!(serde_json::from_str::<LedgerEvent>(missing).is_err());
    }

    #[test]
    fn test_fill_as_order_uses_creator() {
        let f = FillEvent {
            id: OrderId(3),
            user: "0xfiller".into(),
            creator: "0xmaker".into(),
            token_get: "0xb".into(),
            amount_get: 1,
            token_give: "0xc".into(),
            amount_give: 2,
            timestamp: 99,
        };
        let o = f.as_order();
        assert_eq!(o.user, Address::new("0xmaker"));
        assert_eq!(o.timestamp, 99);
    }
}
