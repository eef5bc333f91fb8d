use crate::types::{Address, RawOrder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DECIMALS: u32 = 18;

fn default_decimals() -> u32 { DEFAULT_DECIMALS }

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

impl Token {
    pub fn new(address: impl Into<Address>, symbol: impl Into<String>) -> Self {
        Self { address: address.into(), symbol: symbol.into(), decimals: DEFAULT_DECIMALS }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("market not ready: both pair tokens must be loaded")]
pub struct MarketNotReady;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount {raw} does not fit a {decimals}-decimal value")]
    OutOfRange { raw: u128, decimals: u32 },
    #[error("invalid amount `{0}`")]
    Invalid(String),
    #[error("amount `{value}` has more than {decimals} fractional digits")]
    TooPrecise { value: String, decimals: u32 },
}

/// The active pair. token0 is the base token, token1 the quote token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketPair {
    pub token0: Token,
    pub token1: Token,
}

impl MarketPair {
    pub fn new(token0: Token, token1: Token) -> Self {
        Self { token0, token1 }
    }

    /// Builds the pair from the loaded token slots; both must be present.
    pub fn from_tokens<'a, I>(tokens: I) -> Result<Self, MarketNotReady>
    where
        I: IntoIterator<Item = &'a Token>,
    {
        let mut it = tokens.into_iter();
        match (it.next(), it.next()) {
            (Some(t0), Some(t1)) => Ok(Self::new(t0.clone(), t1.clone())),
            _ => Err(MarketNotReady),
        }
    }

    fn is_pair_token(&self, a: &Address) -> bool {
        *a == self.token0.address || *a == self.token1.address
    }

    /// Both legs of the order must be one of the pair tokens.
    pub fn contains(&self, order: &RawOrder) -> bool {
        self.is_pair_token(&order.token_get) && self.is_pair_token(&order.token_give)
    }
}

/// Smallest-unit integer to a human amount.
pub fn scale_amount(raw: u128, decimals: u32) -> Result<Decimal, AmountError> {
    let signed = i128::try_from(raw).map_err(|_| AmountError::OutOfRange { raw, decimals })?;
    Decimal::try_from_i128_with_scale(signed, decimals)
        .map(|d| d.normalize())
        .map_err(|_| AmountError::OutOfRange { raw, decimals })
}

/// Human amount string ("1.5") to smallest units.
pub fn parse_amount(value: &str, decimals: u32) -> Result<u128, AmountError> {
    let d: Decimal = value.trim().parse().map_err(|_| AmountError::Invalid(value.to_string()))?;
    to_raw(d, decimals).map_err(|e| match e {
        AmountError::Invalid(_) => AmountError::Invalid(value.to_string()),
        other => other,
    })
}

fn to_raw(d: Decimal, decimals: u32) -> Result<u128, AmountError> {
    if d.is_sign_negative() && !d.is_zero() {
        return Err(AmountError::Invalid(d.to_string()));
    }
    let d = d.normalize();
    if d.scale() > decimals {
        return Err(AmountError::TooPrecise { value: d.to_string(), decimals });
    }
    // mantissa * 10^(decimals - scale)
    let mantissa = u128::try_from(d.mantissa()).map_err(|_| AmountError::Invalid(d.to_string()))?;
    10u128
        .checked_pow(decimals - d.scale())
        .and_then(|m| mantissa.checked_mul(m))
        .ok_or(AmountError::OutOfRange { raw: mantissa, decimals })
}

/// Terms for a `makeOrder` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub token_get: Address,
    #[serde(with = "crate::types::raw_amount")]
    pub amount_get: u128,
    pub token_give: Address,
    #[serde(with = "crate::types::raw_amount")]
    pub amount_give: u128,
}

impl OrderRequest {
    /// Buy `amount` of token0 paying `price` token1 per unit.
    pub fn buy(pair: &MarketPair, amount: Decimal, price: Decimal) -> Result<Self, AmountError> {
        let cost = amount.checked_mul(price).ok_or(AmountError::Invalid(format!("{amount} x {price}")))?;
        Ok(Self {
            token_get: pair.token0.address.clone(),
            amount_get: to_raw(amount, pair.token0.decimals)?,
            token_give: pair.token1.address.clone(),
            amount_give: to_raw(cost, pair.token1.decimals)?,
        })
    }

    /// Sell `amount` of token0 for `price` token1 per unit.
    pub fn sell(pair: &MarketPair, amount: Decimal, price: Decimal) -> Result<Self, AmountError> {
        let proceeds = amount.checked_mul(price).ok_or(AmountError::Invalid(format!("{amount} x {price}")))?;
        Ok(Self {
            token_get: pair.token1.address.clone(),
            amount_get: to_raw(proceeds, pair.token1.decimals)?,
            token_give: pair.token0.address.clone(),
            amount_give: to_raw(amount, pair.token0.decimals)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderId;
    use rust_decimal_macros::dec;

    fn pair() -> MarketPair {
        MarketPair::new(Token::new("0xT0", "DAPP"), Token::new("0xT1", "mETH"))
    }

    #[test]
    fn test_from_tokens_requires_both() {
        let t0 = Token::new("0xa", "A");
        assert_eq!(MarketPair::from_tokens(&[] as &[Token]), Err(MarketNotReady));
        assert_eq!(MarketPair::from_tokens(&[t0.clone()]), Err(MarketNotReady));
        let p = MarketPair::from_tokens(&[t0, Token::new("0xb", "B")]).unwrap();
        assert_eq!(p.token1.symbol, "B");
    }

    #[test]
    fn test_contains_excludes_third_token() {
        let p = pair();
        let mut o = RawOrder {
            id: OrderId(1),
            user: "0xu".into(),
            token_get: "0xt1".into(),
            amount_get: 1,
            token_give: "0xt0".into(),
            amount_give: 1,
            timestamp: 0,
        };
        assert!(p.contains(&o));
        o.token_give = "0xt2".into();
        assert!(!p.contains(&o));
    }

    #[test]
    fn test_scale_and_parse() {
        assert_eq!(scale_amount(10_000_000_000_000_000_000, 18).unwrap(), dec!(10));
        assert_eq!(scale_amount(1_500_000, 6).unwrap(), dec!(1.5));
        assert_eq!(parse_amount("1.5", 18).unwrap(), 1_500_000_000_000_000_000);
        assert_eq!(parse_amount("2", 0).unwrap(), 2);
        assert!(matches!(parse_amount("0.001", 2), Err(AmountError::TooPrecise { .. })));
        assert!(matches!(parse_amount("abc", 18), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_amount("-1", 18), Err(AmountError::Invalid(_))));
    }

    #[test]
    fn test_order_request_legs() {
        let p = pair();
        let buy = OrderRequest::buy(&p, dec!(10), dec!(0.5)).unwrap();
        assert_eq!(buy.token_get, p.token0.address);
        assert_eq!(buy.amount_get, 10_000_000_000_000_000_000);
        assert_eq!(buy.amount_give, 5_000_000_000_000_000_000);

        let sell = OrderRequest::sell(&p, dec!(10), dec!(0.5)).unwrap();
        assert_eq!(sell.token_give, p.token0.address);
        assert_eq!(sell.amount_give, 10_000_000_000_000_000_000);
        assert_eq!(sell.amount_get, 5_000_000_000_000_000_000);
    }
}
