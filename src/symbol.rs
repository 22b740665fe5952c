//! Standard pair notation → exchange-native symbol strings.

/// Funding (lendable-currency) symbols start with `f`, e.g. `fUSD`, `fBTC`.
/// They carry an extra loan-period field on every trade and are never
/// translated.
pub fn is_funding(symbol: &str) -> bool {
    symbol.starts_with('f')
}

/// Legacy three-letter currency codes the exchange still uses on its v2
/// symbols.
fn native_currency(currency: &str) -> &str {
    match currency {
        "DASH" => "DSH",
        "QTUM" => "QTM",
        "DATA" => "DAT",
        "USDT" => "UST",
        other => other,
    }
}

/// Translate a standard `BASE-QUOTE` pair (e.g. `BTC-USD`) to the
/// exchange-native trading symbol (`tBTCUSD`). Inputs already in native form
/// (leading `t`, no separator) pass through unchanged.
pub fn pair_std_to_exchange(pair: &str) -> String {
    match pair.split_once('-') {
        Some((base, quote)) => {
            let base = base.to_uppercase();
            let quote = quote.to_uppercase();
            format!("t{}{}", native_currency(&base), native_currency(&quote))
        }
        None => pair.to_string(),
    }
}
