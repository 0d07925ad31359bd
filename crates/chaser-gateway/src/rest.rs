//! Exchange REST client.
//!
//! Signed endpoints append `timestamp` and `recvWindow`, sign the query
//! string with HMAC-SHA256 and send the API key in `X-MBX-APIKEY`.
//! Credentials are resolved from the [`CredentialStore`] on every call.

use chaser_core::{
    AccountId, BoxFuture, ExchangeApi, ExchangeError, ExchangeOrder, ExchangePosition,
    ExchangeResult, InstrumentSpec, MarginType, ModifyRequest, OrderKind, OrderRequest,
    OrderStatus, Price, Side, Size,
};
use chaser_registry::{CredentialStore, Credentials};
use chaser_rpc::rest_signature;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// `marginType` already set to the requested mode.
const NO_MARGIN_CHANGE_CODE: i64 = -4046;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBalance {
    asset: String,
    available_balance: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePositionRisk {
    symbol: String,
    position_amt: Decimal,
    entry_price: Decimal,
    #[serde(default)]
    mark_price: Decimal,
    #[serde(default)]
    leverage: Option<String>,
    #[serde(default)]
    margin_type: String,
    #[serde(default)]
    position_side: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireOrder {
    order_id: i64,
    #[serde(default)]
    client_order_id: String,
    symbol: String,
    side: Side,
    #[serde(rename = "type")]
    kind: OrderKind,
    status: OrderStatus,
    #[serde(default)]
    price: Decimal,
    #[serde(default)]
    stop_price: Decimal,
    #[serde(default)]
    orig_qty: Decimal,
    #[serde(default)]
    executed_qty: Decimal,
    #[serde(default)]
    avg_price: Decimal,
    #[serde(default)]
    reduce_only: bool,
    #[serde(default)]
    update_time: i64,
}

impl From<WireOrder> for ExchangeOrder {
    fn from(w: WireOrder) -> Self {
        Self {
            order_id: w.order_id,
            client_order_id: w.client_order_id,
            symbol: w.symbol,
            side: w.side,
            kind: w.kind,
            status: w.status,
            price: Price::new(w.price),
            stop_price: Price::new(w.stop_price),
            orig_qty: Size::new(w.orig_qty),
            executed_qty: Size::new(w.executed_qty),
            avg_price: Price::new(w.avg_price),
            reduce_only: w.reduce_only,
            update_time_ms: w.update_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum WireFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price { tick_size: Decimal },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        step_size: Decimal,
        min_qty: Decimal,
        max_qty: Decimal,
    },
    #[serde(rename = "MARKET_LOT_SIZE", rename_all = "camelCase")]
    MarketLotSize {
        step_size: Decimal,
        min_qty: Decimal,
        max_qty: Decimal,
    },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional { notional: Decimal },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSymbol {
    symbol: String,
    price_precision: u32,
    quantity_precision: u32,
    filters: Vec<WireFilter>,
}

#[derive(Debug, Deserialize)]
struct WireExchangeInfo {
    symbols: Vec<WireSymbol>,
}

/// Pick `symbol` out of an exchangeInfo body.
pub(crate) fn instrument_from_exchange_info(
    body: &str,
    symbol: &str,
) -> ExchangeResult<InstrumentSpec> {
    let info: WireExchangeInfo =
        serde_json::from_str(body).map_err(|e| ExchangeError::Decode(e.to_string()))?;
    let wire = info
        .symbols
        .into_iter()
        .find(|s| s.symbol == symbol)
        .ok_or_else(|| ExchangeError::Decode(format!("{symbol} not in exchangeInfo")))?;

    let mut spec = InstrumentSpec {
        symbol: wire.symbol,
        tick_size: Price::ZERO,
        step_size: Size::ZERO,
        min_qty: Size::ZERO,
        max_qty: Size::ZERO,
        market_step_size: Size::ZERO,
        market_min_qty: Size::ZERO,
        market_max_qty: Size::ZERO,
        min_notional: Decimal::ZERO,
        price_precision: wire.price_precision,
        quantity_precision: wire.quantity_precision,
    };
    for filter in wire.filters {
        match filter {
            WireFilter::Price { tick_size } => spec.tick_size = Price::new(tick_size),
            WireFilter::LotSize {
                step_size,
                min_qty,
                max_qty,
            } => {
                spec.step_size = Size::new(step_size);
                spec.min_qty = Size::new(min_qty);
                spec.max_qty = Size::new(max_qty);
            }
            WireFilter::MarketLotSize {
                step_size,
                min_qty,
                max_qty,
            } => {
                spec.market_step_size = Size::new(step_size);
                spec.market_min_qty = Size::new(min_qty);
                spec.market_max_qty = Size::new(max_qty);
            }
            WireFilter::MinNotional { notional } => spec.min_notional = notional,
            WireFilter::Other => {}
        }
    }
    if !spec.tick_size.is_positive() || !spec.step_size.is_positive() {
        return Err(ExchangeError::Decode(format!(
            "{symbol} is missing PRICE_FILTER or LOT_SIZE"
        )));
    }
    Ok(spec)
}

/// Query parameters for a new order.
pub(crate) fn order_params(req: &OrderRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", req.symbol.clone()),
        ("side", req.side.as_str().to_string()),
        ("type", req.kind.as_str().to_string()),
        ("newClientOrderId", req.client_order_id.to_string()),
        ("newOrderRespType", "RESULT".to_string()),
    ];
    if let Some(qty) = req.quantity {
        params.push(("quantity", qty.to_string()));
    }
    if let Some(price) = req.price {
        params.push(("price", price.to_string()));
    }
    if let Some(stop) = req.stop_price {
        params.push(("stopPrice", stop.to_string()));
    }
    if let Some(tif) = req.time_in_force {
        params.push(("timeInForce", tif.as_str().to_string()));
    }
    if req.reduce_only {
        params.push(("reduceOnly", "true".to_string()));
    }
    if req.close_position {
        params.push(("closePosition", "true".to_string()));
    }
    params
}

/// `k=v&k=v` followed by `timestamp` and `recvWindow`.
pub(crate) fn signed_query(
    params: &[(&str, String)],
    timestamp_ms: i64,
    recv_window_ms: u64,
) -> String {
    let mut parts: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    parts.push(format!("timestamp={timestamp_ms}"));
    parts.push(format!("recvWindow={recv_window_ms}"));
    parts.join("&")
}

pub fn build_http_client() -> ExchangeResult<Client> {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| ExchangeError::Transport(format!("Failed to create HTTP client: {e}")))
}

fn transport(e: reqwest::Error) -> ExchangeError {
    ExchangeError::Transport(e.to_string())
}

/// REST client for one account.
pub struct RestClient {
    client: Client,
    account: AccountId,
    credentials: Arc<CredentialStore>,
    recv_window_ms: u64,
}

impl RestClient {
    pub fn new(
        account: AccountId,
        credentials: Arc<CredentialStore>,
        recv_window_ms: u64,
    ) -> ExchangeResult<Self> {
        Ok(Self::with_client(
            build_http_client()?,
            account,
            credentials,
            recv_window_ms,
        ))
    }

    /// Share one connection pool across accounts.
    pub fn with_client(
        client: Client,
        account: AccountId,
        credentials: Arc<CredentialStore>,
        recv_window_ms: u64,
    ) -> Self {
        Self {
            client,
            account,
            credentials,
            recv_window_ms,
        }
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    fn creds(&self) -> ExchangeResult<Arc<Credentials>> {
        self.credentials
            .load(self.account)
            .map_err(|e| ExchangeError::Credentials(e.to_string()))
    }

    async fn read_body<T: DeserializeOwned>(response: reqwest::Response) -> ExchangeResult<T> {
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => ExchangeError::from_api(err.code, err.msg),
                Err(_) => ExchangeError::Transport(format!("HTTP {status}: {body}")),
            });
        }
        serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(format!("{e}: {body}")))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let creds = self.creds()?;
        let url = format!("{}{path}", creds.endpoints.rest_url);
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(transport)?;
        Self::read_body(response).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let creds = self.creds()?;
        let query = signed_query(
            params,
            chrono::Utc::now().timestamp_millis(),
            self.recv_window_ms,
        );
        let signature = rest_signature(creds.api_secret(), &query)
            .map_err(|e| ExchangeError::Credentials(e.to_string()))?;
        let url = format!(
            "{}{path}?{query}&signature={signature}",
            creds.endpoints.rest_url
        );
        debug!(account_id = %self.account, %method, %path, "Signed REST request");
        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, creds.api_key.as_str())
            .send()
            .await
            .map_err(transport)?;
        Self::read_body(response).await
    }

    /// User-stream endpoints carry the API key but no signature.
    async fn keyed<T: DeserializeOwned>(&self, method: Method, path: &str) -> ExchangeResult<T> {
        let creds = self.creds()?;
        let url = format!("{}{path}", creds.endpoints.rest_url);
        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, creds.api_key.as_str())
            .send()
            .await
            .map_err(transport)?;
        Self::read_body(response).await
    }

    /// `POST /fapi/v1/listenKey`.
    pub async fn create_listen_key(&self) -> ExchangeResult<String> {
        let body: ListenKeyResponse = self.keyed(Method::POST, "/fapi/v1/listenKey").await?;
        Ok(body.listen_key)
    }

    /// `PUT /fapi/v1/listenKey`; extends the key's validity.
    pub async fn keepalive_listen_key(&self) -> ExchangeResult<()> {
        let _: serde_json::Value = self.keyed(Method::PUT, "/fapi/v1/listenKey").await?;
        Ok(())
    }

    /// `DELETE /fapi/v1/listenKey`.
    pub async fn close_listen_key(&self) -> ExchangeResult<()> {
        let _: serde_json::Value = self.keyed(Method::DELETE, "/fapi/v1/listenKey").await?;
        Ok(())
    }
}

impl ExchangeApi for RestClient {
    fn fetch_price<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Price>> {
        Box::pin(async move {
            let ticker: TickerPrice = self
                .public_get("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
                .await?;
            Ok(Price::new(ticker.price))
        })
    }

    fn fetch_instrument<'a>(
        &'a self,
        symbol: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<InstrumentSpec>> {
        Box::pin(async move {
            let creds = self.creds()?;
            let url = format!("{}/fapi/v1/exchangeInfo", creds.endpoints.rest_url);
            let response = self.client.get(&url).send().await.map_err(transport)?;
            let status = response.status();
            let body = response.text().await.map_err(transport)?;
            if !status.is_success() {
                return Err(ExchangeError::Transport(format!("HTTP {status}: {body}")));
            }
            instrument_from_exchange_info(&body, symbol)
        })
    }

    fn available_balance<'a>(&'a self, asset: &'a str) -> BoxFuture<'a, ExchangeResult<Decimal>> {
        Box::pin(async move {
            let balances: Vec<WireBalance> =
                self.signed(Method::GET, "/fapi/v2/balance", &[]).await?;
            Ok(balances
                .into_iter()
                .find(|b| b.asset == asset)
                .map(|b| b.available_balance)
                .unwrap_or(Decimal::ZERO))
        })
    }

    fn position<'a>(
        &'a self,
        symbol: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<Option<ExchangePosition>>> {
        Box::pin(async move {
            let rows: Vec<WirePositionRisk> = self
                .signed(
                    Method::GET,
                    "/fapi/v2/positionRisk",
                    &[("symbol", symbol.to_string())],
                )
                .await?;
            Ok(rows
                .into_iter()
                .find(|p| p.symbol == symbol && !p.position_amt.is_zero())
                .map(|p| ExchangePosition {
                    symbol: p.symbol,
                    position_amount: p.position_amt,
                    entry_price: Price::new(p.entry_price),
                    mark_price: Price::new(p.mark_price),
                    leverage: p
                        .leverage
                        .and_then(|l| l.parse().ok())
                        .unwrap_or_default(),
                    margin_type: p.margin_type,
                    position_side: p.position_side,
                }))
        })
    }

    fn set_leverage<'a>(
        &'a self,
        symbol: &'a str,
        leverage: u32,
    ) -> BoxFuture<'a, ExchangeResult<()>> {
        Box::pin(async move {
            let _: serde_json::Value = self
                .signed(
                    Method::POST,
                    "/fapi/v1/leverage",
                    &[
                        ("symbol", symbol.to_string()),
                        ("leverage", leverage.to_string()),
                    ],
                )
                .await?;
            Ok(())
        })
    }

    fn set_margin_type<'a>(
        &'a self,
        symbol: &'a str,
        margin_type: MarginType,
    ) -> BoxFuture<'a, ExchangeResult<()>> {
        Box::pin(async move {
            let result: ExchangeResult<serde_json::Value> = self
                .signed(
                    Method::POST,
                    "/fapi/v1/marginType",
                    &[
                        ("symbol", symbol.to_string()),
                        ("marginType", margin_type.as_str().to_string()),
                    ],
                )
                .await;
            match result {
                Ok(_) => Ok(()),
                Err(ExchangeError::Api { code, .. }) if code == NO_MARGIN_CHANGE_CODE => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    fn place_order<'a>(
        &'a self,
        request: &'a OrderRequest,
    ) -> BoxFuture<'a, ExchangeResult<ExchangeOrder>> {
        Box::pin(async move {
            let params = order_params(request);
            let wire: WireOrder = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
            Ok(wire.into())
        })
    }

    fn modify_order<'a>(
        &'a self,
        request: &'a ModifyRequest,
    ) -> BoxFuture<'a, ExchangeResult<ExchangeOrder>> {
        Box::pin(async move {
            let params = [
                ("symbol", request.symbol.clone()),
                ("orderId", request.order_id.to_string()),
                ("side", request.side.as_str().to_string()),
                ("quantity", request.quantity.to_string()),
                ("price", request.price.to_string()),
            ];
            let wire: WireOrder = self.signed(Method::PUT, "/fapi/v1/order", &params).await?;
            Ok(wire.into())
        })
    }

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        order_id: i64,
    ) -> BoxFuture<'a, ExchangeResult<ExchangeOrder>> {
        Box::pin(async move {
            let params = [
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ];
            let wire: WireOrder = self
                .signed(Method::DELETE, "/fapi/v1/order", &params)
                .await
                .inspect_err(|e| {
                    warn!(account_id = %self.account, %symbol, order_id, error = %e, "Cancel failed");
                })?;
            Ok(wire.into())
        })
    }

    fn query_order<'a>(
        &'a self,
        symbol: &'a str,
        order_id: i64,
    ) -> BoxFuture<'a, ExchangeResult<ExchangeOrder>> {
        Box::pin(async move {
            let params = [
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ];
            let wire: WireOrder = self.signed(Method::GET, "/fapi/v1/order", &params).await?;
            Ok(wire.into())
        })
    }

    fn recent_orders<'a>(
        &'a self,
        symbol: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<ExchangeOrder>>> {
        Box::pin(async move {
            let params = [("symbol", symbol.to_string()), ("limit", limit.to_string())];
            let wires: Vec<WireOrder> = self
                .signed(Method::GET, "/fapi/v1/allOrders", &params)
                .await?;
            Ok(wires.into_iter().map(ExchangeOrder::from).collect())
        })
    }
}
