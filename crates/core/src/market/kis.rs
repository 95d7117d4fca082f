use crate::config::{Settings, MAX_KIS_ATTEMPTS};
use crate::domain::bar::Bar;
use crate::domain::listing::ListingEntry;
use crate::market::{ListingDirectory, PriceHistorySource};
use crate::time::kr_market;
use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use encoding_rs::EUC_KR;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROD_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";
const MAX_BACKOFF_SHIFT: u32 = 3;

const KOSPI_MASTER_ZIP: &str =
    "https://new.real.download.dws.co.kr/common/master/kospi_code.mst.zip";
const KOSDAQ_MASTER_ZIP: &str =
    "https://new.real.download.dws.co.kr/common/master/kosdaq_code.mst.zip";
const KONEX_MASTER_ZIP: &str =
    "https://new.real.download.dws.co.kr/common/master/konex_code.mst.zip";

/// Korea Investment & Securities Open API client.
///
/// Serves the exchange listing from the public master files and daily bars from the
/// `inquire-daily-itemchartprice` quotation endpoint.
#[derive(Debug)]
pub struct KisClient {
    http: reqwest::Client,
    base_url: String,
    appkey: String,
    appsecret: String,
    markets: Vec<KisMarket>,
    max_attempts: u32,

    // Token issuance is rate limited by KIS; reuse one token for the life of the process.
    token_cache: tokio::sync::Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: KisToken,
    fetched_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KisMarket {
    Kospi,
    Kosdaq,
    Konex,
}

impl KisClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let appkey = settings.require_kis_appkey()?.to_string();
        let appsecret = settings.require_kis_appsecret()?.to_string();

        let base_url = settings
            .kis_base_url
            .clone()
            .unwrap_or_else(|| PROD_BASE_URL.to_string());

        let max_attempts = settings.kis_max_attempts.clamp(1, MAX_KIS_ATTEMPTS);
        let markets = parse_markets(settings.kis_markets.clone());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.kis_timeout_secs))
            .build()
            .context("failed to build KIS http client")?;

        Ok(Self {
            http,
            base_url,
            appkey,
            appsecret,
            markets,
            max_attempts,
            token_cache: tokio::sync::Mutex::new(None),
        })
    }

    async fn get_access_token_cached(&self) -> Result<KisToken> {
        let mut guard = self.token_cache.lock().await;
        if let Some(cached) = guard.as_ref() {
            if !cached.token.is_expired_or_stale(cached.fetched_at) {
                return Ok(cached.token.clone());
            }
        }

        let fetched_at = chrono::Utc::now();
        let token = self.fetch_access_token().await?;
        tracing::info!(expires_in = token.expires_in, "issued KIS access token");
        *guard = Some(CachedToken {
            token: token.clone(),
            fetched_at,
        });
        Ok(token)
    }

    async fn fetch_access_token(&self) -> Result<KisToken> {
        let url = format!("{}/oauth2/tokenP", self.base_url.trim_end_matches('/'));
        let req = KisTokenRequest {
            grant_type: "client_credentials",
            appkey: &self.appkey,
            appsecret: &self.appsecret,
        };

        let res = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/plain")
            .header("charset", "UTF-8")
            .json(&req)
            .send()
            .await
            .context("KIS token request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read KIS token response")?;
        if !status.is_success() {
            anyhow::bail!("KIS token HTTP {status}: {text}");
        }

        serde_json::from_str::<KisToken>(&text).context("failed to parse KIS token response")
    }

    async fn fetch_daily_bars(
        &self,
        token: &KisToken,
        code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice",
            self.base_url.trim_end_matches('/')
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", token.access_token))?,
        );
        headers.insert("appkey", HeaderValue::from_str(&self.appkey)?);
        headers.insert("appsecret", HeaderValue::from_str(&self.appsecret)?);
        headers.insert("tr_id", HeaderValue::from_static("FHKST03010100"));
        headers.insert("custtype", HeaderValue::from_static("P"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("Accept", HeaderValue::from_static("text/plain"));
        headers.insert("charset", HeaderValue::from_static("UTF-8"));

        let start = start_date.format("%Y%m%d").to_string();
        let end = end_date.format("%Y%m%d").to_string();
        let params = [
            ("FID_COND_MRKT_DIV_CODE", "J"),
            ("FID_INPUT_ISCD", code),
            ("FID_INPUT_DATE_1", start.as_str()),
            ("FID_INPUT_DATE_2", end.as_str()),
            ("FID_PERIOD_DIV_CODE", "D"),
            ("FID_ORG_ADJ_PRC", "1"),
        ];

        let mut attempt: u32 = 0;
        let body = loop {
            attempt += 1;

            let res = self
                .http
                .get(url.clone())
                .headers(headers.clone())
                .query(&params)
                .send()
                .await;

            let res = match res {
                Ok(r) => r,
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return Err(err).context("KIS daily itemchartprice request failed");
                    }
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(
                        attempt,
                        ?backoff,
                        %code,
                        error = %err,
                        "KIS daily request failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let status = res.status();
            let text = res
                .text()
                .await
                .context("failed to read KIS daily response")?;

            if !status.is_success() {
                let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                if retryable && attempt < self.max_attempts {
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(
                        attempt,
                        ?backoff,
                        %code,
                        http_status = %status,
                        "KIS daily HTTP error; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                anyhow::bail!("KIS daily itemchartprice HTTP {status}: {text}");
            }

            break serde_json::from_str::<KisDailyItemChartPriceResponse>(&text)
                .context("failed to parse KIS daily itemchartprice response")?;
        };

        if let Some(rt_cd) = body.rt_cd.as_deref() {
            anyhow::ensure!(
                rt_cd == "0",
                "KIS daily itemchartprice rejected (rt_cd={rt_cd}): {}",
                body.msg1.as_deref().unwrap_or("").trim()
            );
        }

        Ok(daily_bars_from_output(&body.output2, start_date))
    }

    async fn fetch_master_listing(&self) -> Result<Vec<ListingEntry>> {
        let mut out = Vec::new();
        for market in &self.markets {
            let url = match market {
                KisMarket::Kospi => KOSPI_MASTER_ZIP,
                KisMarket::Kosdaq => KOSDAQ_MASTER_ZIP,
                KisMarket::Konex => KONEX_MASTER_ZIP,
            };
            let records = fetch_and_parse_master_zip(&self.http, url).await?;
            tracing::debug!(?market, records = records.len(), "parsed KIS master file");
            out.extend(records);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl ListingDirectory for KisClient {
    fn source_name(&self) -> &'static str {
        "kis_master"
    }

    async fn snapshot(&self) -> Result<Vec<ListingEntry>> {
        self.fetch_master_listing().await
    }
}

#[async_trait::async_trait]
impl PriceHistorySource for KisClient {
    fn source_name(&self) -> &'static str {
        "kis_daily_itemchartprice"
    }

    async fn read(&self, code: &str, start_date: NaiveDate) -> Result<Vec<Bar>> {
        let token = self.get_access_token_cached().await?;
        let end_date = kr_market::kst_today(Utc::now())?;
        self.fetch_daily_bars(&token, code, start_date, end_date)
            .await
            .with_context(|| format!("KIS daily bars for {code} since {start_date}"))
    }
}

#[derive(Debug, Serialize)]
struct KisTokenRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    appsecret: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KisToken {
    pub access_token: String,
    #[serde(default)]
    pub access_token_token_expired: String,

    #[serde(default)]
    pub expires_in: u64,
}

impl KisToken {
    fn is_expired_or_stale(&self, fetched_at: chrono::DateTime<chrono::Utc>) -> bool {
        if let Some(exp) = parse_kis_expiry_utc(&self.access_token_token_expired) {
            return chrono::Utc::now() + chrono::Duration::minutes(2) >= exp;
        }

        if self.expires_in > 0 {
            let exp = fetched_at + chrono::Duration::seconds(self.expires_in as i64);
            return chrono::Utc::now() + chrono::Duration::minutes(2) >= exp;
        }

        true
    }
}

fn parse_kis_expiry_utc(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }

    // "YYYY-MM-DD HH:MM:SS" in KST.
    let naive = chrono::NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S").ok()?;
    let dt = kr_market::kst().ok()?.from_local_datetime(&naive).single()?;
    Some(dt.with_timezone(&chrono::Utc))
}

#[derive(Debug, Clone, Deserialize)]
struct KisDailyItemChartPriceResponse {
    #[serde(default)]
    rt_cd: Option<String>,
    #[serde(default)]
    msg1: Option<String>,
    #[serde(default)]
    output2: Vec<KisDailyBar>,
}

#[derive(Debug, Clone, Deserialize)]
struct KisDailyBar {
    #[serde(default)]
    stck_bsop_date: String,
    #[serde(default)]
    stck_oprc: String,
    #[serde(default)]
    stck_hgpr: String,
    #[serde(default)]
    stck_lwpr: String,
    #[serde(default)]
    stck_clpr: String,
}

/// KIS returns newest first and pads with empty rows; normalize to ascending unique dates.
fn daily_bars_from_output(rows: &[KisDailyBar], start_date: NaiveDate) -> Vec<Bar> {
    let mut bars: Vec<Bar> = rows
        .iter()
        .filter_map(|row| {
            let date = NaiveDate::parse_from_str(row.stck_bsop_date.trim(), "%Y%m%d").ok()?;
            let close = parse_price(&row.stck_clpr)?;
            Some(Bar {
                date,
                open: parse_price(&row.stck_oprc).unwrap_or(close),
                high: parse_price(&row.stck_hgpr).unwrap_or(close),
                low: parse_price(&row.stck_lwpr).unwrap_or(close),
                close,
            })
        })
        .filter(|bar| bar.date >= start_date)
        .collect();

    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    bars
}

// 1s, 2s, 4s, then 8s for every later attempt.
fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT))
}

fn parse_markets(v: Option<String>) -> Vec<KisMarket> {
    let Some(v) = v else {
        return vec![KisMarket::Kospi, KisMarket::Kosdaq];
    };
    let mut out = Vec::new();
    for part in v.split(',') {
        let market = match part.trim().to_ascii_uppercase().as_str() {
            "KOSPI" => KisMarket::Kospi,
            "KOSDAQ" => KisMarket::Kosdaq,
            "KONEX" => KisMarket::Konex,
            _ => continue,
        };
        if !out.contains(&market) {
            out.push(market);
        }
    }
    if out.is_empty() {
        out.push(KisMarket::Kospi);
        out.push(KisMarket::Kosdaq);
    }
    out
}

fn parse_price(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

async fn fetch_and_parse_master_zip(
    http: &reqwest::Client,
    url: &str,
) -> Result<Vec<ListingEntry>> {
    let res = http
        .get(url)
        .send()
        .await
        .context("master zip download failed")?;
    let status = res.status();
    let bytes = res.bytes().await.context("read master zip bytes failed")?;
    if !status.is_success() {
        anyhow::bail!("master zip HTTP {status}");
    }

    let bytes_vec = bytes.to_vec();
    let records = tokio::task::spawn_blocking(move || unzip_and_parse_master(&bytes_vec))
        .await
        .context("join unzip task failed")??;
    Ok(records)
}

fn unzip_and_parse_master(zip_bytes: &[u8]) -> Result<Vec<ListingEntry>> {
    use std::io::{Cursor, Read};

    let reader = Cursor::new(zip_bytes);
    let mut zip = zip::ZipArchive::new(reader).context("open zip archive failed")?;
    anyhow::ensure!(zip.len() > 0, "zip has no entries");

    let mut mst_idx: Option<usize> = None;
    for i in 0..zip.len() {
        let name = {
            let f = zip.by_index(i).context("open zip entry failed")?;
            f.name().to_string()
        };
        if name.to_ascii_lowercase().ends_with(".mst") {
            mst_idx = Some(i);
            break;
        }
    }
    let idx = mst_idx.unwrap_or(0);

    let mut file = zip.by_index(idx).context("open zip entry failed")?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).context("read zip entry failed")?;

    Ok(parse_master_lines(&buf))
}

fn parse_master_lines(buf: &[u8]) -> Vec<ListingEntry> {
    let mut out = Vec::new();
    for line in buf.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.len() < 6 {
            continue;
        }

        let code_bytes = &line[0..6];
        if !code_bytes.iter().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(code) = std::str::from_utf8(code_bytes) else {
            continue;
        };

        // Layout: 6-digit code, padding, 12-byte ISIN, name, then a market marker (ST...).
        let mut i = 6;
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }

        let isin_start = i;
        let name_start = if line.len() >= isin_start + 12 {
            isin_start + 12
        } else {
            while i < line.len() && !line[i].is_ascii_whitespace() {
                i += 1;
            }
            i
        };

        if name_start >= line.len() {
            continue;
        }

        let after_name = &line[name_start..];
        let st_pos = find_st_marker(after_name).unwrap_or(after_name.len());
        let name = decode_euc_kr_trim(&after_name[..st_pos]);
        if name.is_empty() {
            continue;
        }

        out.push(ListingEntry::new(code, name));
    }
    out
}

fn find_st_marker(bytes: &[u8]) -> Option<usize> {
    (0..bytes.len().saturating_sub(1)).find(|&i| {
        bytes[i] == b'S' && bytes[i + 1] == b'T' && (i == 0 || bytes[i - 1].is_ascii_whitespace())
    })
}

fn decode_euc_kr_trim(bytes: &[u8]) -> String {
    let is_pad = |b: &u8| b.is_ascii_whitespace() || *b == 0;
    let start = bytes.iter().position(|b| !is_pad(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_pad(b)).map_or(start, |p| p + 1);

    let (cow, _, _) = EUC_KR.decode(&bytes[start..end]);
    cow.trim().to_string()
}
