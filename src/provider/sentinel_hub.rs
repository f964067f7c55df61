//! Sentinel Hub Process API provider.
//!
//! Authenticates with the OAuth client-credentials flow and renders a true
//! colour Sentinel-2 L2A composite for the requested bounding box.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::DynamicImage;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{AcquisitionError, AcquisitionRequest, ImageProvider};
use crate::config::ProviderConfig;

const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Refresh the token this long before the server-side expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const MAX_ERROR_BODY_LENGTH: usize = 200;

const TRUE_COLOR_EVALSCRIPT: &str = r#"//VERSION=3
function setup() {
    return {
        input: [{ bands: ["B02", "B03", "B04"] }],
        output: { bands: 3, sampleType: "AUTO" }
    };
}

function evaluatePixel(sample) {
    return [2.5 * sample.B04, 2.5 * sample.B03, 2.5 * sample.B02];
}
"#;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Sentinel Hub implementation of [`ImageProvider`].
#[derive(Debug)]
pub struct SentinelHubProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    token: Mutex<Option<CachedToken>>,
}

impl SentinelHubProvider {
    /// Creates a provider with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::Http`] if the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> Result<Self, AcquisitionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AcquisitionError::Http(format!("failed to create http client: {e}")))?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    /// Whether client credentials are configured at all.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.config.client_id.is_empty() && !self.config.client_secret.is_empty()
    }

    async fn access_token(&self) -> Result<String, AcquisitionError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.refresh_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        if !self.has_credentials() {
            return Err(AcquisitionError::Auth(
                "client credentials are not configured".to_string(),
            ));
        }

        let url = format!("{}/oauth/token", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(TOKEN_TIMEOUT)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AcquisitionError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AcquisitionError::Auth(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                truncate(&body)
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AcquisitionError::Auth(format!("malformed token response: {e}")))?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN);
        info!(provider = self.name(), "authenticated with imagery provider");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at,
        });
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

/// Builds the Process API request body.
fn process_payload(request: &AcquisitionRequest, max_cloud_coverage: u8) -> Value {
    json!({
        "input": {
            "bounds": {
                "bbox": request.bbox.to_array(),
                "properties": { "crs": "http://www.opengis.net/def/crs/EPSG/0/4326" }
            },
            "data": [{
                "type": "sentinel-2-l2a",
                "dataFilter": {
                    "timeRange": {
                        "from": format!("{}T00:00:00Z", request.window.from),
                        "to": format!("{}T23:59:59Z", request.window.to)
                    },
                    "maxCloudCoverage": max_cloud_coverage
                }
            }]
        },
        "output": {
            "width": request.width,
            "height": request.height,
            "responses": [{
                "identifier": "default",
                "format": { "type": "image/jpeg" }
            }]
        },
        "evalscript": TRUE_COLOR_EVALSCRIPT
    })
}

/// Decodes the response body, treating an all-black raster as "no scene".
fn decode_scene(bytes: &[u8]) -> Result<DynamicImage, AcquisitionError> {
    if bytes.is_empty() {
        return Err(AcquisitionError::EmptyResult);
    }
    let image =
        image::load_from_memory(bytes).map_err(|e| AcquisitionError::Decode(e.to_string()))?;
    if image.as_bytes().iter().all(|b| *b == 0) {
        return Err(AcquisitionError::EmptyResult);
    }
    Ok(image)
}

fn truncate(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let cut: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{cut}... (truncated)")
    } else {
        body.to_string()
    }
}

#[async_trait]
impl ImageProvider for SentinelHubProvider {
    async fn acquire(
        &self,
        request: &AcquisitionRequest,
    ) -> Result<DynamicImage, AcquisitionError> {
        let token = self.access_token().await?;
        let url = format!("{}/api/v1/process", self.config.base_url);
        debug!(
            from = %request.window.from,
            to = %request.window.to,
            width = request.width,
            height = request.height,
            "requesting scene"
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .bearer_auth(token)
            .json(&process_payload(request, self.config.max_cloud_coverage))
            .send()
            .await
            .map_err(|e| AcquisitionError::from_reqwest(&e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
            return Err(AcquisitionError::Auth("access token rejected".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "process request failed");
            return Err(AcquisitionError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AcquisitionError::from_reqwest(&e))?;
        decode_scene(&bytes)
    }

    fn name(&self) -> &str {
        "sentinel_hub"
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{BoundingBox, DateWindow};
    use chrono::NaiveDate;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn request() -> AcquisitionRequest {
        let (Some(from), Some(to)) = (
            NaiveDate::from_ymd_opt(2026, 3, 7),
            NaiveDate::from_ymd_opt(2026, 3, 13),
        ) else {
            panic!("valid dates");
        };
        AcquisitionRequest {
            bbox: BoundingBox::from_array([13.3, 52.4, 13.5, 52.6]),
            window: DateWindow { from, to },
            width: 512,
            height: 256,
        }
    }

    fn png_bytes(image: &RgbImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        let Ok(()) = image.write_to(&mut buffer, ImageFormat::Png) else {
            panic!("png encoding");
        };
        buffer.into_inner()
    }

    #[test]
    fn payload_carries_window_and_size() {
        let payload = process_payload(&request(), 20);
        assert_eq!(
            payload["input"]["data"][0]["dataFilter"]["timeRange"]["from"],
            "2026-03-07T00:00:00Z"
        );
        assert_eq!(
            payload["input"]["data"][0]["dataFilter"]["timeRange"]["to"],
            "2026-03-13T23:59:59Z"
        );
        assert_eq!(payload["input"]["data"][0]["dataFilter"]["maxCloudCoverage"], 20);
        assert_eq!(payload["output"]["width"], 512);
        assert_eq!(payload["output"]["height"], 256);
        assert_eq!(payload["input"]["bounds"]["bbox"][1], 52.4);
    }

    #[test]
    fn black_scene_is_empty() {
        let bytes = png_bytes(&RgbImage::new(4, 4));
        assert!(matches!(
            decode_scene(&bytes),
            Err(AcquisitionError::EmptyResult)
        ));
        assert!(matches!(decode_scene(&[]), Err(AcquisitionError::EmptyResult)));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            decode_scene(b"not an image"),
            Err(AcquisitionError::Decode(_))
        ));
    }

    #[test]
    fn real_scene_decodes() {
        let bytes = png_bytes(&RgbImage::from_pixel(4, 4, Rgb([10, 20, 30])));
        let Ok(image) = decode_scene(&bytes) else {
            panic!("expected decoded scene");
        };
        assert_eq!(image.width(), 4);
    }

    #[tokio::test]
    async fn missing_credentials_fail_fast() {
        let Ok(provider) = SentinelHubProvider::new(ProviderConfig::default()) else {
            panic!("client builds");
        };
        let result = provider.acquire(&request()).await;
        assert!(matches!(result, Err(AcquisitionError::Auth(_))));
    }
}
