//! Error taxonomy for the price tracker.

/// All errors produced by the tracker core.
///
/// Extraction-layer variants (`MalformedEmbeddedData`, `Network`,
/// `MissingCredentials`) are recovered inside their component and only
/// logged; `NoPriceAvailable` and `InvalidTargetPrice` reach the user.
#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error("no price could be resolved for product {0}; reload the product page and try again")]
    NoPriceAvailable(String),

    #[error("malformed embedded data in {origin}: {reason}")]
    MalformedEmbeddedData { origin: String, reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("invalid target price: {0}")]
    InvalidTargetPrice(String),

    #[error("seller API credentials are not configured")]
    MissingCredentials,

    #[error("product not found: {0}")]
    ProductNotFound(String),

    #[error("invalid product data: {0}")]
    InvalidProduct(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => TrackerError::HttpStatus {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => TrackerError::Network(e.to_string()),
        }
    }
}

impl TrackerError {
    /// Whether the failure came from the transport rather than the data.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            TrackerError::Network(_) | TrackerError::HttpStatus { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_price_message_is_specific() {
        let err = TrackerError::NoPriceAvailable("123456".to_string());
        let msg = err.to_string();
        assert!(msg.contains("no price could be resolved"));
        assert!(msg.contains("123456"));
    }

    #[test]
    fn test_network_classification() {
        assert!(TrackerError::Network("reset".into()).is_network());
        assert!(TrackerError::HttpStatus {
            status: 503,
            url: "https://www.ozon.ru/".into()
        }
        .is_network());
        assert!(!TrackerError::MissingCredentials.is_network());
    }
}
