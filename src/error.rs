use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Target resolution failed: {0}")]
    Resolution(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Notification {id} is a reconstructed fallback item and cannot be modified")]
    NotMutable { id: String },

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Validation error: {0}")]
    ValidatorError(#[from] validator::ValidationErrors),
}

impl AppError {
    /// 稳定的错误码，供 UI 区分"离线"与"回退项不可修改"
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Resolution(_) => "RESOLUTION_ERROR",
            AppError::Validation(_) | AppError::ValidatorError(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::NotMutable { .. } => "FALLBACK_NOT_MUTABLE",
            AppError::Api { .. } => "API_ERROR",
            AppError::Request(_) => "NETWORK_ERROR",
            AppError::Storage(_) | AppError::Io(_) => "STORAGE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Url(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 服务端不可达或返回 5xx 时视为网络类故障
    pub fn is_network(&self) -> bool {
        match self {
            AppError::Request(_) => true,
            AppError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// 目标记录在服务端已不存在，重试没有意义
    pub fn is_gone(&self) -> bool {
        matches!(self, AppError::Api { status: 404, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Api { status, .. } => Some(*status),
            AppError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

// 便利函数，用于创建常见错误
impl AppError {
    pub fn not_found(resource: &str) -> Self {
        Self::NotFound(format!("{} not found", resource))
    }

    pub fn validation(msg: &str) -> Self {
        Self::Validation(msg.to_string())
    }

    pub fn resolution(msg: &str) -> Self {
        Self::Resolution(msg.to_string())
    }

    pub fn storage(msg: &str) -> Self {
        Self::Storage(msg.to_string())
    }

    pub fn internal(msg: &str) -> Self {
        Self::Internal(msg.to_string())
    }

    pub fn not_mutable(id: &str) -> Self {
        Self::NotMutable { id: id.to_string() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_and_network_errors_are_distinct() {
        let fallback = AppError::not_mutable("fallback_12");
        let offline = AppError::Api { status: 503, message: "unavailable".into() };

        assert_eq!(fallback.error_code(), "FALLBACK_NOT_MUTABLE");
        assert!(!fallback.is_network());
        assert_eq!(offline.error_code(), "API_ERROR");
        assert!(offline.is_network());
        assert_eq!(offline.status(), Some(503));
    }

    #[test]
    fn test_client_errors_are_not_network() {
        let err = AppError::Api { status: 400, message: "bad".into() };
        assert!(!err.is_network());
        assert!(!err.is_gone());
    }

    #[test]
    fn test_missing_record_is_gone_not_network() {
        let err = AppError::Api { status: 404, message: "Not Found".into() };
        assert!(err.is_gone());
        assert!(!err.is_network());
        assert!(!AppError::Api { status: 502, message: String::new() }.is_gone());
    }
}
