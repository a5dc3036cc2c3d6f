use thiserror::Error;

/// Failure of a single page fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("timeout ({0}s)")]
    Timeout(u64),
    #[error("HTTP {0}")]
    Http(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("empty response")]
    EmptyResponse,
}

impl FetchError {
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout_secs)
        } else if let Some(status) = err.status() {
            FetchError::Http(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Why one crawl unit produced nothing. Never fatal to the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no grade tables found")]
    NoGradeTablesFound,
    #[error("no groups found")]
    NoGroupsFound,
}

impl UnitError {
    pub fn is_fetch(&self) -> bool {
        matches!(self, UnitError::Fetch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(FetchError::Timeout(10).to_string(), "timeout (10s)");
        assert_eq!(FetchError::Http(503).to_string(), "HTTP 503");
        let unit: UnitError = FetchError::EmptyResponse.into();
        assert!(unit.is_fetch());
        assert_eq!(unit.to_string(), "empty response");
        assert!(!UnitError::NoGradeTablesFound.is_fetch());
    }
}
