pub mod async_reviews;
pub mod health_route;
pub mod reviews;

use review_pipeline::{ChangeRequestRef, ProviderKind};

use crate::error_handler::AppError;

/// Parses and validates the `{provider}/{repository_id}/{n}` path triple.
pub fn parse_change_request(
    provider: &str,
    repository_id: &str,
    n: u64,
) -> Result<ChangeRequestRef, AppError> {
    let kind = ProviderKind::parse(provider)
        .ok_or_else(|| AppError::BadRequest(format!("unknown provider `{provider}`")))?;
    ChangeRequestRef::new(kind, repository_id, n)
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_provider_and_zero_number() {
        assert!(parse_change_request("github", "acme/app", 1).is_ok());
        assert!(parse_change_request("svn", "acme/app", 1).is_err());
        assert!(parse_change_request("github", "acme/app", 0).is_err());
    }
}
