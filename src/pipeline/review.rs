//! One-shot code review through the oracle
//!
//! Unlike a trace, a review has no playback or cache. The full response is
//! collected and decoded into issues, and an "all clear" answer is a clean
//! empty list.

use crate::error::TraceError;
use crate::oracle::prompt::review_prompt;
use crate::oracle::{Oracle, OracleFailure, OracleRequest, RequestKind};
use crate::trace::cache::SourceId;
use crate::trace::decoder::Decoder;
use crate::trace::issues::CodeIssue;

use super::orchestrator::OrchestratorSettings;

pub async fn review_code(
    oracle: &dyn Oracle,
    source_id: SourceId,
    code: &str,
    settings: &OrchestratorSettings,
) -> Result<Vec<CodeIssue>, TraceError> {
    let request = OracleRequest::new(source_id.clone(), review_prompt(code), RequestKind::Review)
        .with_model(settings.model.clone())
        .with_max_tokens(settings.max_tokens);

    let stream = oracle
        .invoke(request)
        .await
        .map_err(|e| TraceError::from_failure(OracleFailure::from(&e), settings.rate_limit_cooldown))?;

    let text = stream
        .collect_text()
        .await
        .map_err(|failure| TraceError::from_failure(failure, settings.rate_limit_cooldown))?;

    let issues = Decoder::new(settings.decode)
        .decode::<CodeIssue>(&text)
        .into_result()
        .map_err(TraceError::Decode)?;

    tracing::info!(source = %source_id, issues = issues.len(), "Review decoded");
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::mock::{MockOracle, MockResponse};
    use crate::trace::issues::Severity;

    #[tokio::test]
    async fn test_review_decodes_issues() {
        let oracle = MockOracle::new().with_fallback(MockResponse::text(
            r#"{"issues":[{"line":3,"severity":"error","message":"off by one"}]}"#,
        ));
        let issues = review_code(&oracle, "a.py".into(), "x", &OrchestratorSettings::default())
            .await
            .unwrap();

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, 3);
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(
            oracle.last_request().map(|r| r.kind),
            Some(RequestKind::Review)
        );
    }

    #[tokio::test]
    async fn test_all_clear_is_empty() {
        let oracle =
            MockOracle::new().with_fallback(MockResponse::text("Looks good, no issues found."));
        let issues = review_code(&oracle, "a.py".into(), "x", &OrchestratorSettings::default())
            .await
            .unwrap();
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces() {
        let oracle = MockOracle::new().with_fallback(MockResponse::rate_limited(None));
        let result = review_code(&oracle, "a.py".into(), "x", &OrchestratorSettings::default()).await;
        assert!(matches!(result, Err(TraceError::RateLimited { .. })));
    }
}
