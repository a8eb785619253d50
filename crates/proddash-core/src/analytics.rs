use std::sync::Arc;

use proddash_shared::{AnalyticsPayload, DayBucket};
use tracing::{instrument, warn};

use crate::http::ApiClient;

/// Day-bucketed completed/pending counts. `placeholder` marks the built-in
/// sample shown when the backend could not be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsSummary {
    pub buckets: Vec<DayBucket>,
    pub placeholder: bool,
}

impl AnalyticsSummary {
    pub fn from_payload(payload: AnalyticsPayload) -> Self {
        let buckets = match payload {
            AnalyticsPayload::Buckets { data } => data,
            AnalyticsPayload::Totals { completed, pending } => vec![DayBucket {
                day: "All".to_string(),
                completed,
                pending,
            }],
        };
        Self {
            buckets,
            placeholder: false,
        }
    }

    pub fn placeholder() -> Self {
        let buckets = [
            ("Mon", 4, 2),
            ("Tue", 3, 3),
            ("Wed", 5, 1),
            ("Thu", 2, 4),
            ("Fri", 6, 0),
            ("Sat", 1, 2),
            ("Sun", 3, 1),
        ]
        .into_iter()
        .map(|(day, completed, pending)| DayBucket {
            day: day.to_string(),
            completed,
            pending,
        })
        .collect();
        Self {
            buckets,
            placeholder: true,
        }
    }

    pub fn totals(&self) -> (u64, u64) {
        self.buckets.iter().fold((0, 0), |(done, open), bucket| {
            (done + bucket.completed, open + bucket.pending)
        })
    }
}

/// Fetches the summary, substituting the placeholder on any failure so the
/// view never blocks on the backend.
#[instrument(skip(api))]
pub async fn load_summary(api: &ApiClient) -> AnalyticsSummary {
    match api.analytics().await {
        Ok(payload) => AnalyticsSummary::from_payload(payload),
        Err(err) => {
            warn!(error = %err, "analytics unavailable; showing placeholder data");
            AnalyticsSummary::placeholder()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Analytics {
    api: Arc<ApiClient>,
}

impl Analytics {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    pub async fn load(&self) -> AnalyticsSummary {
        load_summary(&self.api).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::{StubTransport, client_with, status_error};

    #[tokio::test(start_paused = true)]
    async fn shapes_and_failure_fallback() {
        let transport = StubTransport::new();
        transport.push_ok(json!({ "data": [{ "day": "Mon", "completed": 1, "pending": 2 }] }));
        transport.push_ok(json!({ "completed": 7, "pending": 3 }));
        transport.push_err(status_error(404, json!({ "detail": "Not Found" })));
        let (client, _, _) = client_with(&transport, Some("t"));
        let analytics = Analytics::new(Arc::new(client));

        let daily = analytics.load().await;
        assert!(!daily.placeholder);
        assert_eq!(daily.buckets[0].day, "Mon");

        let totals = analytics.load().await;
        assert_eq!(totals.buckets.len(), 1);
        assert_eq!(totals.buckets[0].day, "All");
        assert_eq!(totals.totals(), (7, 3));

        let fallback = analytics.load().await;
        assert!(fallback.placeholder);
        assert_eq!(fallback.buckets.len(), 7);
        assert_eq!(fallback.totals(), (24, 13));
    }
}
