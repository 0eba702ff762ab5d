//! Reduce per-manager outcomes to a single webhook verdict.

use serde::{Deserialize, Serialize};

use super::{status, ManagerResult};

/// Status-code range of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl Category {
    /// `None` for codes below 100, which belong to no range.
    pub fn of(code: u16) -> Option<Category> {
        match code {
            100..=199 => Some(Category::Informational),
            200..=299 => Some(Category::Success),
            300..=399 => Some(Category::Redirection),
            400..=499 => Some(Category::ClientError),
            500..=u16::MAX => Some(Category::ServerError),
            _ => None,
        }
    }

    pub fn succeeded(self) -> bool {
        matches!(
            self,
            Category::Informational | Category::Success | Category::Redirection
        )
    }
}

/// Results partitioned by status-code range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HttpCategories {
    pub informational: Vec<ManagerResult>,
    pub success: Vec<ManagerResult>,
    pub redirection: Vec<ManagerResult>,
    pub client_errors: Vec<ManagerResult>,
    pub server_errors: Vec<ManagerResult>,
}

impl HttpCategories {
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a ManagerResult>,
    {
        let mut categories = Self::default();
        for result in results {
            if let Some(category) = result.category() {
                categories.bucket_mut(category).push(result.clone());
            }
        }
        categories
    }

    fn bucket_mut(&mut self, category: Category) -> &mut Vec<ManagerResult> {
        match category {
            Category::Informational => &mut self.informational,
            Category::Success => &mut self.success,
            Category::Redirection => &mut self.redirection,
            Category::ClientError => &mut self.client_errors,
            Category::ServerError => &mut self.server_errors,
        }
    }

    pub fn bucket(&self, category: Category) -> &[ManagerResult] {
        match category {
            Category::Informational => &self.informational,
            Category::Success => &self.success,
            Category::Redirection => &self.redirection,
            Category::ClientError => &self.client_errors,
            Category::ServerError => &self.server_errors,
        }
    }

    /// Non-empty buckets in range order.
    pub fn iter(&self) -> impl Iterator<Item = (Category, &[ManagerResult])> {
        [
            Category::Informational,
            Category::Success,
            Category::Redirection,
            Category::ClientError,
            Category::ServerError,
        ]
        .into_iter()
        .map(|c| (c, self.bucket(c)))
        .filter(|(_, results)| !results.is_empty())
    }

    pub fn succeeded(&self) -> bool {
        !(self.informational.is_empty() && self.success.is_empty() && self.redirection.is_empty())
    }

    pub fn failed(&self) -> bool {
        !(self.client_errors.is_empty() && self.server_errors.is_empty())
    }

    pub fn status(&self) -> WebhookStatus {
        match (self.succeeded(), self.failed()) {
            (true, false) => WebhookStatus::new(status::OK, VerdictStatus::Success),
            (true, true) => WebhookStatus::new(status::OK, VerdictStatus::PartialSuccess),
            (false, _) => WebhookStatus::new(status::BAD_REQUEST, VerdictStatus::Failure),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Success,
    PartialSuccess,
    Failure,
}

impl VerdictStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictStatus::Success => "SUCCESS",
            VerdictStatus::PartialSuccess => "PARTIAL_SUCCESS",
            VerdictStatus::Failure => "FAILURE",
        }
    }
}

/// Webhook-level verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookStatus {
    pub code: u16,
    pub status: VerdictStatus,
}

impl WebhookStatus {
    pub fn new(code: u16, status: VerdictStatus) -> Self {
        Self { code, status }
    }
}

pub fn aggregate(results: &[ManagerResult]) -> WebhookStatus {
    HttpCategories::from_results(results).status()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(code: u16) -> ManagerResult {
        ManagerResult::new(format!("m{code}"), code)
    }

    #[test]
    fn test_category_ranges() {
        assert_eq!(Category::of(99), None);
        assert_eq!(Category::of(100), Some(Category::Informational));
        assert_eq!(Category::of(202), Some(Category::Success));
        assert_eq!(Category::of(302), Some(Category::Redirection));
        assert_eq!(Category::of(404), Some(Category::ClientError));
        assert_eq!(Category::of(599), Some(Category::ServerError));
    }

    #[test]
    fn test_decision_table() {
        assert_eq!(aggregate(&[result(200), result(202)]).status, VerdictStatus::Success);

        let partial = aggregate(&[result(200), result(400)]);
        assert_eq!(partial.status, VerdictStatus::PartialSuccess);
        assert_eq!(partial.code, 200);

        let failure = aggregate(&[result(400), result(500)]);
        assert_eq!(failure.status, VerdictStatus::Failure);
        assert_eq!(failure.code, 400);

        assert_eq!(aggregate(&[]).status, VerdictStatus::Failure);
    }

    #[test]
    fn test_adding_success_never_worsens_failure() {
        let mut results = vec![result(400), result(500)];
        assert_eq!(aggregate(&results).status, VerdictStatus::Failure);
        results.push(result(200));
        assert_eq!(aggregate(&results).status, VerdictStatus::PartialSuccess);
    }

    #[test]
    fn test_adding_failure_downgrades_success() {
        let mut results = vec![result(200)];
        results.push(result(400));
        assert_eq!(aggregate(&results).status, VerdictStatus::PartialSuccess);
    }

    #[test]
    fn test_informational_and_redirection_count_as_succeeded() {
        assert_eq!(aggregate(&[result(101)]).status, VerdictStatus::Success);
        assert_eq!(aggregate(&[result(301)]).status, VerdictStatus::Success);
    }

    #[test]
    fn test_iter_skips_empty_buckets() {
        let categories = HttpCategories::from_results(&[result(200), result(500)]);
        let seen: Vec<Category> = categories.iter().map(|(c, _)| c).collect();
        assert_eq!(seen, vec![Category::Success, Category::ServerError]);
    }
}
