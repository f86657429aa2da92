//! HTTP client for the evaluation backend.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{truncate_body, ApiError, Result};
use crate::config::HttpConfig;
use crate::model::{
    Document, DocumentDeleted, Evaluation, EvaluationSummary, LlmInfo, LlmStatistics, QcmItem,
    Report, ReportDetail, ReportFilter, ReportFormat, StartEvaluationRequest, StartedEvaluation,
};

/// The backend calls a watch session depends on.
#[async_trait]
pub trait EvaluationApi: Send + Sync {
    /// All evaluations known to the backend, in backend order.
    async fn list_evaluations(&self) -> Result<Vec<EvaluationSummary>>;

    async fn get_evaluation(&self, id: &str) -> Result<Evaluation>;

    /// Generated QCM items of an evaluation, oldest first.
    async fn get_evaluation_qcm(&self, id: &str) -> Result<Vec<QcmItem>>;

    async fn start_evaluation(&self, request: &StartEvaluationRequest) -> Result<StartedEvaluation>;
}

/// Reply of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
struct EvaluationList {
    #[serde(default)]
    evaluations: Vec<EvaluationSummary>,
}

#[derive(Deserialize)]
struct QcmList {
    #[serde(default)]
    qcm_list: Vec<QcmItem>,
}

#[derive(Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Deserialize)]
struct ReportList {
    #[serde(default)]
    reports: Vec<Report>,
}

/// `EvaluationApi` over the backend's REST endpoints.
#[derive(Clone)]
pub struct HttpEvaluationApi {
    client: Client,
    base: Url,
}

impl HttpEvaluationApi {
    pub fn new(base_url: &str, http: &HttpConfig) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a base URL".to_string(),
            });
        }
        base.set_query(None);
        base.set_fragment(None);

        let client = Client::builder()
            .connect_timeout(http.connect_timeout())
            .timeout(http.request_timeout())
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let url = self.endpoint(&["api", "documents"])?;
        let list: DocumentList = self.get_json(url).await?;
        Ok(list.documents)
    }

    pub async fn get_document(&self, id: &str) -> Result<Document> {
        self.get_json(self.endpoint(&["api", "documents", id])?).await
    }

    /// Removes the document and its stored file. An unknown id is a 404.
    pub async fn delete_document(&self, id: &str) -> Result<DocumentDeleted> {
        let url = self.endpoint(&["api", "documents", id])?;
        self.send_json(Method::DELETE, url).await
    }

    /// Lists reports, using the filter endpoint when any criterion is set.
    pub async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        let list: ReportList = if filter.is_empty() {
            self.get_json(self.endpoint(&["api", "reports"])?).await?
        } else {
            let url = self.endpoint(&["api", "reports", "filter"])?;
            debug!("GET {} {:?}", url, filter);
            let response = self
                .client
                .get(url.clone())
                .query(filter)
                .send()
                .await
                .map_err(|e| request_error(&url, e))?;
            decode(&url, response).await?
        };
        Ok(list.reports)
    }

    pub async fn get_report(&self, id: &str) -> Result<ReportDetail> {
        self.get_json(self.endpoint(&["api", "reports", id])?).await
    }

    /// Download link for one report file. Nothing is fetched.
    pub fn report_download_url(&self, report_id: &str, format: ReportFormat) -> Result<Url> {
        let mut url = self.endpoint(&["api", "reports", "download", report_id])?;
        url.query_pairs_mut().append_pair("format", format.as_str());
        Ok(url)
    }

    pub async fn llm_info(&self) -> Result<LlmInfo> {
        self.get_json(self.endpoint(&["api", "llm", "info"])?).await
    }

    pub async fn llm_statistics(&self) -> Result<LlmStatistics> {
        self.get_json(self.endpoint(&["api", "llm", "statistics"])?)
            .await
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.get_json(self.endpoint(&["health"])?).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| ApiError::InvalidUrl {
                url: self.base.to_string(),
                reason: "not a base URL".to_string(),
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        self.send_json(Method::GET, url).await
    }

    async fn send_json<T: DeserializeOwned>(&self, method: Method, url: Url) -> Result<T> {
        debug!("{} {}", method, url);
        let response = self
            .client
            .request(method, url.clone())
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        decode(&url, response).await
    }
}

#[async_trait]
impl EvaluationApi for HttpEvaluationApi {
    async fn list_evaluations(&self) -> Result<Vec<EvaluationSummary>> {
        let list: EvaluationList = self.get_json(self.endpoint(&["api", "evaluations"])?).await?;
        Ok(list.evaluations)
    }

    async fn get_evaluation(&self, id: &str) -> Result<Evaluation> {
        self.get_json(self.endpoint(&["api", "evaluations", id])?)
            .await
    }

    async fn get_evaluation_qcm(&self, id: &str) -> Result<Vec<QcmItem>> {
        let list: QcmList = self
            .get_json(self.endpoint(&["api", "evaluations", id, "qcm"])?)
            .await?;
        Ok(list.qcm_list)
    }

    async fn start_evaluation(&self, request: &StartEvaluationRequest) -> Result<StartedEvaluation> {
        let url = self.endpoint(&["api", "evaluations", "start"])?;
        debug!(
            "POST {} ({} documents, test_mode={})",
            url,
            request.document_ids.len(),
            request.test_mode
        );
        let response = self
            .client
            .post(url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        decode(&url, response).await
    }
}

fn request_error(url: &Url, err: reqwest::Error) -> ApiError {
    ApiError::Request {
        url: url.to_string(),
        message: err.to_string(),
    }
}

async fn decode<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await.map_err(|e| request_error(url, e))?;

    if !status.is_success() {
        return Err(ApiError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }

    serde_json::from_str(&body).map_err(|e| ApiError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> HttpEvaluationApi {
        HttpEvaluationApi::new(base, &HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let api = api("http://localhost:8000");
        assert_eq!(
            api.endpoint(&["api", "evaluations", "e1", "qcm"]).unwrap().as_str(),
            "http://localhost:8000/api/evaluations/e1/qcm"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path_and_escapes_ids() {
        let api = api("https://example.com/llm-eval/?debug=1");
        assert_eq!(
            api.endpoint(&["api", "evaluations", "a b/c"]).unwrap().as_str(),
            "https://example.com/llm-eval/api/evaluations/a%20b%2Fc"
        );
    }

    #[test]
    fn test_report_download_url() {
        let api = api("http://localhost:8000/");
        let url = api.report_download_url("r-1", ReportFormat::Csv).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/reports/download/r-1?format=csv"
        );
    }

    #[test]
    fn test_rejects_invalid_base() {
        assert!(HttpEvaluationApi::new("not a url", &HttpConfig::default()).is_err());
        assert!(HttpEvaluationApi::new("mailto:ops@example.com", &HttpConfig::default()).is_err());
    }

    #[test]
    fn test_start_reply_without_criteria() {
        let started: StartedEvaluation =
            serde_json::from_str(r#"{"evaluation_id": "e9", "status": "started"}"#).unwrap();
        assert_eq!(started.evaluation_id, "e9");
        assert!(started.selected_criteria.is_empty());
    }
}
