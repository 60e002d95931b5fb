use super::GenerationService;
use crate::error::ServiceError;
use crate::model::{
    Candidate, ControllerConfig, GenerationRequest, JobId, StatusResponse, SubmitResponse,
};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::de::DeserializeOwned;
use url::Url;

/// HTTP client for the generation service.
#[derive(Clone)]
pub struct HttpService {
    http: reqwest::Client,
    cfg: ControllerConfig,
}

impl HttpService {
    pub fn new(cfg: &ControllerConfig) -> Result<Self, ServiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|source| ServiceError::Http {
                url: cfg.base_url.to_string(),
                source,
            })?;
        Ok(Self {
            http,
            cfg: cfg.clone(),
        })
    }

    fn search_url(&self, query: &str) -> Result<Url, ServiceError> {
        let mut url = self.cfg.endpoint("search")?;
        url.query_pairs_mut().append_pair("q", query);
        Ok(url)
    }

    fn generate_url(&self) -> Result<Url, ServiceError> {
        Ok(self.cfg.endpoint("generate")?)
    }

    fn status_url(&self, job_id: &JobId) -> Result<Url, ServiceError> {
        let mut url = self.cfg.endpoint("status")?;
        url.path_segments_mut()
            .map_err(|_| ServiceError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(job_id.as_str());
        Ok(url)
    }

    async fn send(&self, req: reqwest::RequestBuilder, url: &Url) -> Result<Bytes, ServiceError> {
        let resp = req.send().await.map_err(|source| ServiceError::Http {
            url: url.to_string(),
            source,
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.bytes().await.map_err(|source| ServiceError::Http {
            url: url.to_string(),
            source,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<T, ServiceError> {
        let body = self.send(req, url).await?;
        serde_json::from_slice(&body).map_err(|source| ServiceError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait::async_trait]
impl GenerationService for HttpService {
    async fn search(&self, query: &str) -> Result<Vec<Candidate>, ServiceError> {
        let url = self.search_url(query)?;
        tracing::debug!(%url, "search");
        self.send_json(self.http.get(url.clone()), &url).await
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitResponse, ServiceError> {
        let url = self.generate_url()?;
        tracing::debug!(%url, artist_id = %request.artist_id, depth = request.depth.get(), "submit");
        self.send_json(self.http.post(url.clone()).json(request), &url)
            .await
    }

    async fn status(&self, job_id: &JobId) -> Result<StatusResponse, ServiceError> {
        let url = self.status_url(job_id)?;
        tracing::trace!(%url, "status");
        self.send_json(self.http.get(url.clone()), &url).await
    }

    async fn fetch_artifact(&self, location: &Url) -> Result<Bytes, ServiceError> {
        tracing::debug!(url = %location, "fetch artifact");
        self.send(self.http.get(location.clone()), location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(base: &str) -> HttpService {
        HttpService::new(&ControllerConfig::new(Url::parse(base).unwrap())).unwrap()
    }

    #[test]
    fn search_query_is_encoded() {
        let svc = service("http://localhost:8000");
        assert_eq!(
            svc.search_url("Guns N' Roses & co").unwrap().as_str(),
            "http://localhost:8000/search?q=Guns+N%27+Roses+%26+co"
        );
    }

    #[test]
    fn status_url_escapes_job_id() {
        let svc = service("http://localhost:8000/api/");
        assert_eq!(
            svc.status_url(&JobId::new("a/b")).unwrap().as_str(),
            "http://localhost:8000/api/status/a%2Fb"
        );
    }
}
