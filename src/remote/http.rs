use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{FetchTarget, RemoteAccountEntry, RemoteError, RemoteMemberEntry, SnapshotFetcher};
use crate::AppResult;

pub const DEFAULT_BASE_URL: &str = "https://v2.apparyllis.com/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Remote system API client. The credential is sent verbatim as the
/// `Authorization` header.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .user_agent(concat!("sysmigrate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                crate::AppError::from(err).with_context("operation", "remote_client_build")
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        credential: &str,
    ) -> Result<Option<T>, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        let transport = |err: reqwest::Error| RemoteError::Transport {
            path: path.to_string(),
            message: err.to_string(),
        };

        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, credential)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        debug!(target: "sysmigrate", event = "remote_response", path, status = status.as_u16());
        if !status.is_success() {
            return Err(RemoteError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice::<Option<T>>(&body)
            .map_err(|err| RemoteError::Malformed(format!("{path}: {err}")))
    }
}

/// Ids are interpolated into the request path, so only plain tokens pass.
fn path_segment(id: &str) -> Result<&str, RemoteError> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(id)
    } else {
        Err(RemoteError::Malformed(format!(
            "remote id {id:?} is not a valid path segment"
        )))
    }
}

#[async_trait]
impl SnapshotFetcher for HttpFetcher {
    async fn fetch_account(
        &self,
        credential: &str,
        target: &FetchTarget,
    ) -> Result<RemoteAccountEntry, RemoteError> {
        if let FetchTarget::User(id) = target {
            path_segment(id)?;
        }
        let path = target.path();
        self.get_json(&path, credential)
            .await?
            .ok_or_else(|| RemoteError::Malformed(format!("{path}: empty body")))
    }

    async fn fetch_members(
        &self,
        credential: &str,
        account_remote_id: &str,
    ) -> Result<Vec<RemoteMemberEntry>, RemoteError> {
        let path = format!("/members/{}", path_segment(account_remote_id)?);
        Ok(self.get_json(&path, credential).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn fetcher(server: &MockServer) -> HttpFetcher {
        HttpFetcher::new(format!("{}/v1/", server.uri()), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn fetches_me_with_raw_authorization_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("authorization", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "r1",
                "content": {"isAsystem": true, "username": "Sam", "fields": {}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let entry = fetcher(&server)
            .await
            .fetch_account("tok", &FetchTarget::Me)
            .await
            .expect("account");
        let snapshot = entry.into_snapshot().expect("system");
        assert_eq!(snapshot.id, "r1");
    }

    #[tokio::test]
    async fn override_target_hits_user_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/user/r77"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "r77",
                "content": {"isAsystem": false}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let entry = fetcher(&server)
            .await
            .fetch_account("tok", &FetchTarget::User("r77".into()))
            .await
            .expect("account");
        assert!(matches!(
            entry.into_snapshot(),
            Err(RemoteError::NotASystem { .. })
        ));
    }

    #[tokio::test]
    async fn rejected_credential_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = fetcher(&server)
            .await
            .fetch_account("dead", &FetchTarget::Me)
            .await
            .expect_err("401");
        assert_eq!(
            err,
            RemoteError::Status {
                path: "/me".into(),
                status: 401
            }
        );
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = fetcher(&server)
            .await
            .fetch_account("tok", &FetchTarget::Me)
            .await
            .expect_err("html body");
        assert_eq!(err.code(), "REMOTE/MALFORMED");
    }

    #[tokio::test]
    async fn null_or_empty_member_list_is_zero_members() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/members/r1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/members/r2"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let fetcher = fetcher(&server).await;
        assert!(fetcher.fetch_members("tok", "r1").await.expect("null").is_empty());
        assert!(fetcher.fetch_members("tok", "r2").await.expect("empty").is_empty());
    }

    #[tokio::test]
    async fn member_list_decodes_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/members/r1"))
            .and(header("authorization", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "m1", "content": {"name": "Alex", "private": false, "preventTrusted": false}}
            ])))
            .mount(&server)
            .await;

        let members = fetcher(&server)
            .await
            .fetch_members("tok", "r1")
            .await
            .expect("members");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "m1");
    }

    #[tokio::test]
    async fn suspicious_ids_never_reach_the_network() {
        let server = MockServer::start().await;
        let fetcher = fetcher(&server).await;
        let err = fetcher
            .fetch_members("tok", "../admin")
            .await
            .expect_err("traversal");
        assert_eq!(err.code(), "REMOTE/MALFORMED");
        let err = fetcher
            .fetch_account("tok", &FetchTarget::User("a?b=c".into()))
            .await
            .expect_err("query injection");
        assert_eq!(err.code(), "REMOTE/MALFORMED");
    }
}
