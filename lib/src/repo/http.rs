//! A thin HTTP implementation of the [`Repository`] contract.
//!
//! One method call maps to one request; retries, chunking and transaction
//! pacing are the ingesters' business. The transaction id is process-wide
//! state attached to every request as a header.

use std::sync::Mutex;

use anyhow::Context as _;
use fn_error_context::context;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{
    BinaryPayload, LookupResult, RepoError, RepoResource, Repository, SearchTerm, UpdateMode,
};
use crate::rdf::{ntriples, Graph, MetadataNode, NamedNode, Term};
use crate::schema::Schema;

const NTRIPLES_MIME: &str = "application/n-triples";
const TX_HEADER: &str = "x-transaction-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxInfo {
    transaction_id: String,
}

/// HTTP client for the repository's REST dialect.
#[derive(Debug)]
pub struct HttpRepository {
    client: reqwest::Client,
    base_url: String,
    schema: Schema,
    auth: Option<(String, String)>,
    tx: Mutex<Option<String>>,
}

impl HttpRepository {
    /// Connect to a repository: probe its `describe` endpoint for the
    /// schema, falling back to the reference deployment's defaults when the
    /// endpoint is absent.
    #[context("Connecting to repository {url}")]
    pub async fn connect(url: Url, auth: Option<(String, String)>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Building HTTP client")?;
        let base_url = url.as_str().trim_end_matches('/').to_string();
        let mut req = client.get(format!("{base_url}/describe"));
        if let Some((user, password)) = &auth {
            req = req.basic_auth(user, Some(password));
        }
        let resp = req.send().await.context("Requesting repository schema")?;
        let schema = if resp.status() == StatusCode::NOT_FOUND {
            tracing::debug!("no describe endpoint, assuming default schema");
            Schema::arche_defaults()
        } else {
            resp.error_for_status()
                .context("Requesting repository schema")?
                .json()
                .await
                .context("Parsing repository schema")?
        };
        Ok(Self {
            client,
            base_url,
            schema,
            auth,
            tx: Mutex::new(None),
        })
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some((user, password)) = &self.auth {
            req = req.basic_auth(user, Some(password));
        }
        if let Some(tx) = self.tx.lock().expect("transaction lock poisoned").as_ref() {
            req = req.header(TX_HEADER, tx);
        }
        req
    }

    fn tx_id(&self) -> Result<String, RepoError> {
        self.tx
            .lock()
            .expect("transaction lock poisoned")
            .clone()
            .ok_or(RepoError::NoTransaction)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RepoError> {
        let resp = req
            .send()
            .await
            .map_err(|e| RepoError::Network(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_to_error(status, body))
    }

    async fn read_resource(&self, resp: Response, fallback_uri: Option<NamedNode>) -> Result<RepoResource, RepoError> {
        let location = resp
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(|v| NamedNode::new(absolute(&self.base_url, v)));
        let body = resp
            .text()
            .await
            .map_err(|e| RepoError::Network(e.to_string()))?;
        let graph = parse_body(&body)?;
        let uri = location
            .or(fallback_uri)
            .or_else(|| first_named_subject(&graph))
            .ok_or_else(|| RepoError::Protocol("response identifies no resource".into()))?;
        let meta = graph
            .node(&Term::Named(uri.clone()))
            .unwrap_or_else(|| MetadataNode::new(Term::Named(uri.clone())));
        Ok(RepoResource { uri, meta })
    }
}

#[async_trait::async_trait]
impl Repository for HttpRepository {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn begin(&self) -> Result<(), RepoError> {
        let url = format!("{}/transaction", self.base_url);
        let resp = self.send(self.request(Method::POST, url)).await?;
        let info: TxInfo = resp
            .json()
            .await
            .map_err(|e| RepoError::Protocol(format!("malformed transaction response: {e}")))?;
        tracing::debug!(tx = %info.transaction_id, "transaction opened");
        *self.tx.lock().expect("transaction lock poisoned") = Some(info.transaction_id);
        Ok(())
    }

    async fn commit(&self) -> Result<(), RepoError> {
        let tx = self.tx_id()?;
        let url = format!("{}/transaction/{tx}", self.base_url);
        self.send(self.request(Method::PUT, url)).await?;
        tracing::debug!(%tx, "transaction committed");
        *self.tx.lock().expect("transaction lock poisoned") = None;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), RepoError> {
        let tx = self.tx_id()?;
        let url = format!("{}/transaction/{tx}", self.base_url);
        self.send(self.request(Method::DELETE, url)).await?;
        tracing::debug!(%tx, "transaction rolled back");
        *self.tx.lock().expect("transaction lock poisoned") = None;
        Ok(())
    }

    async fn prolong(&self) -> Result<(), RepoError> {
        let tx = self.tx_id()?;
        let url = format!("{}/transaction/{tx}", self.base_url);
        self.send(self.request(Method::GET, url)).await?;
        Ok(())
    }

    async fn create_resource(
        &self,
        meta: &MetadataNode,
        binary: Option<&BinaryPayload>,
    ) -> Result<RepoResource, RepoError> {
        let url = format!("{}/resource", self.base_url);
        let req = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, NTRIPLES_MIME)
            .body(node_to_ntriples(meta));
        let resp = self.send(req).await?;
        let mut resource = self.read_resource(resp, None).await?;
        if resource.meta.is_empty() {
            let mut meta = meta.clone();
            meta.set_subject(Term::Named(resource.uri.clone()));
            resource.meta = meta;
        }
        if let Some(binary) = binary {
            resource = self.update_content(&resource, binary).await?;
        }
        Ok(resource)
    }

    async fn resource_by_ids(&self, ids: &[NamedNode]) -> Result<LookupResult, RepoError> {
        for id in ids {
            let url = format!("{}/byId?uri={}", self.base_url, urlencode(id.as_str()));
            let resp = self
                .request(Method::GET, url)
                .send()
                .await
                .map_err(|e| RepoError::Network(e.to_string()))?;
            match resp.status() {
                StatusCode::NOT_FOUND => continue,
                status if status.is_success() => {
                    let resource = self.read_resource(resp, None).await?;
                    return Ok(LookupResult::Found(resource));
                }
                status => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(status_to_error(status, body));
                }
            }
        }
        Ok(LookupResult::NotFound)
    }

    async fn search(&self, terms: &[SearchTerm]) -> Result<Vec<RepoResource>, RepoError> {
        let url = format!("{}/search", self.base_url);
        let body: Vec<serde_json::Value> = terms
            .iter()
            .map(|t| {
                serde_json::json!({
                    "property": t.predicate.as_str(),
                    "value": t.value.lexical(),
                })
            })
            .collect();
        let resp = self
            .send(self.request(Method::POST, url).json(&body))
            .await?;
        let text = resp
            .text()
            .await
            .map_err(|e| RepoError::Network(e.to_string()))?;
        let graph = parse_body(&text)?;
        let mut out = Vec::new();
        for subject in graph.subjects() {
            if let Term::Named(uri) = subject {
                if uri.as_str().starts_with(&self.base_url) {
                    out.push(RepoResource {
                        uri: uri.clone(),
                        meta: graph.node(subject).expect("subject is present"),
                    });
                }
            }
        }
        Ok(out)
    }

    async fn update_metadata(
        &self,
        resource: &RepoResource,
        mode: UpdateMode,
        meta: &MetadataNode,
    ) -> Result<RepoResource, RepoError> {
        let mut meta = meta.clone();
        meta.set_subject(Term::Named(resource.uri.clone()));
        let url = format!("{}/metadata", resource.uri.as_str());
        let mode = match mode {
            UpdateMode::Merge => "merge",
            UpdateMode::Overwrite => "overwrite",
        };
        let req = self
            .request(Method::PATCH, url)
            .header(CONTENT_TYPE, NTRIPLES_MIME)
            .header("x-metadata-write-mode", mode)
            .body(node_to_ntriples(&meta));
        let resp = self.send(req).await?;
        self.read_resource(resp, Some(resource.uri.clone())).await
    }

    async fn update_content(
        &self,
        resource: &RepoResource,
        binary: &BinaryPayload,
    ) -> Result<RepoResource, RepoError> {
        let body = binary
            .read()
            .map_err(|e| RepoError::Network(format!("reading upload body: {e}")))?;
        let mut headers = HeaderMap::new();
        let mime = binary.mime.as_deref().unwrap_or("application/octet-stream");
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(mime)
                .map_err(|e| RepoError::Protocol(format!("invalid media type {mime:?}: {e}")))?,
        );
        if let Some(name) = &binary.file_name {
            let value = format!("attachment; filename=\"{}\"", name.replace('"', ""));
            headers.insert(
                CONTENT_DISPOSITION,
                HeaderValue::from_str(&value)
                    .map_err(|e| RepoError::Protocol(format!("invalid file name: {e}")))?,
            );
        }
        let req = self
            .request(Method::PUT, resource.uri.as_str().to_string())
            .headers(headers)
            .body(body);
        let resp = self.send(req).await?;
        self.read_resource(resp, Some(resource.uri.clone())).await
    }

    async fn delete(
        &self,
        resource: &RepoResource,
        with_references: bool,
        with_children: bool,
    ) -> Result<(), RepoError> {
        let mut req = self.request(Method::DELETE, resource.uri.as_str().to_string());
        if with_references {
            req = req.header("x-delete-references", "1");
        }
        if with_children {
            req = req.header("x-delete-children", "1");
        }
        self.send(req).await?;
        Ok(())
    }
}

/// Map a non-success HTTP status to the client error taxonomy.
fn status_to_error(status: StatusCode, body: String) -> RepoError {
    let body = if body.is_empty() {
        status.to_string()
    } else {
        body
    };
    match status {
        StatusCode::CONFLICT => RepoError::Conflict(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => RepoError::Validation(body),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RepoError::Denied(body),
        _ => RepoError::Protocol(format!("{status}: {body}")),
    }
}

fn node_to_ntriples(node: &MetadataNode) -> String {
    let mut graph = Graph::new();
    graph.add_node(node.clone());
    ntriples::to_string(&graph)
}

fn parse_body(body: &str) -> Result<Graph, RepoError> {
    if body.trim().is_empty() {
        return Ok(Graph::new());
    }
    ntriples::parse_str(body).map_err(|e| RepoError::Protocol(e.to_string()))
}

fn first_named_subject(graph: &Graph) -> Option<NamedNode> {
    graph
        .subjects()
        .find_map(|s| s.as_named().cloned())
}

fn absolute(base: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        location.to_string()
    } else {
        format!("{}/{}", base, location.trim_start_matches('/'))
    }
}

fn urlencode(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, percent_encoding::NON_ALPHANUMERIC).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_to_error(StatusCode::CONFLICT, "Resource 1 locked".into()),
            RepoError::Conflict(_)
        ));
        assert!(matches!(
            status_to_error(StatusCode::BAD_REQUEST, "bad value".into()),
            RepoError::Validation(_)
        ));
        assert!(matches!(
            status_to_error(StatusCode::FORBIDDEN, String::new()),
            RepoError::Denied(_)
        ));
        assert!(matches!(
            status_to_error(StatusCode::BAD_GATEWAY, String::new()),
            RepoError::Protocol(_)
        ));
    }

    #[test]
    fn location_resolution() {
        assert_eq!(
            absolute("https://repo.example.org/api", "/12345"),
            "https://repo.example.org/api/12345"
        );
        assert_eq!(
            absolute("https://repo.example.org/api", "https://repo.example.org/api/1"),
            "https://repo.example.org/api/1"
        );
    }
}
