use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};

use super::backend::{BulkFailure, SearchBackend, SearchError, SearchHits};

/// Talks to an Elasticsearch-compatible REST API.
#[derive(Clone)]
pub struct ElasticsearchBackend {
    client: Client,
    base_url: String,
}

impl ElasticsearchBackend {
    pub fn new(base_url: &str) -> Result<Self, SearchError> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

async fn expect_success(response: Response) -> Result<Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(SearchError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn parse_hits(body: &Value) -> Result<SearchHits, SearchError> {
    let hits = body
        .get("hits")
        .ok_or_else(|| SearchError::Unexpected("missing hits".to_string()))?;
    let total = match hits.get("total") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(total) => total.get("value").and_then(Value::as_u64).unwrap_or(0),
        None => 0,
    };
    let ids = hits
        .get("hits")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|hit| match hit.get("_id") {
                    Some(Value::String(id)) => id.parse::<i64>().ok(),
                    Some(Value::Number(id)) => id.as_i64(),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(SearchHits { ids, total })
}

fn parse_bulk_failures(body: &Value) -> Vec<BulkFailure> {
    let Some(items) = body.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| item.get("index"))
        .filter_map(|result| {
            let status = result.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;
            let error = result.get("error");
            if (200..300).contains(&status) && error.is_none() {
                return None;
            }
            let id = match result.get("_id") {
                Some(Value::String(id)) => id.parse().unwrap_or_default(),
                Some(Value::Number(id)) => id.as_i64().unwrap_or_default(),
                _ => 0,
            };
            Some(BulkFailure {
                id,
                status,
                error: error.map(Value::to_string).unwrap_or_default(),
            })
        })
        .collect()
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn index_exists(&self, index: &str) -> Result<bool, SearchError> {
        let response = self.client.head(self.url(index)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(SearchError::Status {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn create_index(&self, index: &str) -> Result<(), SearchError> {
        let response = self.client.put(self.url(index)).send().await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn index_document(&self, index: &str, id: i64, document: &Value) -> Result<(), SearchError> {
        let response = self
            .client
            .put(self.url(&format!("{}/_doc/{}", index, id)))
            .json(document)
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: i64) -> Result<(), SearchError> {
        let response = self
            .client
            .delete(self.url(&format!("{}/_doc/{}", index, id)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(response).await?;
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        expression: &str,
        from: usize,
        size: usize,
    ) -> Result<SearchHits, SearchError> {
        let body = json!({
            "query": {"multi_match": {"query": expression, "fields": ["*"]}},
            "from": from,
            "size": size,
        });
        let response = self
            .client
            .post(self.url(&format!("{}/_search", index)))
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(SearchHits::default());
        }
        let response = expect_success(response).await?;
        let body: Value = response.json().await?;
        parse_hits(&body)
    }

    async fn delete_all(&self, index: &str) -> Result<(), SearchError> {
        let response = self
            .client
            .post(self.url(&format!("{}/_delete_by_query", index)))
            .json(&json!({"query": {"match_all": {}}}))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(response).await?;
        Ok(())
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<(i64, Value)>,
    ) -> Result<Vec<BulkFailure>, SearchError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let mut payload = String::new();
        for (id, document) in &documents {
            let action = json!({"index": {"_index": index, "_id": id.to_string()}});
            payload.push_str(&action.to_string());
            payload.push('\n');
            payload.push_str(&document.to_string());
            payload.push('\n');
        }
        let response = self
            .client
            .post(self.url("_bulk"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await?;
        let response = expect_success(response).await?;
        let body: Value = response.json().await?;
        Ok(parse_bulk_failures(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> ElasticsearchBackend {
        ElasticsearchBackend::with_client(Client::new(), &format!("{}/", server.uri()))
    }

    #[tokio::test]
    async fn missing_index_is_reported_as_absent() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server);
        assert!(!backend.index_exists("posts").await.unwrap());
        assert!(backend.index_exists("users").await.unwrap());
    }

    #[tokio::test]
    async fn documents_are_put_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/posts/_doc/7"))
            .and(body_json(json!({"body": "hello"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server);
        backend.create_index("posts").await.unwrap();
        backend.index_document("posts", 7, &json!({"body": "hello"})).await.unwrap();
    }

    #[tokio::test]
    async fn deleting_a_missing_document_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/posts/_doc/7"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/posts/_doc/8"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server);
        backend.delete_document("posts", 7).await.unwrap();
        assert!(matches!(
            backend.delete_document("posts", 8).await,
            Err(SearchError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn query_sends_paging_and_multi_match() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/posts/_search"))
            .and(body_json(json!({
                "query": {"multi_match": {"query": "apple pie", "fields": ["*"]}},
                "from": 6,
                "size": 3,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": {"total": {"value": 8}, "hits": [{"_id": "5"}, {"_id": "2"}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let hits = backend(&server).query("posts", "apple pie", 6, 3).await.unwrap();
        assert_eq!(hits.ids, vec![5, 2]);
        assert_eq!(hits.total, 8);
    }

    #[tokio::test]
    async fn delete_all_tolerates_a_missing_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/posts/_delete_by_query"))
            .and(body_json(json!({"query": {"match_all": {}}})))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server).delete_all("posts").await.unwrap();
    }

    #[tokio::test]
    async fn bulk_is_sent_as_ndjson() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [
                    {"index": {"_id": "1", "status": 201}},
                    {"index": {"_id": "2", "status": 400, "error": {"type": "mapper_parsing_exception"}}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server);
        assert!(backend.bulk_index("posts", Vec::new()).await.unwrap().is_empty());
        let failures = backend
            .bulk_index("posts", vec![(1, json!({"body": "one"})), (2, json!({"body": "two"}))])
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, 2);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(body.ends_with('\n'));
        let lines: Vec<Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                json!({"index": {"_index": "posts", "_id": "1"}}),
                json!({"body": "one"}),
                json!({"index": {"_index": "posts", "_id": "2"}}),
                json!({"body": "two"}),
            ]
        );
    }

    #[test]
    fn hits_keep_backend_order() {
        let body = json!({
            "hits": {
                "total": {"value": 5, "relation": "eq"},
                "hits": [{"_id": "3"}, {"_id": "1"}]
            }
        });
        let hits = parse_hits(&body).unwrap();
        assert_eq!(hits.ids, vec![3, 1]);
        assert_eq!(hits.total, 5);
    }

    #[test]
    fn bulk_failures_are_extracted() {
        let body = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "1", "status": 201}},
                {"index": {"_id": "2", "status": 400, "error": {"type": "mapper_parsing_exception"}}}
            ]
        });
        let failures = parse_bulk_failures(&body);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, 2);
        assert_eq!(failures[0].status, 400);
        assert!(failures[0].error.contains("mapper_parsing_exception"));
    }
}
