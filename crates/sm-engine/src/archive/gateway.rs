//! Archive adapter: paginated GraphQL tag queries and size-capped downloads
//! with ordered multi-gateway failover.
//!
//! Failures isolate to the single request; the next gateway in the list is
//! tried, and only exhaustion of the whole list surfaces an error. Size caps
//! are enforced twice on download: against the `Content-Length` header
//! before reading, then against the bytes actually received.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use sm_core::{
    accept_conversation_chunks, accept_shards, tags, ArchiveIndex, ConversationChunkRef,
    ShardRef, ShareRef, SmError, SmResult, TxMeta,
};

use crate::config::EngineConfig;

/// Items requested per GraphQL page.
const PAGE_SIZE: usize = 100;
/// Hard pagination cap; exceeding it aborts the request rather than follow
/// an adversarial gateway forever.
const MAX_PAGES: usize = 1000;

pub struct ArchiveGateway {
    graphql_urls: Vec<String>,
    data_urls: Vec<String>,
    client: reqwest::Client,
}

impl ArchiveGateway {
    pub fn new(config: &EngineConfig) -> SmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.sync.request_timeout_secs))
            .build()
            .map_err(|e| SmError::NetworkUnavailable(format!("http client: {e}")))?;

        Ok(Self {
            graphql_urls: config.gateways.graphql.clone(),
            data_urls: config.gateways.data.clone(),
            client,
        })
    }

    // -----------------------------------------------------------------------
    // GraphQL plumbing
    // -----------------------------------------------------------------------

    /// Run one cursor-paginated tag query to completion.
    async fn query_transactions(
        &self,
        tag_filters: &[(&str, &str)],
        newest_first: bool,
    ) -> SmResult<Vec<TxMeta>> {
        let mut hits = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0.. {
            if page >= MAX_PAGES {
                return Err(SmError::PaginationBlown(page));
            }

            let query = build_query(tag_filters, newest_first, cursor.as_deref());
            let result = self.graphql_page(&query).await?;

            let mut last_cursor = None;
            for edge in result.edges {
                last_cursor = Some(edge.cursor);
                hits.push(TxMeta {
                    id: edge.node.id,
                    block_height: edge.node.block.and_then(|b| b.height),
                    tags: edge
                        .node
                        .tags
                        .into_iter()
                        .map(|t| (t.name, t.value))
                        .collect(),
                });
            }

            if !result.page_info.has_next_page || last_cursor.is_none() {
                break;
            }
            cursor = last_cursor;
        }

        Ok(hits)
    }

    /// One GraphQL page, tried against each endpoint in order.
    async fn graphql_page(&self, query: &str) -> SmResult<GqlTransactions> {
        let mut failures = Vec::new();
        for url in &self.graphql_urls {
            match self.try_graphql(url, query).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::debug!(gateway = %url, error = %e, "graphql gateway failed");
                    failures.push(format!("{url}: {e}"));
                }
            }
        }
        Err(SmError::GatewayError(failures.join("; ")))
    }

    async fn try_graphql(&self, url: &str, query: &str) -> SmResult<GqlTransactions> {
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .map_err(|e| SmError::NetworkUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SmError::NetworkUnavailable(format!("status {status}")));
        }

        let body: GqlResponse = response
            .json()
            .await
            .map_err(|e| SmError::NetworkUnavailable(format!("graphql body: {e}")))?;

        if let Some(errors) = body.errors {
            if !errors.is_empty() {
                let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
                return Err(SmError::NetworkUnavailable(messages.join("; ")));
            }
        }

        body.data
            .map(|d| d.transactions)
            .ok_or_else(|| SmError::NetworkUnavailable("graphql response without data".into()))
    }
}

#[async_trait]
impl ArchiveIndex for ArchiveGateway {
    async fn query_shards(&self, wallet: &str) -> SmResult<Vec<ShardRef>> {
        let hits = self
            .query_transactions(
                &[(tags::TAG_APP_NAME, tags::APP_NAME), (tags::TAG_WALLET, wallet)],
                false,
            )
            .await?;
        Ok(accept_shards(&hits, wallet))
    }

    async fn query_conversation_chunks(
        &self,
        wallet: &str,
    ) -> SmResult<Vec<ConversationChunkRef>> {
        let hits = self
            .query_transactions(
                &[
                    (tags::TAG_APP_NAME, tags::APP_NAME),
                    (tags::TAG_WALLET, wallet),
                    (tags::TAG_TYPE, tags::TYPE_CONVERSATION),
                ],
                false,
            )
            .await?;
        Ok(accept_conversation_chunks(&hits, wallet))
    }

    async fn query_share(&self, share_id: &str) -> SmResult<Option<ShareRef>> {
        let hits = self
            .query_transactions(
                &[
                    (tags::TAG_APP_NAME, tags::APP_NAME),
                    (tags::TAG_TYPE, tags::TYPE_CONVERSATION_SHARE),
                    (tags::TAG_SHARE_ID, share_id),
                ],
                true,
            )
            .await?;
        Ok(hits.first().map(ShareRef::from_meta))
    }

    async fn download(&self, tx_id: &str, max_bytes: usize) -> SmResult<Vec<u8>> {
        let mut failures = Vec::new();
        for base in &self.data_urls {
            match self.try_download(base, tx_id, max_bytes).await {
                Ok(bytes) => return Ok(bytes),
                // An oversized blob is a property of the data, not of the
                // gateway; do not retry it elsewhere.
                Err(e @ SmError::BlobTooLarge { .. }) => return Err(e),
                Err(e) => {
                    tracing::debug!(gateway = %base, tx = %tx_id, error = %e, "download failed");
                    failures.push(format!("{base}: {e}"));
                }
            }
        }
        Err(SmError::GatewayError(failures.join("; ")))
    }
}

impl ArchiveGateway {
    async fn try_download(&self, base: &str, tx_id: &str, max_bytes: usize) -> SmResult<Vec<u8>> {
        let mut response = self
            .client
            .get(format!("{base}/{tx_id}"))
            .send()
            .await
            .map_err(|e| SmError::NetworkUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SmError::NetworkUnavailable(format!("status {status}")));
        }

        if let Some(declared) = response.content_length() {
            if declared as usize > max_bytes {
                return Err(SmError::BlobTooLarge {
                    size: declared as usize,
                    cap: max_bytes,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SmError::NetworkUnavailable(e.to_string()))?
        {
            body.extend_from_slice(&chunk);
            if body.len() > max_bytes {
                return Err(SmError::BlobTooLarge {
                    size: body.len(),
                    cap: max_bytes,
                });
            }
        }
        Ok(body)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

fn build_query(tag_filters: &[(&str, &str)], newest_first: bool, cursor: Option<&str>) -> String {
    let tag_list: Vec<String> = tag_filters
        .iter()
        .map(|(name, value)| {
            format!(
                "{{ name: {}, values: [{}] }}",
                serde_json::Value::from(*name),
                serde_json::Value::from(*value)
            )
        })
        .collect();
    let sort = if newest_first { "HEIGHT_DESC" } else { "HEIGHT_ASC" };
    let after = match cursor {
        Some(c) => format!(", after: {}", serde_json::Value::from(c)),
        None => String::new(),
    };

    format!(
        "query {{ transactions(first: {PAGE_SIZE}, sort: {sort}, tags: [{}]{after}) {{ \
           pageInfo {{ hasNextPage }} \
           edges {{ cursor node {{ id block {{ height }} tags {{ name value }} }} }} \
         }} }}",
        tag_list.join(", ")
    )
}

#[derive(Deserialize)]
struct GqlResponse {
    data: Option<GqlData>,
    errors: Option<Vec<GqlError>>,
}

#[derive(Deserialize)]
struct GqlError {
    message: String,
}

#[derive(Deserialize)]
struct GqlData {
    transactions: GqlTransactions,
}

#[derive(Deserialize)]
pub(crate) struct GqlTransactions {
    #[serde(rename = "pageInfo")]
    page_info: GqlPageInfo,
    edges: Vec<GqlEdge>,
}

#[derive(Deserialize)]
struct GqlPageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
}

#[derive(Deserialize)]
struct GqlEdge {
    cursor: String,
    node: GqlNode,
}

#[derive(Deserialize)]
struct GqlNode {
    id: String,
    block: Option<GqlBlock>,
    tags: Vec<GqlTag>,
}

#[derive(Deserialize)]
struct GqlBlock {
    height: Option<u64>,
}

#[derive(Deserialize)]
struct GqlTag {
    name: String,
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_embeds_tags_sort_and_cursor() {
        let q = build_query(
            &[(tags::TAG_APP_NAME, tags::APP_NAME), (tags::TAG_WALLET, "w\"1")],
            false,
            Some("cur1"),
        );
        assert!(q.contains("sort: HEIGHT_ASC"));
        assert!(q.contains(r#"{ name: "App-Name", values: ["sharme"] }"#));
        // Tag values are JSON-escaped.
        assert!(q.contains(r#"values: ["w\"1"]"#));
        assert!(q.contains(r#"after: "cur1""#));

        let q = build_query(&[], true, None);
        assert!(q.contains("sort: HEIGHT_DESC"));
        assert!(!q.contains("after:"));
    }

    #[test]
    fn graphql_response_parses() {
        let body = r#"{
            "data": { "transactions": {
                "pageInfo": { "hasNextPage": false },
                "edges": [
                    { "cursor": "c1", "node": {
                        "id": "tx1",
                        "block": { "height": 12 },
                        "tags": [ { "name": "Type", "value": "delta" } ]
                    } }
                ]
            } }
        }"#;
        let parsed: GqlResponse = serde_json::from_str(body).unwrap();
        let txs = parsed.data.unwrap().transactions;
        assert!(!txs.page_info.has_next_page);
        assert_eq!(txs.edges.len(), 1);
        assert_eq!(txs.edges[0].node.id, "tx1");
        assert_eq!(txs.edges[0].node.block.as_ref().unwrap().height, Some(12));
    }
}
