// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! The real transport, talking to an OSS-dialect endpoint over `reqwest`.
//!
//! The HTTP client and signing machinery of the underlying object-store
//! SDK are treated as a black box; this module owns only the minimal
//! REST contract (headers, query parameters, status-code-to-error-kind
//! mapping). Request signing is assumed to be handled by whatever
//! production credential/signing middleware sits in front of
//! `self.client`, the same concern `object_store::aliyun` delegates to
//! the `object_store` crate's `AmazonS3Builder`.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{blocking::Client, StatusCode};

use super::{AppendResult, HeadResult, ObjectType, Transport};
use crate::{
    config::RequestTuning,
    data::ObjectRef,
    error::{FatalSnafu, NotFoundSnafu, Result, TransientSnafu},
};

pub(crate) struct HttpTransport {
    client: Client,
    endpoint: String,
    id: String,
    key: String,
}

impl HttpTransport {
    pub(crate) fn new(endpoint: &str, id: &str, key: &str, tuning: RequestTuning) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(tuning.connect_timeout_s.max(1)))
            .build()
            .map_err(|e| {
                FatalSnafu {
                    op: "build_client",
                    bucket: String::new(),
                    key: String::new(),
                    code: None,
                    message: e.to_string(),
                    request_id: None,
                }
                .build()
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            id: id.to_string(),
            key: key.to_string(),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("https://{}.{}/{}", bucket, self.endpoint, key)
    }

    /// Classify a non-2xx response into the crate's error taxonomy.
    fn classify(
        &self,
        op: &'static str,
        bucket: &str,
        key: &str,
        status: StatusCode,
        body: String,
    ) -> crate::error::Error {
        let request_id = None;
        if status == StatusCode::NOT_FOUND {
            return NotFoundSnafu {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }
            .build();
        }
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS
        {
            return TransientSnafu {
                op,
                bucket: bucket.to_string(),
                key: key.to_string(),
                code: Some(status.as_str().to_string()),
                message: body,
                request_id,
            }
            .build();
        }
        FatalSnafu {
            op,
            bucket: bucket.to_string(),
            key: key.to_string(),
            code: Some(status.as_str().to_string()),
            message: body,
            request_id,
        }
        .build()
    }

    fn to_transport_error(&self, op: &'static str, bucket: &str, key: &str, e: reqwest::Error) -> crate::error::Error {
        // Timeouts and connect failures are transient by construction: a
        // retry is always worth attempting before giving up.
        if e.is_timeout() || e.is_connect() {
            TransientSnafu {
                op,
                bucket: bucket.to_string(),
                key: key.to_string(),
                code: None,
                message: e.to_string(),
                request_id: None,
            }
            .build()
        } else {
            FatalSnafu {
                op,
                bucket: bucket.to_string(),
                key: key.to_string(),
                code: None,
                message: e.to_string(),
                request_id: None,
            }
            .build()
        }
    }
}

impl Transport for HttpTransport {
    fn head(&self, bucket: &str, key: &str) -> Result<HeadResult> {
        let resp = self
            .client
            .head(self.object_url(bucket, key))
            .basic_auth(&self.id, Some(&self.key))
            .send()
            .map_err(|e| self.to_transport_error("head", bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(self.classify("head", bucket, key, status, body));
        }

        let length = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let object_type = match resp.headers().get("x-oss-object-type").and_then(|v| v.to_str().ok()) {
            Some("Appendable") => ObjectType::Appendable,
            _ => ObjectType::Normal,
        };
        let next_append_pos = resp
            .headers()
            .get("x-oss-next-append-position")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(length);

        Ok(HeadResult {
            length,
            object_type,
            next_append_pos,
        })
    }

    fn list(&self, bucket: &str, prefix: &str, delimiter: Option<&str>) -> Result<Vec<ObjectRef>> {
        let mut refs = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            // V1 `GetBucket`/`ListObjects` dialect throughout: paginate by
            // `marker`, not `list-type=2`'s `continuation-token`, so
            // `<NextMarker>`/`<IsTruncated>` parsing below stays consistent
            // with what the server actually returns.
            let mut req = self
                .client
                .get(format!("https://{}.{}/", bucket, self.endpoint))
                .basic_auth(&self.id, Some(&self.key))
                .query(&[("prefix", prefix)]);
            if let Some(d) = delimiter {
                req = req.query(&[("delimiter", d)]);
            }
            if let Some(m) = &marker {
                req = req.query(&[("marker", m.as_str())]);
            }

            let resp = req
                .send()
                .map_err(|e| self.to_transport_error("list", bucket, prefix, e))?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().unwrap_or_default();
                return Err(self.classify("list", bucket, prefix, status, body));
            }

            let body = resp
                .text()
                .map_err(|e| self.to_transport_error("list", bucket, prefix, e))?;
            let page = parse_list_xml(bucket, &body);
            let truncated = page.is_truncated;
            let last_key = page.objects.last().map(|o| o.key.clone());
            refs.extend(page.objects);

            if !truncated {
                break;
            }
            // The last returned key becomes the next marker (spec §4.1) when
            // the server's `<NextMarker>` is absent, which `GetBucket` does
            // whenever the page wasn't truncated by a common-prefix
            // (`delimiter`) boundary.
            marker = page.next_marker.or(last_key);
        }
        Ok(refs)
    }

    fn get_range(&self, bucket: &str, key: &str, offset: u64, length: u64) -> Result<Bytes> {
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let resp = self
            .client
            .get(self.object_url(bucket, key))
            .basic_auth(&self.id, Some(&self.key))
            .header("Range", range)
            .send()
            .map_err(|e| self.to_transport_error("get_range", bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(self.classify("get_range", bucket, key, status, body));
        }
        resp.bytes()
            .map_err(|e| self.to_transport_error("get_range", bucket, key, e))
    }

    fn append(&self, bucket: &str, key: &str, position: u64, bytes: &[u8]) -> Result<AppendResult> {
        let resp = self
            .client
            .post(self.object_url(bucket, key))
            .basic_auth(&self.id, Some(&self.key))
            .query(&[("append", ""), ("position", &position.to_string())])
            .body(bytes.to_vec())
            .send()
            .map_err(|e| self.to_transport_error("append", bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            // An append landing on a stale/mismatched position is never
            // retryable: the server's state has already diverged from our
            // assumption, so this always collapses to Fatal regardless of
            // status class.
            return Err(FatalSnafu {
                op: "append",
                bucket: bucket.to_string(),
                key: key.to_string(),
                code: Some(status.as_str().to_string()),
                message: body,
                request_id: None,
            }
            .build());
        }

        let new_position = resp
            .headers()
            .get("x-oss-next-append-position")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(position + bytes.len() as u64);

        Ok(AppendResult { new_position })
    }
}

struct ListPage {
    objects: Vec<ObjectRef>,
    is_truncated: bool,
    next_marker: Option<String>,
}

/// Minimal hand-rolled parse of the S3/OSS `ListObjects` XML body: pulls out
/// `<Key>`/`<Size>` pairs plus `<IsTruncated>`/`<NextMarker>`. A production
/// build would use a real XML deserializer; this core only needs the four
/// fields the pagination contract relies on.
fn parse_list_xml(bucket: &str, body: &str) -> ListPage {
    let mut objects = Vec::new();
    for contents in body.split("<Contents>").skip(1) {
        let end = contents.find("</Contents>").unwrap_or(contents.len());
        let block = &contents[..end];
        if let Some(key) = extract_tag(block, "Key") {
            let size = extract_tag(block, "Size").and_then(|s| s.parse::<u64>().ok());
            objects.push(ObjectRef {
                bucket: bucket.to_string(),
                key,
                length: size,
            });
        }
    }
    let is_truncated = extract_tag(body, "IsTruncated").as_deref() == Some("true");
    let next_marker = extract_tag(body, "NextMarker");
    ListPage {
        objects,
        is_truncated,
        next_marker,
    }
}

fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_xml() {
        let body = r#"<ListBucketResult>
            <IsTruncated>true</IsTruncated>
            <NextMarker>b/2</NextMarker>
            <Contents><Key>b/1</Key><Size>10</Size></Contents>
            <Contents><Key>b/2</Key><Size>20</Size></Contents>
        </ListBucketResult>"#;
        let page = parse_list_xml("bucket", body);
        assert!(page.is_truncated);
        assert_eq!(page.next_marker.as_deref(), Some("b/2"));
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.objects[0].key, "b/1");
        assert_eq!(page.objects[0].length, Some(10));
    }
}
