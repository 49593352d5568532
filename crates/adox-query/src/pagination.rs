//! Offset-encoded pagination over list endpoints
//!
//! Several upstream list calls ignore `$top` or never return a usable
//! continuation token. The [`Paginator`] gives them a uniform cursor contract:
//! the token is the decimal offset of the next record, each call over-fetches
//! by exactly one record to learn whether another page exists, and the page is
//! sliced locally.
//!
//! Pages are gap- and overlap-free only while the upstream ordering is stable
//! between calls. If records are inserted or deleted between two page
//! requests, a record can be skipped or repeated; callers needing a consistent
//! snapshot must fetch everything in one call.

use adox_core::{AdoxError, PagingConfig, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Caller-supplied paging arguments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub continuation_token: Option<String>,
}

impl PageRequest {
    pub fn new(limit: Option<usize>, continuation_token: Option<String>) -> Self {
        Self {
            limit,
            continuation_token,
        }
    }
}

/// One page of records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

/// Decode a continuation token into an offset; absent or blank means 0
pub fn decode_cursor(token: Option<&str>) -> Result<usize> {
    match token.map(str::trim) {
        None | Some("") => Ok(0),
        Some(raw) => raw.parse::<usize>().map_err(|_| {
            AdoxError::InvalidArgument(format!(
                "Invalid continuation token '{}': pass back the token from a previous page",
                raw
            ))
        }),
    }
}

pub fn encode_cursor(offset: usize) -> String {
    offset.to_string()
}

/// Cut `[offset, offset + limit)` out of an over-fetched result
pub fn slice_page<T>(records: Vec<T>, offset: usize, limit: usize) -> Page<T> {
    let end = offset.saturating_add(limit);
    let has_more = records.len() > end;

    let items: Vec<T> = records.into_iter().skip(offset).take(limit).collect();

    Page {
        items,
        has_more,
        continuation_token: has_more.then(|| encode_cursor(end)),
    }
}

/// Applies the paging contract to any list call
#[derive(Debug, Clone)]
pub struct Paginator {
    default_limit: usize,
    max_limit: usize,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(&PagingConfig::default())
    }
}

impl Paginator {
    pub fn new(config: &PagingConfig) -> Self {
        Self {
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }

    /// Effective limit for a request
    pub fn limit_for(&self, request: &PageRequest) -> Result<usize> {
        match request.limit {
            None => Ok(self.default_limit),
            Some(0) => Err(AdoxError::InvalidArgument(
                "limit must be at least 1".to_string(),
            )),
            Some(limit) => Ok(limit.min(self.max_limit)),
        }
    }

    /// Fetch one page
    ///
    /// `fetch` receives the number of records to request (`offset + limit + 1`)
    /// and may return more or fewer. Upstream failures propagate unchanged.
    pub async fn fetch<T, F, Fut>(&self, request: &PageRequest, fetch: F) -> Result<Page<T>>
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let offset = decode_cursor(request.continuation_token.as_deref())?;
        let limit = self.limit_for(request)?;
        let top = offset
            .checked_add(limit)
            .and_then(|end| end.checked_add(1))
            .ok_or_else(|| {
                AdoxError::InvalidArgument(format!(
                    "Invalid continuation token '{}': offset out of range",
                    offset
                ))
            })?;

        tracing::debug!(offset, limit, top, "Fetching page");

        let records = fetch(top).await?;
        Ok(slice_page(records, offset, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    async fn upstream(records: Vec<u32>, top: usize, honor_top: bool) -> Result<Vec<u32>> {
        if honor_top {
            Ok(records.into_iter().take(top).collect())
        } else {
            Ok(records)
        }
    }

    #[tokio::test]
    async fn test_seven_records_limit_three() {
        let paginator = Paginator::default();
        let records: Vec<u32> = (1..=7).collect();

        let page1 = paginator
            .fetch(&PageRequest::new(Some(3), None), |top| {
                upstream(records.clone(), top, true)
            })
            .await
            .unwrap();
        assert_eq!(page1.items, vec![1, 2, 3]);
        assert!(page1.has_more);
        assert_eq!(page1.continuation_token.as_deref(), Some("3"));

        let page2 = paginator
            .fetch(&PageRequest::new(Some(3), page1.continuation_token), |top| {
                upstream(records.clone(), top, true)
            })
            .await
            .unwrap();
        assert_eq!(page2.items, vec![4, 5, 6]);
        assert!(page2.has_more);
        assert_eq!(page2.continuation_token.as_deref(), Some("6"));

        let page3 = paginator
            .fetch(&PageRequest::new(Some(3), page2.continuation_token), |top| {
                upstream(records.clone(), top, true)
            })
            .await
            .unwrap();
        assert_eq!(page3.items, vec![7]);
        assert!(!page3.has_more);
        assert_eq!(page3.continuation_token, None);
    }

    #[tokio::test]
    async fn test_requests_one_extra_record() {
        let paginator = Paginator::default();
        let mut requested = 0;
        paginator
            .fetch(&PageRequest::new(Some(10), Some("20".to_string())), |top| {
                requested = top;
                async { Ok::<_, AdoxError>(Vec::<u32>::new()) }
            })
            .await
            .unwrap();
        assert_eq!(requested, 31);
    }

    #[tokio::test]
    async fn test_default_and_clamped_limits() {
        let paginator = Paginator::new(&PagingConfig {
            default_limit: 5,
            max_limit: 8,
        });
        let records: Vec<u32> = (0..100).collect();

        let page = paginator
            .fetch(&PageRequest::default(), |top| upstream(records.clone(), top, false))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 5);

        let page = paginator
            .fetch(&PageRequest::new(Some(500), None), |top| {
                upstream(records.clone(), top, false)
            })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 8);
        assert_eq!(page.continuation_token.as_deref(), Some("8"));
    }

    #[tokio::test]
    async fn test_short_upstream_reports_no_more() {
        let paginator = Paginator::default();
        let page = paginator
            .fetch(&PageRequest::new(Some(10), None), |_| async {
                Ok::<_, AdoxError>(vec![1u32, 2])
            })
            .await
            .unwrap();
        assert_eq!(page.items, vec![1, 2]);
        assert!(!page.has_more);

        let empty = paginator
            .fetch(&PageRequest::new(Some(10), Some("40".to_string())), |_| async {
                Ok::<_, AdoxError>(vec![1u32, 2])
            })
            .await
            .unwrap();
        assert!(empty.items.is_empty());
        assert!(!empty.has_more);
    }

    #[tokio::test]
    async fn test_bad_token_and_zero_limit_skip_upstream() {
        let paginator = Paginator::default();
        let mut called = false;
        let result = paginator
            .fetch(&PageRequest::new(Some(3), Some("abc".to_string())), |_| {
                called = true;
                async { Ok::<_, AdoxError>(Vec::<u32>::new()) }
            })
            .await;
        assert!(matches!(result, Err(AdoxError::InvalidArgument(_))));
        assert!(!called);

        let result = paginator
            .fetch(&PageRequest::new(Some(0), None), |_| async {
                Ok::<_, AdoxError>(Vec::<u32>::new())
            })
            .await;
        assert!(matches!(result, Err(AdoxError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_out_of_range_token_skips_upstream() {
        let paginator = Paginator::default();
        let mut called = false;
        let result = paginator
            .fetch(
                &PageRequest::new(Some(3), Some(usize::MAX.to_string())),
                |_| {
                    called = true;
                    async { Ok::<_, AdoxError>(Vec::<u32>::new()) }
                },
            )
            .await;
        assert!(matches!(result, Err(AdoxError::InvalidArgument(_))));
        assert!(!called);

        let page = slice_page(vec![1u32, 2, 3], usize::MAX - 1, 5);
        assert!(page.items.is_empty());
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_upstream_error_passes_through() {
        let paginator = Paginator::default();
        let result = paginator
            .fetch(&PageRequest::default(), |_| async {
                Err::<Vec<u32>, _>(AdoxError::Api {
                    status: 403,
                    message: "denied".to_string(),
                })
            })
            .await;
        assert_eq!(result.unwrap_err().status(), Some(403));
    }

    #[test]
    fn test_blank_token_is_first_page() {
        assert_eq!(decode_cursor(None).unwrap(), 0);
        assert_eq!(decode_cursor(Some("  ")).unwrap(), 0);
        assert_eq!(decode_cursor(Some("12")).unwrap(), 12);
        assert!(decode_cursor(Some("-1")).is_err());
    }

    proptest! {
        #[test]
        fn prop_following_tokens_yields_each_record_once(
            total in 0usize..120,
            limit in 1usize..25,
            honor_top in any::<bool>(),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let paginator = Paginator::default();
            let records: Vec<u32> = (0..total as u32).collect();

            let mut seen = Vec::new();
            let mut token = None;
            let mut pages = 0;
            loop {
                let request = PageRequest::new(Some(limit), token.clone());
                let page = runtime
                    .block_on(paginator.fetch(&request, |top| {
                        upstream(records.clone(), top, honor_top)
                    }))
                    .unwrap();
                pages += 1;
                prop_assert!(page.items.len() <= limit);
                seen.extend(page.items);
                if !page.has_more {
                    prop_assert!(page.continuation_token.is_none());
                    break;
                }
                prop_assert!(page.continuation_token.is_some());
                token = page.continuation_token;
                prop_assert!(pages <= total + 1);
            }

            prop_assert_eq!(seen, records);
        }
    }
}
