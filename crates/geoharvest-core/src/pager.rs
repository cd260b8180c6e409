//! Lazy, paged record search on top of [`CatalogClient::get_records`].
//!
//! [`search_records`] returns a stream that requests the next page only when
//! the consumer has drained the previous one. The stream is finite:
//!
//! - it ends when the server reports no further page, when a page comes back
//!   empty, or when the next position would not advance or would pass the
//!   reported total;
//! - a page failure is yielded once as an `Err` item and the stream ends;
//! - dropping the stream stops all further requests.
//!
//! A consumed stream cannot be restarted. Build a new one to search again.

use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use crate::error::AppError;
use crate::models::{PageRequest, RemoteRecord, SearchPage};
use crate::node::{QueryScope, SearchCriteria};
use crate::traits::CatalogClient;

/// Stream of remote records produced by [`search_records`].
pub type RecordStream = BoxStream<'static, Result<RemoteRecord, AppError>>;

/// Search parameters that stay fixed for every page.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    pub criteria: SearchCriteria,
    pub scope: QueryScope,
    pub hop_count: u32,
    pub page_size: u32,
}

struct PagerState<C> {
    client: C,
    spec: SearchSpec,
    /// Position of the next page to request; `None` once exhausted.
    next_start: Option<u32>,
}

/// Starts a lazy paged search. No request is sent until the stream is polled.
pub fn search_records<C>(client: C, spec: SearchSpec) -> RecordStream
where
    C: CatalogClient + 'static,
{
    let state = PagerState {
        client,
        spec,
        next_start: Some(1),
    };

    stream::unfold(state, fetch_next_page)
        .flat_map(stream::iter)
        .boxed()
}

async fn fetch_next_page<C: CatalogClient>(
    mut state: PagerState<C>,
) -> Option<(Vec<Result<RemoteRecord, AppError>>, PagerState<C>)> {
    let start = state.next_start?;
    let request = PageRequest {
        criteria: &state.spec.criteria,
        scope: state.spec.scope,
        hop_count: state.spec.hop_count,
        start_position: start,
        max_records: state.spec.page_size,
    };

    match state.client.get_records(&request).await {
        Ok(page) => {
            if page.records.is_empty() {
                debug!(endpoint = state.client.endpoint(), start, "Empty page, search exhausted");
                return None;
            }
            state.next_start = next_position(start, &page);
            debug!(
                endpoint = state.client.endpoint(),
                start,
                returned = page.records.len(),
                matched = page.matched,
                next = ?state.next_start,
                "Fetched page"
            );
            Some((page.records.into_iter().map(Ok).collect(), state))
        }
        Err(e) => {
            state.next_start = None;
            Some((vec![Err(e)], state))
        }
    }
}

/// Computes where the page after `page` starts, or `None` if there is none.
///
/// Servers signal the last page with `nextRecord = 0`. When `nextRecord` is
/// absent the position is derived from the number of records received. A
/// position that does not move forward, or that lies past the reported
/// total, ends the search.
pub fn next_position(start: u32, page: &SearchPage) -> Option<u32> {
    let candidate = match page.next_record {
        Some(0) => return None,
        Some(next) => next,
        None => start.checked_add(page.records.len() as u32)?,
    };

    if candidate <= start || candidate > page.matched {
        None
    } else {
        Some(candidate)
    }
}
