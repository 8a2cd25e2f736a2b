use std::future::Future;

use async_stream::try_stream;
use futures::Stream;
use serde::Deserialize;

use crate::Result;

/// Cursor the server returns once the last page has been served.
pub const END_CURSOR: &str = "LTE=";

/// One page of a cursor-paginated listing.
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub next_cursor: String,
}

impl<T> Page<T> {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_empty() || self.next_cursor == END_CURSOR
    }
}

/// Flattens a cursor-paginated listing into a stream of items.
///
/// `fetch` is called lazily with the previous page's cursor (empty for the
/// first page). A fetch error is yielded once and ends the stream. Calling
/// `paginate` again restarts from the first page.
pub fn paginate<T, F, Fut>(mut fetch: F) -> impl Stream<Item = Result<T>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    try_stream! {
        let mut cursor = String::new();
        loop {
            let page = fetch(cursor).await?;
            let last = page.is_last();
            cursor = page.next_cursor;

            for item in page.data {
                yield item;
            }

            if last {
                break;
            }
        }
    }
}
