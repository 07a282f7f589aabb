//! Cached `Date` header values.
//!
//! Formatting an HTTP date on every response is wasteful, so [`DateService`] keeps the
//! current value in an [`ArcSwap`] and refreshes it from a background task.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use http::HeaderValue;
use httpdate::fmt_http_date;

const UPDATE_INTERVAL: Duration = Duration::from_millis(700);

#[derive(Debug)]
pub struct DateService {
    current: Arc<ArcSwap<HeaderValue>>,
    handle: tokio::task::JoinHandle<()>,
}

fn now_header_value() -> HeaderValue {
    // an IMF-fixdate is always visible ASCII
    HeaderValue::from_str(&fmt_http_date(SystemTime::now())).unwrap_or_else(|_| HeaderValue::from_static(""))
}

impl DateService {
    /// Starts the refresh task. Must be called within a tokio runtime.
    pub(crate) fn new() -> Self {
        let current = Arc::new(ArcSwap::from_pointee(now_header_value()));
        let current_arc = Arc::clone(&current);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(UPDATE_INTERVAL).await;
                current_arc.store(Arc::new(now_header_value()));
            }
        });

        DateService { current, handle }
    }

    pub(crate) fn http_date(&self) -> HeaderValue {
        self.current.load().as_ref().clone()
    }
}

impl Drop for DateService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
