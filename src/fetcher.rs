use std::num::NonZeroU32;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::record::Observation;
use crate::settings::{Filters, Settings};

/// A paginated observation resource addressed by offset/limit.
pub trait PageSource {
    /// Fetch one page. An empty vector means the source is exhausted.
    fn fetch_page(&self, offset: u64, limit: u32, filters: &Filters) -> Result<Vec<Observation>>;
}

impl<S: PageSource + ?Sized> PageSource for &S {
    fn fetch_page(&self, offset: u64, limit: u32, filters: &Filters) -> Result<Vec<Observation>> {
        (**self).fetch_page(offset, limit, filters)
    }
}

#[derive(Deserialize)]
struct PageBody {
    #[serde(default)]
    records: Option<Vec<Observation>>,
}

/// The data.gov.in resource API over blocking HTTP.
pub struct HttpSource {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpSource {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| IngestError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(HttpSource {
            client,
            base_url: settings.resource_url(),
            api_key: settings.api_key.clone(),
        })
    }

    pub fn request(&self, offset: u64, limit: u32, filters: &Filters) -> RequestBuilder {
        let mut query: Vec<(String, String)> = vec![
            ("api-key".into(), self.api_key.clone()),
            ("format".into(), "json".into()),
            ("offset".into(), offset.to_string()),
            ("limit".into(), limit.to_string()),
        ];
        for (field, value) in filters {
            query.push((format!("filters[{}]", field), value.clone()));
        }
        self.client.get(&self.base_url).query(&query)
    }
}

impl PageSource for HttpSource {
    fn fetch_page(&self, offset: u64, limit: u32, filters: &Filters) -> Result<Vec<Observation>> {
        let response = self
            .request(offset, limit, filters)
            .send()
            .map_err(|source| IngestError::Request { offset, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Status {
                status: status.as_u16(),
                offset,
            });
        }

        let body: PageBody = response.json().map_err(|e| IngestError::Body {
            offset,
            reason: e.to_string(),
        })?;
        Ok(body.records.unwrap_or_default())
    }
}

/// Walks a [`PageSource`] from offset 0 until an empty page or the page ceiling.
pub struct Fetcher<S> {
    source: S,
    limit: NonZeroU32,
    filters: Filters,
    delay: Duration,
    max_pages: Option<NonZeroU32>,
}

impl<S: PageSource> Fetcher<S> {
    pub fn new(source: S, limit: NonZeroU32) -> Self {
        Fetcher {
            source,
            limit,
            filters: Filters::new(),
            delay: Duration::ZERO,
            max_pages: None,
        }
    }

    pub fn from_settings(source: S, settings: &Settings, filters: Filters) -> Self {
        Fetcher::new(source, settings.page_limit)
            .filters(filters)
            .delay(settings.polite_delay)
            .max_pages(settings.max_pages)
    }

    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_pages(mut self, max_pages: Option<NonZeroU32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Fetch every page in order, sleeping `delay` between requests.
    pub fn fetch_all(&self) -> Result<Vec<Observation>> {
        self.fetch_all_with(std::thread::sleep)
    }

    /// Like [`fetch_all`](Self::fetch_all) with a caller-supplied pause between
    /// requests. The pause runs once before every request except the first.
    pub fn fetch_all_with(&self, mut pause: impl FnMut(Duration)) -> Result<Vec<Observation>> {
        let limit = self.limit.get();
        let mut rows = Vec::new();
        let mut pages: u64 = 0;

        loop {
            if pages > 0 {
                pause(self.delay);
            }
            let offset = pages * u64::from(limit);
            let page = self.source.fetch_page(offset, limit, &self.filters)?;
            if page.is_empty() {
                debug!(offset, "Empty page, source exhausted");
                break;
            }

            debug!(offset, records = page.len(), "Accepted page");
            rows.extend(page);
            pages += 1;

            if let Some(max) = self.max_pages {
                if pages >= u64::from(max.get()) {
                    debug!(pages, "Reached max_pages ceiling");
                    break;
                }
            }
        }

        debug!("Fetched {} records across {} pages", rows.len(), pages);
        Ok(rows)
    }
}
