pub mod http_fetcher;
pub mod json_feed;

pub use http_fetcher::HttpFetcher;
pub use json_feed::JsonFeedParser;
